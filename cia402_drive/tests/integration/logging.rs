//! Integration test: drive logging through the bounded queue.

use std::fs;

use cia402_common::cia402::CiaState;
use cia402_common::consts::LOG_FILE_NAME;
use cia402_common::log::LogMsgType;
use cia402_common::profile::ProfilerConfig;
use cia402_drive::logging::{FileSink, LogQueue};
use cia402_drive::pdo::ProcessImage;
use cia402_drive::service::{DriveCommand, NetworkDriveService, ServiceOptions};
use cia402_drive::sim::{FieldbusTransport, InMemoryObjectDictionary, SimulatedTransport};
use tempfile::TempDir;

use super::common::{DRIVE, DT, Rig, RigOptions, collaborators, topology};

#[test]
fn full_queue_drops_without_stalling_the_drive() {
    let mut rig = Rig::with(RigOptions {
        log_capacity: 2,
        ..Default::default()
    });
    rig.service.submit(DriveCommand::ProfileVelocity(100));
    assert!(rig.run_until(CiaState::OpEnabled, 10).is_some());

    assert!(rig.log.dropped() > 0);
    assert_eq!(rig.events().len(), 2);
    assert!(rig.service.status().errors.is_empty());

    // Space frees up once drained.
    rig.service.submit(DriveCommand::Disable);
    rig.step().unwrap();
    assert_eq!(rig.events_of(LogMsgType::Command).len(), 1);
}

#[test]
fn events_tagged_with_drive_and_time() {
    let mut rig = Rig::new();
    rig.service.submit(DriveCommand::Home);
    rig.run(10);

    let events = rig.events();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.slave_id == Some(DRIVE)));
    assert!(events.windows(2).all(|w| w[0].timestamp_ns <= w[1].timestamp_ns));
    assert!(events.iter().any(|e| e.message.as_str() == "HOMED"));
}

#[test]
fn closed_consumer_is_ignored() {
    let image = ProcessImage::new(topology()).unwrap();
    let mut bus = SimulatedTransport::for_image(&image);
    let image = image.into_shared();

    let (log, service) = LogQueue::bounded(8);
    drop(service);
    let mut drive = NetworkDriveService::production(
        &ProfilerConfig::default(),
        collaborators(&image, DRIVE, InMemoryObjectDictionary::new()),
        None,
        Box::new(log.for_slave(DRIVE)),
        ServiceOptions::default(),
    );
    drive.submit(DriveCommand::ProfileVelocity(100));
    for n in 1..=5u64 {
        bus.exchange(&mut image.lock(), DT).unwrap();
        drive.cycle(n * 1_000_000).unwrap();
    }
    assert_eq!(drive.status().state, CiaState::OpEnabled);
    assert_eq!(log.dropped(), 0);
}

#[test]
fn logging_thread_writes_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join(LOG_FILE_NAME);

    let (log, service) = LogQueue::bounded(64);
    let writer = service.spawn(FileSink::create(&path).unwrap()).unwrap();

    let image = ProcessImage::new(topology()).unwrap();
    let mut bus = SimulatedTransport::for_image(&image);
    let image = image.into_shared();
    let mut drive = NetworkDriveService::production(
        &ProfilerConfig::default(),
        collaborators(&image, DRIVE, InMemoryObjectDictionary::new()),
        None,
        Box::new(log.for_slave(DRIVE)),
        ServiceOptions::default(),
    );
    drop(log);

    drive.submit(DriveCommand::ProfileVelocity(100));
    for n in 1..=5u64 {
        bus.exchange(&mut image.lock(), DT).unwrap();
        drive.cycle(n * 1_000_000).unwrap();
    }
    drop(drive);

    let written = writer.join().unwrap();
    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count() as u64, written);
    assert!(text.contains("COMMAND slave=0 VELOCITY"));
    assert!(text.contains("DATA slave=0 SWITCHED_ON -> OP_ENABLED"));
}
