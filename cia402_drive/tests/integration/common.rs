//! Shared rig: one CiA 402 drive and one digital I/O terminal on a simulated bus.

use std::time::Duration;

use cia402_common::cia402::{CiaState, OpMode};
use cia402_common::consts::PDO_SIZE;
use cia402_common::log::{LogEvent, LogMsgType};
use cia402_common::profile::ProfilerConfig;
use cia402_common::slave::{PdoRegion, SlaveConfig, SlaveType};
use cia402_drive::control::{ProfileMotionControl, SlopeTorqueControl};
use cia402_drive::error::DriveError;
use cia402_drive::interfaces::{FeedbackSample, PositionFeedback};
use cia402_drive::logging::{DataLoggingService, LogHandle, LogQueue, MemorySink};
use cia402_drive::pdo::{ProcessImage, SharedImage, SlavePdoLink};
use cia402_drive::service::{
    Collaborators, CycleReport, DriveCommand, NetworkDriveService, ServiceOptions,
};
use cia402_drive::sim::{
    FieldbusTransport, ImageFeedback, InMemoryObjectDictionary, SimulatedDrive,
    SimulatedTransport,
};

pub const DT: Duration = Duration::from_millis(1);
pub const DRIVE: u16 = 0;
pub const IO: u16 = 1;

/// Drive at 0..36, a 4-byte digital I/O terminal right after it.
pub fn topology() -> Vec<SlaveConfig> {
    vec![
        SlaveConfig {
            id: DRIVE,
            slave_type: SlaveType::Cia402Drive,
            input: PdoRegion::new(0, PDO_SIZE),
            output: PdoRegion::new(0, PDO_SIZE),
        },
        SlaveConfig {
            id: IO,
            slave_type: SlaveType::DigitalIo,
            input: PdoRegion::new(PDO_SIZE, 4),
            output: PdoRegion::new(PDO_SIZE, 4),
        },
    ]
}

/// Sensor that always reports the same sample.
pub struct FixedSensor(pub FeedbackSample);

impl PositionFeedback for FixedSensor {
    fn read(&mut self) -> FeedbackSample {
        self.0
    }
}

/// Default collaborators for `slave`. Falls back to a fixed sensor when the
/// slave has no position in the image.
pub fn collaborators(
    image: &SharedImage,
    slave: u16,
    od: InMemoryObjectDictionary,
) -> Collaborators {
    let feedback_1: Box<dyn PositionFeedback> = match ImageFeedback::new(image.clone(), slave) {
        Ok(sensor) => Box::new(sensor),
        Err(_) => Box::new(FixedSensor(FeedbackSample::default())),
    };
    Collaborators {
        pdo: Box::new(SlavePdoLink::new(image.clone(), slave)),
        od: Box::new(od),
        torque_control: Box::new(SlopeTorqueControl::new(ProfilerConfig::default().max_torque)),
        motion_control: Box::new(ProfileMotionControl::new()),
        feedback_1,
    }
}

/// Rig construction parameters.
pub struct RigOptions {
    pub profile: ProfilerConfig,
    pub options: ServiceOptions,
    pub od: InMemoryObjectDictionary,
    pub feedback_2: Option<Box<dyn PositionFeedback>>,
    pub log_capacity: usize,
    pub collaborators: Option<Box<dyn FnOnce(&SharedImage) -> Collaborators>>,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            profile: ProfilerConfig::default(),
            options: ServiceOptions::default(),
            od: InMemoryObjectDictionary::new(),
            feedback_2: None,
            log_capacity: 256,
            collaborators: None,
        }
    }
}

/// Production service wired to the simulated bus and an in-memory log.
pub struct Rig {
    pub image: SharedImage,
    pub bus: SimulatedTransport,
    pub service: NetworkDriveService,
    pub log: LogHandle,
    log_service: DataLoggingService,
    sink: MemorySink,
    pub now_ns: u64,
}

impl Rig {
    pub fn new() -> Self {
        Self::with(RigOptions::default())
    }

    pub fn with(opts: RigOptions) -> Self {
        let image = ProcessImage::new(topology()).unwrap();
        let bus = SimulatedTransport::for_image(&image);
        let image = image.into_shared();

        let (log, log_service) = LogQueue::bounded(opts.log_capacity);
        let collaborators = match opts.collaborators {
            Some(build) => build(&image),
            None => collaborators(&image, DRIVE, opts.od),
        };
        let service = NetworkDriveService::production(
            &opts.profile,
            collaborators,
            opts.feedback_2,
            Box::new(log.for_slave(DRIVE)),
            opts.options,
        );

        Self {
            image,
            bus,
            service,
            log,
            log_service,
            sink: MemorySink::new(),
            now_ns: 0,
        }
    }

    /// One bus frame followed by one service cycle.
    pub fn step(&mut self) -> Result<CycleReport, DriveError> {
        self.bus.exchange(&mut self.image.lock(), DT).unwrap();
        self.now_ns += DT.as_nanos() as u64;
        self.service.cycle(self.now_ns)
    }

    pub fn run(&mut self, cycles: usize) {
        for _ in 0..cycles {
            self.step().unwrap();
        }
    }

    /// Step until the service reports `state`. Returns the cycles taken.
    pub fn run_until(&mut self, state: CiaState, max: usize) -> Option<usize> {
        for n in 1..=max {
            if self.step().unwrap().state == state {
                return Some(n);
            }
        }
        None
    }

    /// Enable in cyclic synchronous velocity and wait for OP_ENABLED.
    pub fn enable(&mut self) {
        self.service.submit(DriveCommand::Enable(OpMode::CyclicSyncVelocity));
        assert!(self.run_until(CiaState::OpEnabled, 10).is_some());
    }

    pub fn sim(&mut self) -> &mut SimulatedDrive {
        self.bus.drive_mut(DRIVE).unwrap()
    }

    /// Every event logged so far.
    pub fn events(&mut self) -> Vec<LogEvent> {
        self.log_service.drain(&mut self.sink);
        self.sink.events()
    }

    pub fn events_of(&mut self, kind: LogMsgType) -> Vec<LogEvent> {
        self.log_service.drain(&mut self.sink);
        self.sink.of_kind(kind)
    }
}
