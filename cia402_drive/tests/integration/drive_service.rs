//! Integration test: network drive service cycles on the simulated bus.
//!
//! Covers enable, fault handling, overrun escalation, the startup object
//! dictionary read, optional collaborators and PDO type errors.

use std::sync::Arc;

use cia402_common::cia402::{CiaState, Controlword, OpMode};
use cia402_common::consts::od;
use cia402_common::error::{DriveErrorFlags, PdoError};
use cia402_common::log::LogMsgType;
use cia402_common::profile::ProfilerConfig;
use cia402_common::slave::SlaveType;
use cia402_drive::control::SlopeTorqueControl;
use cia402_drive::error::DriveError;
use cia402_drive::interfaces::{
    Feedback, FeedbackSample, MotionControl, PositionFeedback, Setpoints,
};
use cia402_drive::pdo::SharedImage;
use cia402_drive::service::{Collaborators, DriveCommand, ServiceOptions};
use cia402_drive::sim::InMemoryObjectDictionary;
use parking_lot::Mutex;

use super::common::{DRIVE, FixedSensor, IO, Rig, RigOptions, collaborators};

/// Motion control that records every feedback it is handed.
#[derive(Clone, Default)]
struct RecordingMotion {
    seen: Arc<Mutex<Vec<Feedback>>>,
}

impl MotionControl for RecordingMotion {
    fn enable(&mut self, _mode: OpMode) {}

    fn disable(&mut self) {}

    fn update(&mut self, demand: &Setpoints, feedback: &Feedback) -> Setpoints {
        self.seen.lock().push(*feedback);
        *demand
    }
}

fn messages(rig: &mut Rig, kind: LogMsgType) -> Vec<String> {
    rig.events_of(kind)
        .into_iter()
        .map(|e| e.message.as_str().to_string())
        .collect()
}

// ── Enable & motion ─────────────────────────────────────────────────

#[test]
fn velocity_command_enables_and_ramps() {
    let mut rig = Rig::new();
    rig.service.submit(DriveCommand::ProfileVelocity(800));
    assert_eq!(rig.run_until(CiaState::OpEnabled, 10), Some(4));

    rig.run(50);
    let status = rig.service.status();
    assert_eq!(status.opmode, OpMode::CyclicSyncVelocity);
    assert_eq!(status.goal, CiaState::OpEnabled);
    let v = status.last_output.target_velocity as i32;
    assert!(v > 0 && v <= 800, "velocity {v}");
    assert!(status.errors.is_empty());

    let commands = messages(&mut rig, LogMsgType::Command);
    assert_eq!(commands, ["VELOCITY"]);
    let data = messages(&mut rig, LogMsgType::Data);
    assert!(data.iter().any(|m| m == "SWITCHED_ON -> OP_ENABLED"));
}

#[test]
fn outputs_written_as_one_struct() {
    let mut rig = Rig::new();
    rig.enable();
    rig.service.submit(DriveCommand::SetUserOutputs([10, 20, 30, 40]));
    let report = rig.step().unwrap();

    let written = rig.image.lock().get_output(DRIVE).unwrap();
    assert_eq!(written, report.output);
    assert_eq!(written.user_out_3, 30);
    assert_eq!(written.opmode, OpMode::CyclicSyncVelocity.to_pdo());
}

#[test]
fn position_target_clamped_to_limits() {
    let profile = ProfilerConfig {
        max_position: 1000,
        min_position: -1000,
        ..Default::default()
    };
    let mut rig = Rig::with(RigOptions {
        profile,
        ..Default::default()
    });
    rig.service.submit(DriveCommand::ProfilePosition(5000));
    rig.run(400);

    let status = rig.service.status();
    assert!(status.errors.contains(DriveErrorFlags::POSITION_LIMIT));
    assert!(!status.errors.has_critical());
    assert!(status.last_output.target_position as i32 <= 1000);
    assert!(
        messages(&mut rig, LogMsgType::Error)
            .iter()
            .any(|m| m.starts_with("LIMIT"))
    );
}

#[test]
fn periodic_snapshot_every_half_second() {
    let mut rig = Rig::new();
    rig.run(1001);
    let snapshots = messages(&mut rig, LogMsgType::Data)
        .into_iter()
        .filter(|m| m.contains(" p="))
        .count();
    // First cycle, then at +500 ms and +1000 ms.
    assert_eq!(snapshots, 3);
}

// ── Fault handling ──────────────────────────────────────────────────

#[test]
fn drive_fault_latches_and_rejects_motion() {
    let mut rig = Rig::new();
    rig.enable();
    rig.sim().inject_fault();
    let report = rig.step().unwrap();
    assert!(report.transitioned());
    assert_eq!(report.previous, CiaState::OpEnabled);

    let status = rig.service.status();
    assert_eq!(status.state, CiaState::Fault);
    assert!(status.errors.contains(DriveErrorFlags::DRIVE_FAULT));
    assert_eq!(status.goal, CiaState::SwitchOnDisabled);

    rig.service.submit(DriveCommand::QuickStop);
    rig.step().unwrap();
    rig.service.submit(DriveCommand::ProfileVelocity(100));
    rig.step().unwrap();

    let status = rig.service.status();
    assert_eq!(status.state, CiaState::Fault);
    assert!(status.errors.contains(DriveErrorFlags::TRANSITION_REJECTED));

    let errors = messages(&mut rig, LogMsgType::Error);
    assert!(errors.iter().any(|m| m.starts_with("FAULT sw=")));
    assert!(errors.iter().any(|m| m == "invalid transition FAULT -> QUICK_STOP"));
    assert!(errors.iter().any(|m| m == "REJECT VELOCITY in FAULT"));
}

#[test]
fn fault_reset_recovers_and_allows_enable() {
    let mut rig = Rig::new();
    rig.enable();
    rig.sim().inject_fault();
    rig.step().unwrap();

    rig.service.submit(DriveCommand::FaultReset);
    let report = rig.step().unwrap();
    assert!(
        Controlword::from_bits_truncate(report.output.controlword as u16)
            .contains(Controlword::FAULT_RESET)
    );
    assert_eq!(rig.run_until(CiaState::SwitchOnDisabled, 3), Some(1));
    let status = rig.service.status();
    assert!(status.errors.is_empty());
    assert!(!status.controlword.contains(Controlword::FAULT_RESET));

    rig.service.submit(DriveCommand::ProfileVelocity(200));
    assert!(rig.run_until(CiaState::OpEnabled, 10).is_some());
}

#[test]
fn fault_reset_retried_while_cause_present() {
    let bit7 =
        |cw: u32| Controlword::from_bits_truncate(cw as u16).contains(Controlword::FAULT_RESET);
    let mut rig = Rig::new();
    rig.enable();
    rig.sim().inject_fault();
    rig.sim().set_fault_cause(true);
    rig.step().unwrap();

    rig.service.submit(DriveCommand::FaultReset);
    assert!(bit7(rig.step().unwrap().output.controlword));
    rig.run(3);
    let status = rig.service.status();
    assert_eq!(status.state, CiaState::Fault);
    assert!(bit7(status.last_output.controlword));

    // Cause gone; a second reset must produce a fresh edge.
    rig.sim().set_fault_cause(false);
    rig.service.submit(DriveCommand::FaultReset);
    let low = rig.step().unwrap();
    assert_eq!(low.state, CiaState::Fault);
    assert!(!bit7(low.output.controlword));
    assert!(bit7(rig.step().unwrap().output.controlword));

    assert_eq!(rig.run_until(CiaState::SwitchOnDisabled, 3), Some(1));
    assert!(!bit7(rig.service.status().last_output.controlword));
}

// ── Overrun ─────────────────────────────────────────────────────────

#[test]
fn overrun_escalates_to_quick_stop() {
    let mut rig = Rig::new();
    rig.service.submit(DriveCommand::ProfileVelocity(1000));
    assert!(rig.run_until(CiaState::OpEnabled, 10).is_some());
    rig.run(100);

    let now = rig.now_ns;
    rig.service.handle_overrun(1_500_000, 1_000_000, now);
    let status = rig.service.status();
    assert_eq!(status.goal, CiaState::QuickStop);
    assert_eq!(status.overruns, 1);
    assert!(status.errors.has_critical());

    assert_eq!(rig.run_until(CiaState::QuickStop, 3), Some(2));
    let errors = messages(&mut rig, LogMsgType::Error);
    assert_eq!(errors, ["OVERRUN 1500us > 1000us"]);

    // Latched until cleared.
    rig.service.submit(DriveCommand::ProfileVelocity(100));
    rig.run(5);
    assert_eq!(rig.service.status().state, CiaState::QuickStop);
    assert!(
        rig.service
            .status()
            .errors
            .contains(DriveErrorFlags::TRANSITION_REJECTED)
    );

    rig.service.submit(DriveCommand::FaultReset);
    rig.step().unwrap();
    rig.service.submit(DriveCommand::ProfileVelocity(100));
    assert!(rig.run_until(CiaState::OpEnabled, 3).is_some());
}

#[test]
fn overrun_while_disabled_stays_disabled() {
    let mut rig = Rig::new();
    rig.run(3);
    let now = rig.now_ns;
    rig.service.handle_overrun(2_000_000, 1_000_000, now);
    rig.run(3);

    let status = rig.service.status();
    assert_eq!(status.goal, CiaState::SwitchOnDisabled);
    assert_eq!(status.state, CiaState::SwitchOnDisabled);
    assert!(status.errors.contains(DriveErrorFlags::CYCLE_OVERRUN));
}

// ── Startup object dictionary read ──────────────────────────────────

fn persisted() -> ProfilerConfig {
    ProfilerConfig {
        max_profile_velocity: 3000,
        profile_velocity: 1200,
        profile_acceleration: 1000,
        profile_deceleration: 900,
        quick_stop_deceleration: 2000,
        max_torque: 200,
        torque_slope: 50,
        polarity: -1,
        ..Default::default()
    }
}

fn with_od(od: InMemoryObjectDictionary, startup_read_od: bool) -> Rig {
    Rig::with(RigOptions {
        od,
        options: ServiceOptions {
            startup_read_od,
            ..Default::default()
        },
        ..Default::default()
    })
}

#[test]
fn startup_read_overrides_profile() {
    let mut rig = with_od(InMemoryObjectDictionary::with_profile(&persisted()), true);
    assert_eq!(rig.service.profiler_config(), &ProfilerConfig::default());
    rig.step().unwrap();

    let cfg = rig.service.profiler_config();
    let want = persisted();
    assert_eq!(cfg.max_profile_velocity, want.max_profile_velocity);
    assert_eq!(cfg.profile_velocity, want.profile_velocity);
    assert_eq!(cfg.profile_acceleration, want.profile_acceleration);
    assert_eq!(cfg.profile_deceleration, want.profile_deceleration);
    assert_eq!(cfg.quick_stop_deceleration, want.quick_stop_deceleration);
    assert_eq!(cfg.max_torque, want.max_torque);
    assert_eq!(cfg.torque_slope, want.torque_slope);
    assert_eq!(cfg.polarity, -1);
    assert!(rig.service.status().errors.is_empty());
}

#[test]
fn startup_read_disabled_keeps_configuration() {
    let mut rig = with_od(InMemoryObjectDictionary::with_profile(&persisted()), false);
    rig.step().unwrap();
    assert_eq!(rig.service.profiler_config(), &ProfilerConfig::default());
}

#[test]
fn missing_od_entry_keeps_default_and_flags() {
    let p = persisted();
    let od = InMemoryObjectDictionary::new()
        .with_entry(od::POLARITY, 0, 0)
        .with_entry(od::MAX_PROFILE_VELOCITY, 0, p.max_profile_velocity)
        .with_entry(od::PROFILE_VELOCITY, 0, p.profile_velocity)
        .with_entry(od::PROFILE_ACCELERATION, 0, p.profile_acceleration)
        .with_entry(od::PROFILE_DECELERATION, 0, p.profile_deceleration)
        .with_entry(od::QUICK_STOP_DECELERATION, 0, p.quick_stop_deceleration)
        .with_entry(od::MAX_TORQUE, 0, p.max_torque);
    let mut rig = with_od(od, true);
    rig.step().unwrap();

    let cfg = rig.service.profiler_config();
    assert_eq!(cfg.profile_velocity, 1200);
    assert_eq!(cfg.torque_slope, ProfilerConfig::default().torque_slope);
    let errors = rig.service.status().errors;
    assert!(errors.contains(DriveErrorFlags::OD_READ_FAILED));
    assert!(!errors.has_critical());
    assert_eq!(
        messages(&mut rig, LogMsgType::Error),
        ["OD read: 1 entries kept default"]
    );

    // Non-critical: the drive still enables.
    rig.service.submit(DriveCommand::ProfileVelocity(100));
    assert!(rig.run_until(CiaState::OpEnabled, 10).is_some());
}

#[test]
fn inconsistent_persisted_profile_rejected() {
    let bad = ProfilerConfig {
        profile_velocity: 5000,
        ..persisted()
    };
    let mut rig = with_od(InMemoryObjectDictionary::with_profile(&bad), true);
    rig.step().unwrap();
    assert_eq!(rig.service.profiler_config(), &ProfilerConfig::default());
    assert!(
        rig.service
            .status()
            .errors
            .contains(DriveErrorFlags::OD_READ_FAILED)
    );
}

// ── Optional collaborators ──────────────────────────────────────────

type Builder = Box<dyn FnOnce(&SharedImage) -> Collaborators>;

fn recording(recorder: &RecordingMotion) -> Builder {
    let recorder = recorder.clone();
    Box::new(move |image: &SharedImage| {
        let mut c = collaborators(image, DRIVE, InMemoryObjectDictionary::new());
        c.motion_control = Box::new(recorder);
        c
    })
}

#[test]
fn missing_second_feedback_is_not_an_error() {
    let recorder = RecordingMotion::default();
    let mut rig = Rig::with(RigOptions {
        collaborators: Some(recording(&recorder)),
        ..Default::default()
    });
    rig.service.submit(DriveCommand::ProfileVelocity(100));
    assert!(rig.run_until(CiaState::OpEnabled, 10).is_some());
    rig.run(5);

    let seen = recorder.seen.lock().clone();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|f| f.secondary.is_none()));
}

#[test]
fn second_feedback_reaches_motion_control() {
    let sample = FeedbackSample {
        position: 42,
        velocity: -3,
    };
    let sensor: Box<dyn PositionFeedback> = Box::new(FixedSensor(sample));
    let recorder = RecordingMotion::default();
    let mut rig = Rig::with(RigOptions {
        collaborators: Some(recording(&recorder)),
        feedback_2: Some(sensor),
        ..Default::default()
    });
    rig.run(3);

    let seen = recorder.seen.lock().clone();
    assert_eq!(seen.last().and_then(|f| f.secondary), Some(sample));
}

#[test]
fn torque_control_is_replaceable() {
    let limited: Builder = Box::new(|image: &SharedImage| {
        let mut c = collaborators(image, DRIVE, InMemoryObjectDictionary::new());
        c.torque_control = Box::new(SlopeTorqueControl::new(10));
        c
    });
    let mut rig = Rig::with(RigOptions {
        collaborators: Some(limited),
        ..Default::default()
    });
    rig.service.submit(DriveCommand::ProfileTorque(200));
    assert!(rig.run_until(CiaState::OpEnabled, 10).is_some());
    rig.run(200);
    assert!(rig.service.status().last_output.target_torque as i32 <= 10);
}

// ── PDO errors ──────────────────────────────────────────────────────

#[test]
fn service_on_terminal_slave_reports_type_mismatch() {
    let terminal: Builder =
        Box::new(|image: &SharedImage| collaborators(image, IO, InMemoryObjectDictionary::new()));
    let mut rig = Rig::with(RigOptions {
        collaborators: Some(terminal),
        ..Default::default()
    });
    let before = rig.image.lock().output_image().to_vec();

    let err = rig.step().unwrap_err();
    assert_eq!(
        err,
        DriveError::Pdo(PdoError::TypeMismatch {
            slave: IO,
            actual: SlaveType::DigitalIo,
        })
    );
    assert!(
        rig.service
            .status()
            .errors
            .contains(DriveErrorFlags::PDO_TYPE_MISMATCH)
    );
    assert_eq!(rig.image.lock().output_image(), before.as_slice());
    assert!(
        messages(&mut rig, LogMsgType::Error)
            .iter()
            .any(|m| m.starts_with("PDO slave 1"))
    );
}
