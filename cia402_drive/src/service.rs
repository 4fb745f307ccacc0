//! Network drive service.
//!
//! One instance runs per CiA 402 drive, once per cycle:
//!
//! ```text
//! read PdoInput ─► decode state ─► pending command ─► next hop toward goal
//!      │                                                   │
//!      └─► feedback (PDO + sensors) ─► profiler ─► motion/torque control
//!                                                          │
//!                       one bulk write of PdoOutput ◄──────┘
//! ```
//!
//! Collaborators are injected as trait objects. The optional second position
//! sensor and the logger are `Option`s resolved once at construction.

use core::fmt::Write as _;
use std::time::Duration;

use cia402_common::cia402::{CiaState, Controlword, OpMode, Statusword};
use cia402_common::consts::{LOG_DATA_INTERVAL_NS, od};
use cia402_common::error::{DriveErrorFlags, PdoError, TransitionError};
use cia402_common::log::LogMsgType;
use cia402_common::pdo::{PdoInput, PdoOutput};
use cia402_common::prelude::DEFAULT_CYCLE_TIME;
use cia402_common::profile::ProfilerConfig;
use heapless::String;
use tracing::{debug, error, info, warn};

use crate::error::DriveError;
use crate::interfaces::{
    DataLogging, Feedback, FeedbackSample, MotionControl, ObjectDictionary, PdoExchange,
    PositionFeedback, Setpoints, TorqueControl,
};
use crate::profile::Profiler;
use crate::state::cia402::{Cia402StateMachine, next_hop};

/// Scratch buffer for log lines; events truncate to their own limit.
type LogLine = String<128>;

// ─── Construction ───────────────────────────────────────────────────

/// Mandatory collaborators of a drive.
pub struct Collaborators {
    pub pdo: Box<dyn PdoExchange>,
    pub od: Box<dyn ObjectDictionary>,
    pub torque_control: Box<dyn TorqueControl>,
    pub motion_control: Box<dyn MotionControl>,
    pub feedback_1: Box<dyn PositionFeedback>,
}

/// Runtime options fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Read persisted profile values from the object dictionary before the
    /// first cycle. Defaults to the `startup-read-od` feature.
    pub startup_read_od: bool,
    /// Cycle period the profiler integrates over.
    pub cycle_time: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            startup_read_od: cfg!(feature = "startup-read-od"),
            cycle_time: DEFAULT_CYCLE_TIME,
        }
    }
}

// ─── Commands & Status ──────────────────────────────────────────────

/// Commands accepted by [`NetworkDriveService::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveCommand {
    /// Enable the drive in a mode and hold the current position.
    Enable(OpMode),
    /// Cyclic synchronous position toward a target.
    ProfilePosition(i32),
    /// Cyclic synchronous velocity toward a target.
    ProfileVelocity(i32),
    /// Cyclic synchronous torque toward a target.
    ProfileTorque(i32),
    /// Run the drive's homing method.
    Home,
    QuickStop,
    /// Walk back to SWITCH_ON_DISABLED.
    Disable,
    /// Clear latched errors and reset a drive fault.
    FaultReset,
    /// Applied immediately; not queued.
    SetUserOutputs([u32; 4]),
}

impl DriveCommand {
    fn name(&self) -> &'static str {
        match self {
            Self::Enable(_) => "ENABLE",
            Self::ProfilePosition(_) => "POSITION",
            Self::ProfileVelocity(_) => "VELOCITY",
            Self::ProfileTorque(_) => "TORQUE",
            Self::Home => "HOME",
            Self::QuickStop => "QUICK_STOP",
            Self::Disable => "DISABLE",
            Self::FaultReset => "FAULT_RESET",
            Self::SetUserOutputs(_) => "USER_OUT",
        }
    }
}

/// Motion target being profiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Hold,
    Position(i32),
    Velocity(i32),
    Torque(i32),
    Homing,
}

/// Diagnostic snapshot of one drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveStatus {
    pub slave: u16,
    pub state: CiaState,
    pub goal: CiaState,
    pub opmode: OpMode,
    pub errors: DriveErrorFlags,
    pub controlword: Controlword,
    pub last_input: PdoInput,
    pub last_output: PdoOutput,
    pub cycles: u64,
    pub overruns: u64,
}

/// Outcome of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub previous: CiaState,
    pub state: CiaState,
    pub output: PdoOutput,
}

impl CycleReport {
    pub fn transitioned(&self) -> bool {
        self.previous != self.state
    }
}

// ─── Service ────────────────────────────────────────────────────────

/// Per-drive cyclic service.
pub struct NetworkDriveService {
    pdo: Box<dyn PdoExchange>,
    od: Box<dyn ObjectDictionary>,
    torque_control: Box<dyn TorqueControl>,
    motion_control: Box<dyn MotionControl>,
    feedback_1: Box<dyn PositionFeedback>,
    feedback_2: Option<Box<dyn PositionFeedback>>,
    logger: Option<Box<dyn DataLogging>>,

    options: ServiceOptions,
    configured: ProfilerConfig,
    profiler: Profiler,
    sm: Cia402StateMachine,

    goal: CiaState,
    opmode: OpMode,
    target: Target,
    pending: Option<DriveCommand>,
    user_outputs: [u32; 4],
    controls_enabled: bool,

    errors: DriveErrorFlags,
    started: bool,
    cycles: u64,
    overruns: u64,
    last_input: PdoInput,
    last_output: PdoOutput,
    last_data_log_ns: Option<u64>,
}

impl NetworkDriveService {
    /// Full service: optional second feedback source and logging.
    pub fn production(
        profiler: &ProfilerConfig,
        collaborators: Collaborators,
        feedback_2: Option<Box<dyn PositionFeedback>>,
        logger: Box<dyn DataLogging>,
        options: ServiceOptions,
    ) -> Self {
        Self::build(profiler, collaborators, feedback_2, Some(logger), options)
    }

    /// Debug service: no second feedback source, no logging dispatch.
    pub fn debug(
        profiler: &ProfilerConfig,
        collaborators: Collaborators,
        options: ServiceOptions,
    ) -> Self {
        Self::build(profiler, collaborators, None, None, options)
    }

    fn build(
        profiler: &ProfilerConfig,
        c: Collaborators,
        feedback_2: Option<Box<dyn PositionFeedback>>,
        logger: Option<Box<dyn DataLogging>>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            pdo: c.pdo,
            od: c.od,
            torque_control: c.torque_control,
            motion_control: c.motion_control,
            feedback_1: c.feedback_1,
            feedback_2,
            logger,
            options,
            configured: profiler.clone(),
            profiler: Profiler::new(profiler.clone(), options.cycle_time),
            sm: Cia402StateMachine::new(),
            goal: CiaState::SwitchOnDisabled,
            opmode: OpMode::NoMode,
            target: Target::Hold,
            pending: None,
            user_outputs: [0; 4],
            controls_enabled: false,
            errors: DriveErrorFlags::empty(),
            started: false,
            cycles: 0,
            overruns: 0,
            last_input: PdoInput::default(),
            last_output: PdoOutput::default(),
            last_data_log_ns: None,
        }
    }

    #[inline]
    pub fn slave_id(&self) -> u16 {
        self.pdo.slave_id()
    }

    /// Profile in effect (after the startup object dictionary read).
    pub fn profiler_config(&self) -> &ProfilerConfig {
        self.profiler.config()
    }

    /// Queue a command for the next cycle. A newer command replaces an
    /// unprocessed one.
    pub fn submit(&mut self, command: DriveCommand) {
        if let DriveCommand::SetUserOutputs(values) = command {
            self.user_outputs = values;
            return;
        }
        self.pending = Some(command);
    }

    pub fn status(&self) -> DriveStatus {
        DriveStatus {
            slave: self.slave_id(),
            state: self.sm.state(),
            goal: self.goal,
            opmode: self.opmode,
            errors: self.errors,
            controlword: self.sm.controlword(),
            last_input: self.last_input,
            last_output: self.last_output,
            cycles: self.cycles,
            overruns: self.overruns,
        }
    }

    /// Run one cycle.
    ///
    /// PDO errors abort the cycle before anything is written. Rejected
    /// transitions are flagged and logged but do not abort.
    pub fn cycle(&mut self, now_ns: u64) -> Result<CycleReport, DriveError> {
        if !self.started {
            self.startup(now_ns);
        }
        self.cycles += 1;

        let input = match self.pdo.read_inputs() {
            Ok(input) => input,
            Err(e) => {
                self.reject_pdo(e, now_ns);
                return Err(e.into());
            }
        };
        self.last_input = input;

        let previous = self.sm.state();
        let state = self.sm.update(input.statusword as u16);
        let feedback = self.feedback(&input, state);
        if state != previous {
            self.on_state_change(previous, state, input.statusword, &feedback, now_ns);
        }

        if let Some(command) = self.pending.take() {
            self.apply_command(command, now_ns);
        }
        self.check_homing(&input, now_ns);

        if let Some(hop) = next_hop(state, self.goal) {
            if let Err(e) = self.sm.request(hop) {
                self.reject_transition(e, now_ns);
            }
        }
        self.sm.set_mode_bits(
            Controlword::NEW_SETPOINT,
            self.target == Target::Homing && state == CiaState::OpEnabled,
        );

        let setpoints = self.setpoints(&feedback);
        let output = self.output(&setpoints);
        if let Err(e) = self.pdo.write_outputs(&output) {
            self.reject_pdo(e, now_ns);
            return Err(e.into());
        }
        self.last_output = output;

        self.log_data_snapshot(&feedback, now_ns);

        Ok(CycleReport {
            previous,
            state,
            output,
        })
    }

    /// React to a cycle that exceeded its period.
    ///
    /// Escalates toward QUICK_STOP (or SWITCH_ON_DISABLED when not enabled)
    /// and drops any pending motion. Outputs are left alone until the next
    /// full cycle.
    pub fn handle_overrun(&mut self, actual_ns: i64, budget_ns: i64, now_ns: u64) {
        self.overruns += 1;
        self.errors |= DriveErrorFlags::CYCLE_OVERRUN;
        self.goal = if self.sm.state() == CiaState::OpEnabled {
            CiaState::QuickStop
        } else {
            CiaState::SwitchOnDisabled
        };
        self.target = Target::Hold;
        self.pending = None;

        error!(
            slave = self.slave_id(),
            actual_ns,
            budget_ns,
            goal = %self.goal,
            "cycle overrun"
        );
        let mut line = LogLine::new();
        let _ = write!(line, "OVERRUN {}us > {}us", actual_ns / 1000, budget_ns / 1000);
        self.log(LogMsgType::Error, &line, now_ns);
    }

    // ─── Cycle phases ───────────────────────────────────────────────

    fn startup(&mut self, now_ns: u64) {
        self.started = true;
        info!(
            slave = self.slave_id(),
            read_od = self.options.startup_read_od,
            "drive service starting"
        );
        if !self.options.startup_read_od {
            return;
        }

        let mut cfg = self.configured.clone();
        let mut failed = 0u32;
        let mut polarity = None;
        {
            let mut read = |index: u16| match self.od.read(index, 0) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(index, error = %e, "object dictionary read failed");
                    None
                }
            };
            let entries = [
                (od::MAX_PROFILE_VELOCITY, &mut cfg.max_profile_velocity),
                (od::PROFILE_VELOCITY, &mut cfg.profile_velocity),
                (od::PROFILE_ACCELERATION, &mut cfg.profile_acceleration),
                (od::PROFILE_DECELERATION, &mut cfg.profile_deceleration),
                (od::QUICK_STOP_DECELERATION, &mut cfg.quick_stop_deceleration),
                (od::MAX_TORQUE, &mut cfg.max_torque),
                (od::TORQUE_SLOPE, &mut cfg.torque_slope),
            ];
            for (index, slot) in entries {
                match read(index) {
                    Some(value) => *slot = value,
                    None => failed += 1,
                }
            }
            match read(od::POLARITY) {
                // Position or velocity inversion bit set.
                Some(value) => polarity = Some(if value & 0xC0 != 0 { -1 } else { 1 }),
                None => failed += 1,
            }
        }
        if let Some(polarity) = polarity {
            cfg.polarity = polarity;
        }

        // Accelerations read from the drive may exceed the configured ceiling.
        cfg.max_acceleration = cfg.max_acceleration.max(cfg.profile_acceleration);

        if let Err(reason) = cfg.validate() {
            warn!(%reason, "persisted profile rejected, keeping configured values");
            failed += 1;
            cfg = self.configured.clone();
        }
        if failed > 0 {
            self.errors |= DriveErrorFlags::OD_READ_FAILED;
            let mut line = LogLine::new();
            let _ = write!(line, "OD read: {failed} entries kept default");
            self.log(LogMsgType::Error, &line, now_ns);
        }
        self.profiler = Profiler::new(cfg, self.options.cycle_time);
    }

    fn polarity(&self) -> i32 {
        i32::from(self.profiler.config().polarity)
    }

    fn feedback(&mut self, input: &PdoInput, state: CiaState) -> Feedback {
        let pol = self.polarity();
        let scale = |s: FeedbackSample| FeedbackSample {
            position: s.position.wrapping_mul(pol),
            velocity: s.velocity.wrapping_mul(pol),
        };
        let primary = scale(self.feedback_1.read());
        let secondary = self.feedback_2.as_mut().map(|f| scale(f.read()));

        Feedback {
            state,
            opmode_display: OpMode::from_pdo(input.opmode_display),
            position: (input.actual_position as i32).wrapping_mul(pol),
            velocity: (input.actual_velocity as i32).wrapping_mul(pol),
            torque: (input.actual_torque as i32).wrapping_mul(pol),
            primary,
            secondary,
        }
    }

    fn on_state_change(
        &mut self,
        from: CiaState,
        to: CiaState,
        statusword: u32,
        feedback: &Feedback,
        now_ns: u64,
    ) {
        let mut line = LogLine::new();

        if to.is_fault() {
            self.errors |= DriveErrorFlags::DRIVE_FAULT;
            self.target = Target::Hold;
            self.goal = CiaState::SwitchOnDisabled;
            self.set_controls(false, feedback);
            error!(slave = self.slave_id(), %from, %to, statusword, "drive fault");
            let _ = write!(line, "{to} sw={:#06x}", statusword as u16);
            self.log(LogMsgType::Error, &line, now_ns);
            return;
        }

        debug!(slave = self.slave_id(), %from, %to, "state transition");
        self.set_controls(to == CiaState::OpEnabled, feedback);
        let _ = write!(line, "{from} -> {to}");
        self.log(LogMsgType::Data, &line, now_ns);
    }

    fn set_controls(&mut self, enable: bool, feedback: &Feedback) {
        if enable == self.controls_enabled {
            return;
        }
        self.controls_enabled = enable;
        if enable {
            self.profiler
                .reset(feedback.position, feedback.velocity, feedback.torque);
            self.motion_control.enable(self.opmode);
            self.torque_control.enable();
        } else {
            self.motion_control.disable();
            self.torque_control.disable();
        }
    }

    fn apply_command(&mut self, command: DriveCommand, now_ns: u64) {
        let state = self.sm.state();

        match command {
            DriveCommand::QuickStop => {
                if state == CiaState::OpEnabled || state == CiaState::QuickStop || state.is_fault() {
                    match self.sm.request(CiaState::QuickStop) {
                        Ok(_) => self.goal = CiaState::QuickStop,
                        Err(e) => return self.reject_transition(e, now_ns),
                    }
                } else {
                    self.goal = CiaState::SwitchOnDisabled;
                }
                self.target = Target::Hold;
            }
            DriveCommand::Disable => {
                self.goal = CiaState::SwitchOnDisabled;
                self.target = Target::Hold;
            }
            DriveCommand::FaultReset => {
                self.errors = DriveErrorFlags::empty();
                if state == CiaState::Fault {
                    if let Err(e) = self.sm.request_fault_reset() {
                        return self.reject_transition(e, now_ns);
                    }
                }
            }
            DriveCommand::SetUserOutputs(values) => self.user_outputs = values,
            DriveCommand::Enable(_)
            | DriveCommand::ProfilePosition(_)
            | DriveCommand::ProfileVelocity(_)
            | DriveCommand::ProfileTorque(_)
            | DriveCommand::Home => {
                if state.is_fault() || self.errors.has_critical() {
                    self.errors |= DriveErrorFlags::TRANSITION_REJECTED;
                    warn!(
                        slave = self.slave_id(),
                        command = command.name(),
                        %state,
                        errors = ?self.errors,
                        "motion command rejected"
                    );
                    let mut line = LogLine::new();
                    let _ = write!(line, "REJECT {} in {state}", command.name());
                    self.log(LogMsgType::Error, &line, now_ns);
                    return;
                }
                self.accept_motion(command, now_ns);
            }
        }

        let mut line = LogLine::new();
        let _ = write!(line, "{}", command.name());
        self.log(LogMsgType::Command, &line, now_ns);
    }

    fn accept_motion(&mut self, command: DriveCommand, now_ns: u64) {
        let (mode, target) = match command {
            DriveCommand::Enable(mode) => (mode, Target::Hold),
            DriveCommand::ProfilePosition(position) => {
                let (position, clamped) = self.profiler.clamp_position(position);
                if clamped {
                    self.errors |= DriveErrorFlags::POSITION_LIMIT;
                    warn!(slave = self.slave_id(), position, "position target clamped");
                    let mut line = LogLine::new();
                    let _ = write!(line, "LIMIT position clamped to {position}");
                    self.log(LogMsgType::Error, &line, now_ns);
                }
                (OpMode::CyclicSyncPosition, Target::Position(position))
            }
            DriveCommand::ProfileVelocity(velocity) => {
                (OpMode::CyclicSyncVelocity, Target::Velocity(velocity))
            }
            DriveCommand::ProfileTorque(torque) => {
                (OpMode::CyclicSyncTorque, Target::Torque(torque))
            }
            DriveCommand::Home => (OpMode::Homing, Target::Homing),
            _ => return,
        };

        if mode != self.opmode {
            self.opmode = mode;
            if self.controls_enabled {
                self.motion_control.enable(mode);
                let p = self.profiler.position();
                self.profiler.reset(p, 0, 0);
            }
        }
        self.target = target;
        self.goal = CiaState::OpEnabled;
    }

    fn check_homing(&mut self, input: &PdoInput, now_ns: u64) {
        if self.target != Target::Homing || self.opmode != OpMode::Homing {
            return;
        }
        let sw = Statusword::from_pdo(input.statusword);
        if sw.contains(Statusword::OP_MODE_SPECIFIC_1 | Statusword::TARGET_REACHED) {
            info!(slave = self.slave_id(), "homing attained");
            self.target = Target::Hold;
            self.profiler.reset(0, 0, 0);
            self.log(LogMsgType::Data, "HOMED", now_ns);
        }
    }

    fn setpoints(&mut self, feedback: &Feedback) -> Setpoints {
        let state = self.sm.state();

        let demand = if state == CiaState::QuickStop
            || (state == CiaState::OpEnabled && self.goal == CiaState::QuickStop)
        {
            let velocity = self.profiler.step_quick_stop();
            Setpoints {
                position: self.profiler.position(),
                velocity,
                torque: 0,
            }
        } else if state != CiaState::OpEnabled {
            // Targets track actual values until the drive is enabled.
            self.profiler
                .reset(feedback.position, feedback.velocity, feedback.torque);
            Setpoints {
                position: feedback.position,
                velocity: 0,
                torque: 0,
            }
        } else {
            match self.target {
                Target::Position(target) => {
                    let position = self.profiler.step_position(target);
                    Setpoints {
                        position,
                        velocity: self.profiler.velocity(),
                        torque: 0,
                    }
                }
                Target::Velocity(target) => {
                    let velocity = self.profiler.step_velocity(target);
                    Setpoints {
                        position: self.profiler.position(),
                        velocity,
                        torque: 0,
                    }
                }
                Target::Torque(target) => Setpoints {
                    position: feedback.position,
                    velocity: feedback.velocity,
                    torque: self.profiler.step_torque(target),
                },
                Target::Hold if self.opmode.is_velocity() => {
                    let velocity = self.profiler.step_velocity(0);
                    Setpoints {
                        position: self.profiler.position(),
                        velocity,
                        torque: 0,
                    }
                }
                Target::Hold if self.opmode.is_torque() => Setpoints {
                    position: feedback.position,
                    velocity: feedback.velocity,
                    torque: self.profiler.step_torque(0),
                },
                Target::Hold | Target::Homing => Setpoints {
                    position: self.profiler.position(),
                    velocity: 0,
                    torque: 0,
                },
            }
        };

        let mut setpoints = self.motion_control.update(&demand, feedback);
        setpoints.torque = self.torque_control.update(demand.torque, feedback);
        setpoints
    }

    fn output(&self, setpoints: &Setpoints) -> PdoOutput {
        let pol = self.polarity();
        let mut output = PdoOutput {
            controlword: u32::from(self.sm.controlword().bits()),
            opmode: self.opmode.to_pdo(),
            target_position: setpoints.position.wrapping_mul(pol) as u32,
            target_velocity: setpoints.velocity.wrapping_mul(pol) as u32,
            target_torque: setpoints.torque.wrapping_mul(pol) as u32,
            ..Default::default()
        };
        output.set_user_outputs(self.user_outputs);
        output
    }

    // ─── Reporting ──────────────────────────────────────────────────

    fn log_data_snapshot(&mut self, feedback: &Feedback, now_ns: u64) {
        let due = self
            .last_data_log_ns
            .is_none_or(|last| now_ns.saturating_sub(last) >= LOG_DATA_INTERVAL_NS);
        if !due {
            return;
        }
        self.last_data_log_ns = Some(now_ns);

        let mut line = LogLine::new();
        let _ = write!(
            line,
            "{} p={} v={} t={}",
            feedback.state, feedback.position, feedback.velocity, feedback.torque
        );
        self.log(LogMsgType::Data, &line, now_ns);
    }

    fn reject_pdo(&mut self, e: PdoError, now_ns: u64) {
        if matches!(e, PdoError::TypeMismatch { .. }) {
            self.errors |= DriveErrorFlags::PDO_TYPE_MISMATCH;
        }
        warn!(error = %e, "PDO access rejected");
        let mut line = LogLine::new();
        let _ = write!(line, "PDO {e}");
        self.log(LogMsgType::Error, &line, now_ns);
    }

    fn reject_transition(&mut self, e: TransitionError, now_ns: u64) {
        self.errors |= DriveErrorFlags::TRANSITION_REJECTED;
        warn!(slave = self.slave_id(), error = %e, "transition rejected");
        let mut line = LogLine::new();
        let _ = write!(line, "{e}");
        self.log(LogMsgType::Error, &line, now_ns);
    }

    fn log(&self, kind: LogMsgType, msg: &str, now_ns: u64) {
        let Some(logger) = &self.logger else {
            return;
        };
        match kind {
            LogMsgType::Command => logger.log_user_command(msg, now_ns),
            LogMsgType::Error => logger.log_error(msg, now_ns),
            LogMsgType::Data => logger.log_data(msg, now_ns),
        };
    }
}
