//! Simulated fieldbus and device-side CiA 402 drive.
//!
//! Lets the service run without hardware. [`SimulatedDrive`] reacts to
//! controlwords the way a real drive does and reports the matching
//! statusword; [`SimulatedTransport`] plays the bus master's frame exchange
//! against the shared process image.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use cia402_common::cia402::{CiaState, Controlword, OpMode, Statusword};
use cia402_common::consts::{PDO_SIZE, od};
use cia402_common::error::{OdError, PdoError};
use cia402_common::pdo::{PdoInput, PdoOutput};
use cia402_common::profile::ProfilerConfig;
use tracing::{debug, warn};

use crate::interfaces::{FeedbackSample, ObjectDictionary, PositionFeedback};
use crate::pdo::{ProcessImage, SharedImage};
use crate::state::cia402::statusword_for;

// ─── Device Commands ────────────────────────────────────────────────

/// Controlword commands as decoded by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceCommand {
    DisableVoltage,
    QuickStop,
    Shutdown,
    SwitchOn,
    EnableOperation,
}

impl DeviceCommand {
    fn decode(cw: u16) -> Option<Self> {
        if cw & 0x82 == 0x00 {
            Some(Self::DisableVoltage)
        } else if cw & 0x86 == 0x02 {
            Some(Self::QuickStop)
        } else if cw & 0x87 == 0x06 {
            Some(Self::Shutdown)
        } else if cw & 0x8F == 0x07 {
            Some(Self::SwitchOn)
        } else if cw & 0x8F == 0x0F {
            Some(Self::EnableOperation)
        } else {
            None
        }
    }
}

// ─── Simulated Drive ────────────────────────────────────────────────

/// Device-side CiA 402 drive with an ideal motion model.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDrive {
    state: CiaState,
    last_controlword: u16,
    opmode: OpMode,
    targets: PdoOutput,
    position: f64,
    velocity: f64,
    torque: f64,
    homed: bool,
    fault_cause: bool,
}

impl SimulatedDrive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CiaState {
        self.state
    }

    /// Raise a drive fault; FAULT is reached on the next step.
    pub fn inject_fault(&mut self) {
        self.state = CiaState::FaultReactionActive;
    }

    /// Keep the fault cause present. Reset edges are ignored while set.
    pub fn set_fault_cause(&mut self, present: bool) {
        self.fault_cause = present;
    }

    /// Latch the outputs of one frame and react to the controlword.
    pub fn apply(&mut self, output: &PdoOutput) {
        let cw = output.controlword as u16;
        let rising_reset = cw & Controlword::FAULT_RESET.bits() != 0
            && self.last_controlword & Controlword::FAULT_RESET.bits() == 0;
        self.last_controlword = cw;
        self.targets = *output;
        if let Some(mode) = OpMode::from_pdo(output.opmode) {
            self.opmode = mode;
        }

        let next = match (self.state, DeviceCommand::decode(cw)) {
            (CiaState::Fault, _) if rising_reset && !self.fault_cause => CiaState::SwitchOnDisabled,
            (CiaState::NotReady | CiaState::FaultReactionActive | CiaState::Fault, _) => self.state,
            (_, None) => self.state,

            (CiaState::SwitchOnDisabled, Some(DeviceCommand::Shutdown)) => CiaState::ReadySwitchOn,

            (
                CiaState::ReadySwitchOn,
                Some(DeviceCommand::DisableVoltage | DeviceCommand::QuickStop),
            ) => CiaState::SwitchOnDisabled,
            (CiaState::ReadySwitchOn, Some(DeviceCommand::SwitchOn)) => CiaState::SwitchedOn,

            (
                CiaState::SwitchedOn,
                Some(DeviceCommand::DisableVoltage | DeviceCommand::QuickStop),
            ) => CiaState::SwitchOnDisabled,
            (CiaState::SwitchedOn, Some(DeviceCommand::Shutdown)) => CiaState::ReadySwitchOn,
            (CiaState::SwitchedOn, Some(DeviceCommand::EnableOperation)) => CiaState::OpEnabled,

            (CiaState::OpEnabled, Some(DeviceCommand::DisableVoltage)) => {
                CiaState::SwitchOnDisabled
            }
            (CiaState::OpEnabled, Some(DeviceCommand::QuickStop)) => CiaState::QuickStop,
            (CiaState::OpEnabled, Some(DeviceCommand::Shutdown)) => CiaState::ReadySwitchOn,
            (CiaState::OpEnabled, Some(DeviceCommand::SwitchOn)) => CiaState::SwitchedOn,

            (CiaState::QuickStop, Some(DeviceCommand::DisableVoltage)) => {
                CiaState::SwitchOnDisabled
            }
            (CiaState::QuickStop, Some(DeviceCommand::EnableOperation)) => CiaState::OpEnabled,

            (state, _) => state,
        };

        if next != self.state {
            debug!(from = %self.state, to = %next, controlword = cw, "simulated drive transition");
            self.state = next;
        }
    }

    /// Advance the device by one period.
    pub fn step(&mut self, dt: Duration) {
        let dt = dt.as_secs_f64();
        match self.state {
            CiaState::NotReady => self.state = CiaState::SwitchOnDisabled,
            CiaState::FaultReactionActive => self.state = CiaState::Fault,
            _ => {}
        }

        if self.state != CiaState::OpEnabled {
            self.velocity = 0.0;
            self.torque = 0.0;
            return;
        }

        if self.opmode == OpMode::Homing {
            // Homing on the current position: completes as soon as started.
            if self.last_controlword & Controlword::NEW_SETPOINT.bits() != 0 {
                self.position = 0.0;
                self.velocity = 0.0;
                self.homed = true;
            }
        } else if self.opmode.is_position() {
            let target = self.targets.target_position as i32 as f64;
            if dt > 0.0 {
                self.velocity = (target - self.position) / dt;
            }
            self.position = target;
        } else if self.opmode.is_velocity() {
            self.velocity = self.targets.target_velocity as i32 as f64;
            self.position += self.velocity * dt;
        } else if self.opmode.is_torque() {
            self.torque = self.targets.target_torque as i32 as f64;
        }
    }

    /// Input frame reported by the device.
    pub fn inputs(&self) -> PdoInput {
        let mut sw = statusword_for(self.state) | Statusword::REMOTE;
        if matches!(
            self.state,
            CiaState::ReadySwitchOn | CiaState::SwitchedOn | CiaState::OpEnabled | CiaState::QuickStop
        ) {
            sw |= Statusword::VOLTAGE_ENABLED;
        }
        if self.state == CiaState::OpEnabled {
            sw |= Statusword::TARGET_REACHED;
        }
        if self.homed && self.opmode == OpMode::Homing {
            sw |= Statusword::OP_MODE_SPECIFIC_1;
        }
        // Quick stop bit is active low and reads 1 outside quick stop.
        if matches!(
            self.state,
            CiaState::ReadySwitchOn | CiaState::SwitchedOn | CiaState::OpEnabled
        ) {
            sw |= Statusword::QUICK_STOP;
        }

        PdoInput {
            statusword: sw.bits() as u32,
            opmode_display: self.opmode.to_pdo(),
            actual_torque: self.torque.round() as i32 as u32,
            actual_position: self.position.round() as i32 as u32,
            actual_velocity: self.velocity.round() as i32 as u32,
            user_in_1: self.targets.user_out_1,
            user_in_2: self.targets.user_out_2,
            user_in_3: self.targets.user_out_3,
            user_in_4: self.targets.user_out_4,
        }
    }
}

// ─── Transport ──────────────────────────────────────────────────────

/// Bus master frame exchange against a process image.
pub trait FieldbusTransport: Send {
    /// Send every slave's outputs and receive its inputs for one frame.
    fn exchange(&mut self, image: &mut ProcessImage, dt: Duration) -> Result<(), PdoError>;
}

/// Transport backed by one [`SimulatedDrive`] per CiA 402 slave.
#[derive(Debug, Default)]
pub struct SimulatedTransport {
    drives: Vec<(u16, SimulatedDrive)>,
}

impl SimulatedTransport {
    /// One simulated drive for every CiA 402 slave in the image.
    pub fn for_image(image: &ProcessImage) -> Self {
        let drives = image
            .slaves()
            .iter()
            .filter(|s| s.is_cia402())
            .map(|s| (s.id, SimulatedDrive::new()))
            .collect();
        Self { drives }
    }

    pub fn drive(&self, id: u16) -> Option<&SimulatedDrive> {
        self.drives.iter().find(|(i, _)| *i == id).map(|(_, d)| d)
    }

    pub fn drive_mut(&mut self, id: u16) -> Option<&mut SimulatedDrive> {
        self.drives.iter_mut().find(|(i, _)| *i == id).map(|(_, d)| d)
    }
}

impl FieldbusTransport for SimulatedTransport {
    fn exchange(&mut self, image: &mut ProcessImage, dt: Duration) -> Result<(), PdoError> {
        for (id, drive) in &mut self.drives {
            let output = image.get_output(*id)?;
            drive.apply(&output);
            drive.step(dt);
            let input = drive.inputs().to_bytes();
            image.input_bytes_mut(*id)?[..PDO_SIZE].copy_from_slice(&input);
        }
        Ok(())
    }
}

// ─── Feedback ───────────────────────────────────────────────────────

/// Position sensor that reads a slave's actual position from the image.
#[derive(Debug, Clone)]
pub struct ImageFeedback {
    image: SharedImage,
    slave: u16,
}

impl ImageFeedback {
    /// Fails if the slave is not a CiA 402 drive.
    pub fn new(image: SharedImage, slave: u16) -> Result<Self, PdoError> {
        image.lock().get_position(slave)?;
        Ok(Self { image, slave })
    }
}

impl PositionFeedback for ImageFeedback {
    fn read(&mut self) -> FeedbackSample {
        let image = self.image.lock();
        match (image.get_position(self.slave), image.get_velocity(self.slave)) {
            (Ok(position), Ok(velocity)) => FeedbackSample {
                position: position as i32,
                velocity: velocity as i32,
            },
            (Err(e), _) | (_, Err(e)) => {
                warn!(slave = self.slave, error = %e, "feedback read failed");
                FeedbackSample::default()
            }
        }
    }
}

// ─── Object Dictionary ──────────────────────────────────────────────

/// Object dictionary held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectDictionary {
    entries: HashMap<(u16, u8), u32>,
    read_only: HashSet<(u16, u8)>,
}

impl InMemoryObjectDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of a writable entry.
    pub fn with_entry(mut self, index: u16, subindex: u8, value: u32) -> Self {
        self.entries.insert((index, subindex), value);
        self
    }

    /// Dictionary holding the profile entries read at startup.
    pub fn with_profile(config: &ProfilerConfig) -> Self {
        let polarity = if config.polarity < 0 { 0xC0 } else { 0 };
        Self::new()
            .with_entry(od::POLARITY, 0, polarity)
            .with_entry(od::MAX_PROFILE_VELOCITY, 0, config.max_profile_velocity)
            .with_entry(od::PROFILE_VELOCITY, 0, config.profile_velocity)
            .with_entry(od::PROFILE_ACCELERATION, 0, config.profile_acceleration)
            .with_entry(od::PROFILE_DECELERATION, 0, config.profile_deceleration)
            .with_entry(od::QUICK_STOP_DECELERATION, 0, config.quick_stop_deceleration)
            .with_entry(od::MAX_TORQUE, 0, config.max_torque)
            .with_entry(od::TORQUE_SLOPE, 0, config.torque_slope)
    }

    /// Builder-style insert of a read-only entry.
    pub fn with_constant(mut self, index: u16, subindex: u8, value: u32) -> Self {
        self.entries.insert((index, subindex), value);
        self.read_only.insert((index, subindex));
        self
    }
}

impl ObjectDictionary for InMemoryObjectDictionary {
    fn read(&mut self, index: u16, subindex: u8) -> Result<u32, OdError> {
        self.entries
            .get(&(index, subindex))
            .copied()
            .ok_or(OdError::NoSuchObject { index, subindex })
    }

    fn write(&mut self, index: u16, subindex: u8, value: u32) -> Result<(), OdError> {
        if self.read_only.contains(&(index, subindex)) {
            return Err(OdError::ReadOnly { index, subindex });
        }
        match self.entries.get_mut(&(index, subindex)) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(OdError::NoSuchObject { index, subindex }),
        }
    }
}
