//! Collaborator interfaces of the network drive service.
//!
//! Each external service the drive talks to is a trait; concrete
//! implementations are injected as boxed trait objects when the service is
//! built. Optional collaborators are `Option`s resolved once at construction.
//!
//! | Trait | Collaborator |
//! |-------|--------------|
//! | [`PdoExchange`] | PDO exchange with the communication module |
//! | [`ObjectDictionary`] | CANopen SDO / object dictionary service |
//! | [`TorqueControl`] | Torque control loop |
//! | [`MotionControl`] | Position / velocity control loop |
//! | [`PositionFeedback`] | Position sensor service |
//! | [`DataLogging`] | Data logging service |

use cia402_common::cia402::{CiaState, OpMode};
use cia402_common::error::{OdError, PdoError};
use cia402_common::log::LogStatus;
use cia402_common::pdo::{PdoInput, PdoOutput};

/// Cyclic process data exchange for one slave.
pub trait PdoExchange: Send {
    /// Bus id of the slave this link serves.
    fn slave_id(&self) -> u16;

    /// Inputs of the most recent completed frame.
    fn read_inputs(&mut self) -> Result<PdoInput, PdoError>;

    /// Outputs for the next frame, written as one unit.
    fn write_outputs(&mut self, outputs: &PdoOutput) -> Result<(), PdoError>;
}

/// Acyclic object dictionary access.
pub trait ObjectDictionary: Send {
    fn read(&mut self, index: u16, subindex: u8) -> Result<u32, OdError>;

    fn write(&mut self, index: u16, subindex: u8, value: u32) -> Result<(), OdError>;
}

/// One reading of a position sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedbackSample {
    pub position: i32,
    pub velocity: i32,
}

/// Position sensor service.
pub trait PositionFeedback: Send {
    fn read(&mut self) -> FeedbackSample;
}

/// Decoded feedback handed to the control collaborators each cycle.
///
/// PDO values are signed and polarity-corrected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Feedback {
    pub state: CiaState,
    pub opmode_display: Option<OpMode>,
    pub position: i32,
    pub velocity: i32,
    pub torque: i32,
    /// First position sensor.
    pub primary: FeedbackSample,
    /// Second position sensor, when configured.
    pub secondary: Option<FeedbackSample>,
}

/// Position / velocity / torque setpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Setpoints {
    pub position: i32,
    pub velocity: i32,
    pub torque: i32,
}

/// Position / velocity control loop.
pub trait MotionControl: Send {
    fn enable(&mut self, mode: OpMode);

    fn disable(&mut self);

    /// Turn profiled demand plus feedback into the setpoints sent to the drive.
    fn update(&mut self, demand: &Setpoints, feedback: &Feedback) -> Setpoints;
}

/// Torque control loop.
pub trait TorqueControl: Send {
    fn enable(&mut self);

    fn disable(&mut self);

    /// Turn a torque demand into the torque setpoint sent to the drive.
    fn update(&mut self, demand: i32, feedback: &Feedback) -> i32;
}

/// Data logging service. Calls never block.
pub trait DataLogging: Send {
    fn log_user_command(&self, msg: &str, timestamp_ns: u64) -> LogStatus;

    fn log_error(&self, msg: &str, timestamp_ns: u64) -> LogStatus;

    fn log_data(&self, msg: &str, timestamp_ns: u64) -> LogStatus;
}
