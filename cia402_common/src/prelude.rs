//! Prelude module for common re-exports.
//!
//! ```rust
//! use cia402_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, DriveConfig, LogLevel, SharedConfig};
pub use crate::profile::{MotorConfig, ProfilerConfig};

// ─── Data Model ─────────────────────────────────────────────────────
pub use crate::cia402::{CiaState, Controlword, OpMode, Statusword};
pub use crate::pdo::{InputField, OutputField, PdoInput, PdoOutput};
pub use crate::slave::{PdoRegion, SlaveConfig, SlaveType};

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::log::{LogEvent, LogMsgType, LogStatus};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{DriveErrorFlags, OdError, PdoError, TransitionError};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{CYCLE_TIME_US, MAX_SLAVES, PDO_SIZE};

/// Default system cycle time as Duration.
pub const DEFAULT_CYCLE_TIME: Duration = Duration::from_micros(CYCLE_TIME_US as u64);
