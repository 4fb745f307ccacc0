//! System-wide constants for the CiA 402 drive workspace.
//!
//! Single source of truth for numeric limits, defaults and object dictionary
//! indices. Imported by all crates; not duplicated elsewhere.

/// Maximum number of slaves in one process image.
pub const MAX_SLAVES: usize = 64;

/// Number of 32-bit fields in each CiA 402 PDO struct.
pub const PDO_FIELD_COUNT: usize = 9;

/// Size of one CiA 402 PDO struct on the wire [bytes].
pub const PDO_SIZE: usize = PDO_FIELD_COUNT * 4;

/// Largest input or output process image [bytes].
pub const MAX_IMAGE_SIZE: usize = MAX_SLAVES * PDO_SIZE;

/// Default cycle time in microseconds (1 kHz = 1000 µs).
pub const CYCLE_TIME_US: u32 = 1000;

/// Minimum accepted cycle time [µs].
pub const CYCLE_TIME_US_MIN: u32 = 100;

/// Maximum accepted cycle time [µs].
pub const CYCLE_TIME_US_MAX: u32 = 10_000;

/// Default capacity of the logging queue [events].
pub const LOG_QUEUE_CAPACITY: usize = 256;

/// Maximum length of a log message [bytes]. Longer messages are truncated.
pub const LOG_MSG_LEN: usize = 64;

/// Interval between periodic DATA snapshots [ns].
pub const LOG_DATA_INTERVAL_NS: u64 = 500_000_000;

/// Default log file name used by file-backed sinks.
pub const LOG_FILE_NAME: &str = "logging.txt";

/// Object dictionary indices read at startup when the persisted-read option is on.
pub mod od {
    /// Motion polarity (bit 7 / bit 6 set → inverted).
    pub const POLARITY: u16 = 0x607E;
    /// Max profile velocity.
    pub const MAX_PROFILE_VELOCITY: u16 = 0x607F;
    /// Profile velocity.
    pub const PROFILE_VELOCITY: u16 = 0x6081;
    /// Profile acceleration.
    pub const PROFILE_ACCELERATION: u16 = 0x6083;
    /// Profile deceleration.
    pub const PROFILE_DECELERATION: u16 = 0x6084;
    /// Quick stop deceleration.
    pub const QUICK_STOP_DECELERATION: u16 = 0x6085;
    /// Max torque.
    pub const MAX_TORQUE: u16 = 0x6072;
    /// Torque slope.
    pub const TORQUE_SLOPE: u16 = 0x6087;
}
