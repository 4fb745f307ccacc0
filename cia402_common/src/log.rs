//! Data logging message types.
//!
//! Events are fixed-size (`heapless::String`) so the RT side can build them
//! without touching the heap.

use heapless::String;
use serde::{Deserialize, Serialize};

use crate::consts::LOG_MSG_LEN;

/// Kind tag of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogMsgType {
    /// Command accepted from the user/master.
    Command = 0,
    /// Error or fault.
    Error = 1,
    /// Periodic data snapshot.
    Data = 2,
}

/// Status code returned by the logging interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum LogStatus {
    /// Event queued.
    Queued = 0,
    /// Queue full, event dropped and counted.
    Dropped = 1,
    /// Consumer gone.
    Closed = 2,
}

/// Fixed-capacity log message.
pub type LogMessage = String<LOG_MSG_LEN>;

/// One event on the logging queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub kind: LogMsgType,
    /// Originating slave, if any.
    pub slave_id: Option<u16>,
    pub message: LogMessage,
    /// Monotonic timestamp [ns].
    pub timestamp_ns: u64,
}

impl LogEvent {
    pub fn new(kind: LogMsgType, slave_id: Option<u16>, msg: &str, timestamp_ns: u64) -> Self {
        Self {
            kind,
            slave_id,
            message: truncate_message(msg),
            timestamp_ns,
        }
    }
}

/// Copy `msg` into a [`LogMessage`], cutting at the last char boundary that fits.
pub fn truncate_message(msg: &str) -> LogMessage {
    let mut out = LogMessage::new();
    for ch in msg.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}
