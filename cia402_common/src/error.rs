//! Error types shared by the PDO handler, the state machine and the drive service.
//!
//! Operation errors are `thiserror` enums. The per-drive error state is a
//! `bitflags` set; flags marked CRITICAL escalate the drive toward quick stop.

use bitflags::bitflags;
use thiserror::Error;

use crate::cia402::CiaState;
use crate::slave::SlaveType;

/// PDO accessor failures. Memory is never modified when one is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PdoError {
    /// Slave is not configured as a CiA 402 drive.
    #[error("slave {slave}: type mismatch (configured as {actual:?}, expected Cia402Drive)")]
    TypeMismatch { slave: u16, actual: SlaveType },

    /// No slave with this id in the topology.
    #[error("slave {slave}: not present in topology")]
    UnknownSlave { slave: u16 },
}

/// Rejected state machine request. The controlword is left unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// No edge of the standard state graph leads from `from` to `to`.
    #[error("invalid transition {from} -> {to}")]
    Invalid { from: CiaState, to: CiaState },
}

/// Object dictionary access failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OdError {
    #[error("object {index:#06x}:{subindex} does not exist")]
    NoSuchObject { index: u16, subindex: u8 },

    #[error("object {index:#06x}:{subindex} is read-only")]
    ReadOnly { index: u16, subindex: u8 },

    #[error("object dictionary unavailable")]
    Unavailable,
}

bitflags! {
    /// Per-drive error flags.
    ///
    /// CRITICAL flags (→ quick stop): CYCLE_OVERRUN, DRIVE_FAULT.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DriveErrorFlags: u16 {
        /// Cycle exceeded its period. **CRITICAL**.
        const CYCLE_OVERRUN       = 0x0001;
        /// Drive reports FAULT / FAULT_REACTION_ACTIVE. **CRITICAL**.
        const DRIVE_FAULT         = 0x0002;
        /// PDO accessor hit a non-CiA 402 slave.
        const PDO_TYPE_MISMATCH   = 0x0004;
        /// Requested state change rejected.
        const TRANSITION_REJECTED = 0x0008;
        /// Startup object dictionary read failed for at least one entry.
        const OD_READ_FAILED      = 0x0010;
        /// Setpoint clamped to a position limit.
        const POSITION_LIMIT      = 0x0020;
    }
}

impl DriveErrorFlags {
    /// Mask of all CRITICAL flags.
    pub const CRITICAL_MASK: Self =
        Self::from_bits_truncate(Self::CYCLE_OVERRUN.bits() | Self::DRIVE_FAULT.bits());

    /// Returns true if any CRITICAL flag is set.
    #[inline]
    pub const fn has_critical(&self) -> bool {
        self.intersects(Self::CRITICAL_MASK)
    }
}

impl Default for DriveErrorFlags {
    fn default() -> Self {
        Self::empty()
    }
}
