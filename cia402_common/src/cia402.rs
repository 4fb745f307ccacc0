//! CiA 402 device profile types.
//!
//! Drive states, statusword/controlword bit definitions and modes of
//! operation. All enums use `#[repr(u8)]`/`#[repr(i8)]` so they travel as a
//! single byte in diagnostics and log snapshots.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Drive state decoded from the statusword.
///
/// Derived from the statusword every cycle; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum CiaState {
    /// Power electronics initialising.
    #[default]
    NotReady = 0,
    /// Initialised, high voltage may be applied.
    SwitchOnDisabled = 1,
    /// Waiting for switch on.
    ReadySwitchOn = 2,
    /// High voltage applied, power amplifier ready.
    SwitchedOn = 3,
    /// Drive enabled, following setpoints.
    OpEnabled = 4,
    /// Quick stop function executing.
    QuickStop = 5,
    /// Fault reaction executing.
    FaultReactionActive = 6,
    /// Faulted, waits for a fault reset edge.
    Fault = 7,
}

impl CiaState {
    /// States entered by the device on its own, never requested by the master.
    #[inline]
    pub const fn is_device_driven(self) -> bool {
        matches!(
            self,
            Self::NotReady | Self::FaultReactionActive | Self::Fault
        )
    }

    /// Fault or fault reaction.
    #[inline]
    pub const fn is_fault(self) -> bool {
        matches!(self, Self::FaultReactionActive | Self::Fault)
    }

    /// Short upper-case name used in log messages.
    pub const fn name(self) -> &'static str {
        match self {
            Self::NotReady => "NOT_READY",
            Self::SwitchOnDisabled => "SWITCH_ON_DISABLED",
            Self::ReadySwitchOn => "READY_SWITCH_ON",
            Self::SwitchedOn => "SWITCHED_ON",
            Self::OpEnabled => "OP_ENABLED",
            Self::QuickStop => "QUICK_STOP",
            Self::FaultReactionActive => "FAULT_REACTION_ACTIVE",
            Self::Fault => "FAULT",
        }
    }
}

impl core::fmt::Display for CiaState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Statusword (object 0x6041) bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Statusword: u16 {
        const READY_TO_SWITCH_ON  = 1 << 0;
        const SWITCHED_ON         = 1 << 1;
        const OPERATION_ENABLED   = 1 << 2;
        const FAULT               = 1 << 3;
        const VOLTAGE_ENABLED     = 1 << 4;
        /// Active low: cleared while quick stop executes.
        const QUICK_STOP          = 1 << 5;
        const SWITCH_ON_DISABLED  = 1 << 6;
        const WARNING             = 1 << 7;
        const REMOTE              = 1 << 9;
        const TARGET_REACHED      = 1 << 10;
        const INTERNAL_LIMIT      = 1 << 11;
        /// Mode specific (setpoint acknowledge / homing attained).
        const OP_MODE_SPECIFIC_1  = 1 << 12;
        /// Mode specific (following error / homing error).
        const OP_MODE_SPECIFIC_2  = 1 << 13;
    }
}

impl Statusword {
    /// Bits that take part in state decoding (0, 1, 2, 3, 5, 6).
    pub const STATE_MASK: u16 = 0x006F;

    /// Build from the 32-bit PDO field; upper half is ignored.
    #[inline]
    pub const fn from_pdo(raw: u32) -> Self {
        Self::from_bits_retain(raw as u16)
    }
}

bitflags! {
    /// Controlword (object 0x6040) bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Controlword: u16 {
        const SWITCH_ON        = 1 << 0;
        const ENABLE_VOLTAGE   = 1 << 1;
        /// Active low: clearing it requests quick stop.
        const QUICK_STOP       = 1 << 2;
        const ENABLE_OPERATION = 1 << 3;
        /// Profile position: new setpoint. Homing: start.
        const NEW_SETPOINT     = 1 << 4;
        const CHANGE_IMMEDIATELY = 1 << 5;
        const RELATIVE         = 1 << 6;
        /// Rising edge resets a fault.
        const FAULT_RESET      = 1 << 7;
        const HALT             = 1 << 8;
    }
}

impl Controlword {
    /// Bits owned by the state machine; everything else is mode specific.
    pub const STATE_BITS: Self = Self::from_bits_truncate(
        Self::SWITCH_ON.bits()
            | Self::ENABLE_VOLTAGE.bits()
            | Self::QUICK_STOP.bits()
            | Self::ENABLE_OPERATION.bits()
            | Self::FAULT_RESET.bits(),
    );

    /// "Shutdown" command: → READY_SWITCH_ON.
    pub const SHUTDOWN: Self = Self::from_bits_truncate(0x0006);
    /// "Switch on" / "Disable operation" command: → SWITCHED_ON.
    pub const CMD_SWITCH_ON: Self = Self::from_bits_truncate(0x0007);
    /// "Enable operation" command: → OP_ENABLED.
    pub const CMD_ENABLE_OPERATION: Self = Self::from_bits_truncate(0x000F);
    /// "Disable voltage" command: → SWITCH_ON_DISABLED.
    pub const DISABLE_VOLTAGE: Self = Self::empty();

    /// Replace the state bits, keeping the mode specific ones.
    #[inline]
    pub fn with_state_bits(self, command: Self) -> Self {
        (self - Self::STATE_BITS) | (command & Self::STATE_BITS)
    }
}

/// Modes of operation (object 0x6060 / 0x6061).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(i8)]
pub enum OpMode {
    #[default]
    NoMode = 0,
    ProfilePosition = 1,
    ProfileVelocity = 3,
    ProfileTorque = 4,
    Homing = 6,
    CyclicSyncPosition = 8,
    CyclicSyncVelocity = 9,
    CyclicSyncTorque = 10,
}

impl OpMode {
    #[inline]
    pub const fn from_i8(value: i8) -> Option<Self> {
        match value {
            0 => Some(Self::NoMode),
            1 => Some(Self::ProfilePosition),
            3 => Some(Self::ProfileVelocity),
            4 => Some(Self::ProfileTorque),
            6 => Some(Self::Homing),
            8 => Some(Self::CyclicSyncPosition),
            9 => Some(Self::CyclicSyncVelocity),
            10 => Some(Self::CyclicSyncTorque),
            _ => None,
        }
    }

    /// Decode the 32-bit PDO field (only the low byte is meaningful).
    #[inline]
    pub const fn from_pdo(raw: u32) -> Option<Self> {
        Self::from_i8(raw as u8 as i8)
    }

    /// Encode for the 32-bit PDO field.
    #[inline]
    pub const fn to_pdo(self) -> u32 {
        self as i8 as u8 as u32
    }

    pub const fn is_position(self) -> bool {
        matches!(self, Self::ProfilePosition | Self::CyclicSyncPosition | Self::Homing)
    }

    pub const fn is_velocity(self) -> bool {
        matches!(self, Self::ProfileVelocity | Self::CyclicSyncVelocity)
    }

    pub const fn is_torque(self) -> bool {
        matches!(self, Self::ProfileTorque | Self::CyclicSyncTorque)
    }
}
