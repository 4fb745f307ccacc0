//! CiA 402 drive state machine (master side).
//!
//! Decodes the statusword into a [`CiaState`] and turns transition requests
//! into controlword commands following the standard state graph:
//!
//! ```text
//!  NOT_READY ──1──► SWITCH_ON_DISABLED ◄──────────────7,9,10,12───────┐
//!                        │  ▲                                         │
//!                        2  │15 (fault reset edge)                    │
//!                        ▼  │                                         │
//!                  READY_SWITCH_ON ◄──6,8── SWITCHED_ON ◄──5── OP_ENABLED ──11──► QUICK_STOP
//!                        └──────3────────►     └──────4──────►   ▲ └────16────────┘
//!                                                                 │
//!  (any) ──13──► FAULT_REACTION_ACTIVE ──14──► FAULT ──15──► SWITCH_ON_DISABLED
//! ```
//!
//! Only the state bits (0, 1, 2, 3, 7) of the controlword are owned here;
//! mode specific bits are preserved across every transition.

use cia402_common::cia402::{CiaState, Controlword, Statusword};
use cia402_common::error::TransitionError;

// ─── Decoding ───────────────────────────────────────────────────────

/// One row of the decode table.
#[derive(Debug, Clone, Copy)]
struct StatePattern {
    mask: u16,
    value: u16,
    state: CiaState,
}

/// Decode table in priority order. First match wins.
const DECODE_TABLE: [StatePattern; 8] = [
    StatePattern { mask: 0x004F, value: 0x0008, state: CiaState::Fault },
    StatePattern { mask: 0x004F, value: 0x000F, state: CiaState::FaultReactionActive },
    StatePattern { mask: 0x006F, value: 0x0007, state: CiaState::QuickStop },
    StatePattern { mask: 0x006F, value: 0x0027, state: CiaState::OpEnabled },
    StatePattern { mask: 0x006F, value: 0x0023, state: CiaState::SwitchedOn },
    StatePattern { mask: 0x006F, value: 0x0021, state: CiaState::ReadySwitchOn },
    StatePattern { mask: 0x004F, value: 0x0040, state: CiaState::SwitchOnDisabled },
    StatePattern { mask: 0x004F, value: 0x0000, state: CiaState::NotReady },
];

/// Decode a statusword. Words matching no row decode to `NotReady`.
pub fn decode_statusword(statusword: u16) -> CiaState {
    try_decode_statusword(statusword).unwrap_or(CiaState::NotReady)
}

/// Decode a statusword, `None` if no row of the table matches.
pub fn try_decode_statusword(statusword: u16) -> Option<CiaState> {
    DECODE_TABLE
        .iter()
        .find(|p| statusword & p.mask == p.value)
        .map(|p| p.state)
}

/// Canonical statusword a drive reports in `state` (state bits only).
pub const fn statusword_for(state: CiaState) -> Statusword {
    Statusword::from_bits_retain(match state {
        CiaState::NotReady => 0x0000,
        CiaState::SwitchOnDisabled => 0x0040,
        CiaState::ReadySwitchOn => 0x0021,
        CiaState::SwitchedOn => 0x0023,
        CiaState::OpEnabled => 0x0027,
        CiaState::QuickStop => 0x0007,
        CiaState::FaultReactionActive => 0x000F,
        CiaState::Fault => 0x0008,
    })
}

// ─── Transitions ────────────────────────────────────────────────────

/// Controlword for the edge `from → to`, given the previous controlword.
///
/// Self-transitions re-emit `previous`. Device-driven targets and edges
/// absent from the standard graph are rejected.
pub fn transition_controlword(
    from: CiaState,
    to: CiaState,
    previous: Controlword,
) -> Result<Controlword, TransitionError> {
    use CiaState::*;

    let invalid = TransitionError::Invalid { from, to };
    if to.is_device_driven() || from.is_fault() {
        return Err(invalid);
    }
    if from == to {
        return Ok(previous);
    }

    let command = match (from, to) {
        // 2, 6, 8: shutdown
        (SwitchOnDisabled, ReadySwitchOn)
        | (SwitchedOn, ReadySwitchOn)
        | (OpEnabled, ReadySwitchOn) => Controlword::SHUTDOWN,
        // 3, 5: switch on / disable operation
        (ReadySwitchOn, SwitchedOn) | (OpEnabled, SwitchedOn) => Controlword::CMD_SWITCH_ON,
        // 4, 16: enable operation
        (SwitchedOn, OpEnabled) | (QuickStop, OpEnabled) => Controlword::CMD_ENABLE_OPERATION,
        // 7, 9, 10, 12: disable voltage
        (ReadySwitchOn, SwitchOnDisabled)
        | (SwitchedOn, SwitchOnDisabled)
        | (OpEnabled, SwitchOnDisabled)
        | (QuickStop, SwitchOnDisabled) => Controlword::DISABLE_VOLTAGE,
        // 11: quick stop clears bit 2, keeps bits 1 and 3
        (OpEnabled, QuickStop) => {
            let kept = previous & (Controlword::SWITCH_ON | Controlword::ENABLE_OPERATION);
            kept | Controlword::ENABLE_VOLTAGE
        }
        _ => return Err(invalid),
    };

    Ok(previous.with_state_bits(command))
}

/// Next state on the shortest standard path from `current` toward `goal`.
///
/// `None` when already there or when the goal is unreachable by master
/// commands (fault states, or `NotReady`).
pub fn next_hop(current: CiaState, goal: CiaState) -> Option<CiaState> {
    use CiaState::*;

    if current == goal || goal.is_device_driven() || current.is_device_driven() {
        return None;
    }

    let hop = match (current, goal) {
        (_, SwitchOnDisabled) => SwitchOnDisabled,
        (SwitchOnDisabled, _) => ReadySwitchOn,
        (ReadySwitchOn, _) => SwitchedOn,
        (SwitchedOn, ReadySwitchOn) => ReadySwitchOn,
        (SwitchedOn, _) => OpEnabled,
        (OpEnabled, _) => goal,
        (QuickStop, OpEnabled) => OpEnabled,
        // QUICK_STOP only leaves through OP_ENABLED or SWITCH_ON_DISABLED.
        (QuickStop, _) => SwitchOnDisabled,
        _ => return None,
    };
    Some(hop)
}

// ─── State Machine ──────────────────────────────────────────────────

/// Progress of a fault reset edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FaultReset {
    #[default]
    Idle,
    /// Bit 7 emitted low this cycle; goes high next cycle.
    Armed,
    /// Bit 7 held high until the drive leaves FAULT.
    Asserted,
}

/// Per-drive master-side state machine.
#[derive(Debug, Clone)]
pub struct Cia402StateMachine {
    state: CiaState,
    controlword: Controlword,
    fault_reset: FaultReset,
}

impl Default for Cia402StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Cia402StateMachine {
    pub const fn new() -> Self {
        Self {
            state: CiaState::NotReady,
            controlword: Controlword::empty(),
            fault_reset: FaultReset::Idle,
        }
    }

    /// Last decoded state.
    #[inline]
    pub const fn state(&self) -> CiaState {
        self.state
    }

    /// Controlword to send this cycle.
    #[inline]
    pub const fn controlword(&self) -> Controlword {
        self.controlword
    }

    /// Decode a new statusword and advance the fault reset edge.
    pub fn update(&mut self, statusword: u16) -> CiaState {
        self.state = decode_statusword(statusword);

        match (self.state, self.fault_reset) {
            (CiaState::Fault, FaultReset::Armed) => {
                self.controlword |= Controlword::FAULT_RESET;
                self.fault_reset = FaultReset::Asserted;
            }
            (CiaState::Fault, _) => {}
            (_, FaultReset::Idle) => {}
            _ => {
                self.controlword -= Controlword::FAULT_RESET;
                self.fault_reset = FaultReset::Idle;
            }
        }

        self.state
    }

    /// Request a move to an adjacent state (or stay in the current one).
    ///
    /// On error the controlword is left unchanged.
    pub fn request(&mut self, target: CiaState) -> Result<Controlword, TransitionError> {
        let next = transition_controlword(self.state, target, self.controlword)?;
        self.controlword = next;
        Ok(next)
    }

    /// Start a fault reset. Only valid in FAULT.
    ///
    /// Produces a rising edge on bit 7: if the bit is already high, for
    /// instance from an earlier reset the drive ignored, it is dropped this
    /// cycle and raised on the next [`update`](Self::update).
    pub fn request_fault_reset(&mut self) -> Result<Controlword, TransitionError> {
        if self.state != CiaState::Fault {
            return Err(TransitionError::Invalid {
                from: self.state,
                to: CiaState::SwitchOnDisabled,
            });
        }
        match self.fault_reset {
            FaultReset::Armed => {}
            _ if self.controlword.contains(Controlword::FAULT_RESET) => {
                // Previous edge ignored by the drive: drop the bit, raise it next cycle.
                self.controlword = self.controlword.with_state_bits(Controlword::empty());
                self.fault_reset = FaultReset::Armed;
            }
            _ => {
                self.controlword = self.controlword.with_state_bits(Controlword::FAULT_RESET);
                self.fault_reset = FaultReset::Asserted;
            }
        }
        Ok(self.controlword)
    }

    /// Set or clear mode specific controlword bits; state bits are ignored.
    pub fn set_mode_bits(&mut self, bits: Controlword, on: bool) {
        let bits = bits - Controlword::STATE_BITS;
        self.controlword.set(bits, on);
    }
}
