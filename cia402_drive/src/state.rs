//! State machine module root.
//!
//! Master-side CiA 402 drive state machine.

pub mod cia402;

pub use cia402::{Cia402StateMachine, decode_statusword, next_hop, transition_controlword};
