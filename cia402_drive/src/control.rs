//! Default motion and torque control collaborators.
//!
//! The drive closes its own loops in the cyclic synchronous modes, so these
//! implementations only gate and limit the profiled demand. Plant-specific
//! controllers plug in through the same traits.

use cia402_common::cia402::OpMode;

use crate::interfaces::{Feedback, MotionControl, Setpoints, TorqueControl};

// ─── Motion Control ─────────────────────────────────────────────────

/// Forwards profiled setpoints while enabled, holds position otherwise.
#[derive(Debug, Clone, Default)]
pub struct ProfileMotionControl {
    mode: Option<OpMode>,
}

impl ProfileMotionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mode the loop was enabled in, `None` while disabled.
    pub fn mode(&self) -> Option<OpMode> {
        self.mode
    }
}

impl MotionControl for ProfileMotionControl {
    fn enable(&mut self, mode: OpMode) {
        self.mode = Some(mode);
    }

    fn disable(&mut self) {
        self.mode = None;
    }

    fn update(&mut self, demand: &Setpoints, feedback: &Feedback) -> Setpoints {
        match self.mode {
            Some(_) => *demand,
            None => Setpoints {
                position: feedback.position,
                velocity: 0,
                torque: 0,
            },
        }
    }
}

// ─── Torque Control ─────────────────────────────────────────────────

/// Clamps the torque demand to ±`max_torque`; zero while disabled.
#[derive(Debug, Clone)]
pub struct SlopeTorqueControl {
    max_torque: i32,
    enabled: bool,
}

impl SlopeTorqueControl {
    pub fn new(max_torque: u32) -> Self {
        Self {
            max_torque: i32::try_from(max_torque).unwrap_or(i32::MAX),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl TorqueControl for SlopeTorqueControl {
    fn enable(&mut self) {
        self.enabled = true;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn update(&mut self, demand: i32, _feedback: &Feedback) -> i32 {
        if self.enabled {
            demand.clamp(-self.max_torque, self.max_torque)
        } else {
            0
        }
    }
}
