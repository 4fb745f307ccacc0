//! Per-cycle motion profiler.
//!
//! Trapezoidal limiter that turns a raw target into a setpoint the drive can
//! follow without exceeding the configured velocity, acceleration and torque
//! limits. Works in PDO units; rates are per second and scaled by the cycle
//! period.
//!
//! ```text
//!  v ▲      ┌──────────┐  profile_velocity
//!    │     ╱            ╲
//!    │    ╱ accel  decel ╲   (braking starts when v²/2d ≥ remaining)
//!    └───┴────────────────┴──► t
//! ```

use std::time::Duration;

use cia402_common::profile::ProfilerConfig;

/// Profiler state for one drive.
#[derive(Debug, Clone)]
pub struct Profiler {
    config: ProfilerConfig,
    /// Cycle period [s].
    dt: f64,
    position: f64,
    velocity: f64,
    torque: f64,
}

impl Profiler {
    pub fn new(config: ProfilerConfig, cycle: Duration) -> Self {
        Self {
            config,
            dt: cycle.as_secs_f64(),
            position: 0.0,
            velocity: 0.0,
            torque: 0.0,
        }
    }

    #[inline]
    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Current profiled velocity.
    #[inline]
    pub fn velocity(&self) -> i32 {
        self.velocity.round() as i32
    }

    /// Current profiled position.
    #[inline]
    pub fn position(&self) -> i32 {
        self.position.round() as i32
    }

    /// Current profiled torque.
    #[inline]
    pub fn torque(&self) -> i32 {
        self.torque.round() as i32
    }

    /// Re-seed from measured values, e.g. when a new mode is enabled.
    pub fn reset(&mut self, position: i32, velocity: i32, torque: i32) {
        self.position = position as f64;
        self.velocity = velocity as f64;
        self.torque = torque as f64;
    }

    /// Clamp a position target to the configured limits.
    ///
    /// Returns the clamped value and whether clamping took place.
    pub fn clamp_position(&self, target: i32) -> (i32, bool) {
        let clamped = target.clamp(self.config.min_position, self.config.max_position);
        (clamped, clamped != target)
    }

    /// Move the velocity one cycle toward `target`.
    pub fn step_velocity(&mut self, target: i32) -> i32 {
        let max = self.config.max_profile_velocity as f64;
        let target = (target as f64).clamp(-max, max);
        self.velocity = self.ramp(self.velocity, target);
        self.integrate();
        self.velocity()
    }

    /// Move the position one cycle toward `target`.
    ///
    /// Cruises at profile velocity and brakes at profile deceleration so the
    /// target is reached without overshoot.
    pub fn step_position(&mut self, target: i32) -> i32 {
        let (target, _) = self.clamp_position(target);
        let target = target as f64;
        let remaining = target - self.position;

        if remaining == 0.0 {
            self.velocity = 0.0;
            return self.position();
        }

        let dir = remaining.signum();
        let decel = self.config.profile_deceleration as f64;
        let braking = (2.0 * decel * remaining.abs()).sqrt();
        let cruise = (self.config.profile_velocity as f64).min(braking);

        self.velocity = self.ramp(self.velocity, dir * cruise);
        let next = self.position + self.velocity * self.dt;

        // Reached or crossed the target.
        if (target - next) * dir <= 0.0 {
            self.position = target;
            self.velocity = 0.0;
        } else {
            self.position = next;
        }
        self.position()
    }

    /// Move the torque one cycle toward `target` at the torque slope.
    pub fn step_torque(&mut self, target: i32) -> i32 {
        let max = self.config.max_torque as f64;
        let target = (target as f64).clamp(-max, max);
        let step = self.config.torque_slope as f64 * self.dt;
        self.torque = approach(self.torque, target, step);
        self.torque()
    }

    /// Brake to standstill at quick stop deceleration.
    pub fn step_quick_stop(&mut self) -> i32 {
        let step = self.config.quick_stop_deceleration as f64 * self.dt;
        self.velocity = approach(self.velocity, 0.0, step);
        self.integrate();
        self.velocity()
    }

    /// Velocity ramp: acceleration away from zero, deceleration toward it.
    fn ramp(&self, current: f64, target: f64) -> f64 {
        let speeding_up = target.abs() > current.abs()
            && (current == 0.0 || current.signum() == target.signum());
        let rate = if speeding_up {
            self.config.profile_acceleration
        } else {
            self.config.profile_deceleration
        };
        approach(current, target, rate as f64 * self.dt)
    }

    fn integrate(&mut self) {
        let min = self.config.min_position as f64;
        let max = self.config.max_position as f64;
        self.position = (self.position + self.velocity * self.dt).clamp(min, max);
    }
}

/// Move `current` toward `target` by at most `max_step`.
#[inline]
fn approach(current: f64, target: f64, max_step: f64) -> f64 {
    let delta = target - current;
    if delta.abs() <= max_step {
        target
    } else {
        current + max_step.copysign(delta)
    }
}
