//! Motor constants and motion profile configuration.
//!
//! Both structs are built once at startup and passed by reference into the
//! drive service. Nothing in the runtime mutates them.

use serde::{Deserialize, Serialize};

/// Per-motor constants from the motor data sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotorConfig {
    /// Number of pole pairs.
    pub pole_pairs: u32,
    /// Nominal speed [rpm].
    pub max_nominal_speed: u32,
    /// Nominal current [A].
    pub max_nominal_current: u32,
    /// Torque constant [mNm/A].
    pub torque_constant: u32,
    /// Gear ratio (1 = direct drive).
    #[serde(default = "default_gear_ratio")]
    pub gear_ratio: u32,
    /// Encoder ticks per revolution.
    pub encoder_resolution: u32,
    /// Direction of motion (1 or -1).
    #[serde(default = "default_polarity")]
    pub polarity: i8,
    /// Upper position limit [ticks].
    #[serde(default = "default_max_position")]
    pub max_position_limit: i32,
    /// Lower position limit [ticks].
    #[serde(default = "default_min_position")]
    pub min_position_limit: i32,
}

fn default_gear_ratio() -> u32 {
    1
}
fn default_polarity() -> i8 {
    1
}
fn default_max_position() -> i32 {
    0x7fff_ffff
}
fn default_min_position() -> i32 {
    -0x7fff_ffff
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            pole_pairs: 42,
            max_nominal_speed: 4000,
            max_nominal_current: 4,
            torque_constant: 72,
            gear_ratio: 1,
            encoder_resolution: 16384,
            polarity: 1,
            max_position_limit: default_max_position(),
            min_position_limit: default_min_position(),
        }
    }
}

impl MotorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.pole_pairs == 0 {
            return Err("pole_pairs must be > 0".to_string());
        }
        if self.encoder_resolution == 0 {
            return Err("encoder_resolution must be > 0".to_string());
        }
        if self.gear_ratio == 0 {
            return Err("gear_ratio must be > 0".to_string());
        }
        if self.polarity != 1 && self.polarity != -1 {
            return Err(format!("polarity {} must be 1 or -1", self.polarity));
        }
        if self.min_position_limit >= self.max_position_limit {
            return Err(format!(
                "min_position_limit {} must be below max_position_limit {}",
                self.min_position_limit, self.max_position_limit
            ));
        }
        Ok(())
    }
}

/// Motion profile parameters consumed by the drive service.
///
/// Velocities in rpm, accelerations in rpm/s, torque in mNm, slope in mNm/s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilerConfig {
    pub max_profile_velocity: u32,
    pub profile_velocity: u32,
    pub max_acceleration: u32,
    pub profile_acceleration: u32,
    pub profile_deceleration: u32,
    pub quick_stop_deceleration: u32,
    pub max_torque: u32,
    pub torque_slope: u32,
    #[serde(default = "default_polarity")]
    pub polarity: i8,
    #[serde(default = "default_max_position")]
    pub max_position: i32,
    #[serde(default = "default_min_position")]
    pub min_position: i32,
}

impl ProfilerConfig {
    /// Derive profile defaults from the motor constants.
    ///
    /// Profile velocity is a quarter of nominal speed, acceleration equals
    /// nominal speed per second, deceleration half of it, and quick stop
    /// deceleration five eighths of it.
    pub fn from_motor(motor: &MotorConfig) -> Self {
        let speed = motor.max_nominal_speed;
        Self {
            max_profile_velocity: speed,
            profile_velocity: speed / 4,
            max_acceleration: speed,
            profile_acceleration: speed / 2,
            profile_deceleration: speed / 2,
            quick_stop_deceleration: speed / 8 * 5,
            max_torque: motor.torque_constant.saturating_mul(motor.max_nominal_current),
            torque_slope: 66,
            polarity: motor.polarity,
            max_position: motor.max_position_limit,
            min_position: motor.min_position_limit,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_profile_velocity == 0 {
            return Err("max_profile_velocity must be > 0".to_string());
        }
        if self.profile_velocity > self.max_profile_velocity {
            return Err(format!(
                "profile_velocity {} exceeds max_profile_velocity {}",
                self.profile_velocity, self.max_profile_velocity
            ));
        }
        if self.profile_acceleration == 0
            || self.profile_deceleration == 0
            || self.quick_stop_deceleration == 0
        {
            return Err("accelerations must be > 0".to_string());
        }
        if self.profile_acceleration > self.max_acceleration {
            return Err(format!(
                "profile_acceleration {} exceeds max_acceleration {}",
                self.profile_acceleration, self.max_acceleration
            ));
        }
        if self.polarity != 1 && self.polarity != -1 {
            return Err(format!("polarity {} must be 1 or -1", self.polarity));
        }
        // Setpoints travel as signed 32-bit values.
        for (name, value) in [
            ("max_profile_velocity", self.max_profile_velocity),
            ("max_torque", self.max_torque),
        ] {
            if i32::try_from(value).is_err() {
                return Err(format!("{name} {value} exceeds {}", i32::MAX));
            }
        }
        if self.min_position >= self.max_position {
            return Err(format!(
                "min_position {} must be below max_position {}",
                self.min_position, self.max_position
            ));
        }
        Ok(())
    }
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self::from_motor(&MotorConfig::default())
    }
}
