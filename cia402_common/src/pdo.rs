//! CiA 402 process data structs and their wire layout.
//!
//! Both structs are nine consecutive little-endian `u32` words (36 bytes),
//! in declaration order. They are plain values: one copy is taken from the
//! process image per read, one copy written back per write.

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

use crate::consts::{PDO_FIELD_COUNT, PDO_SIZE};

/// Process data read from a CiA 402 slave every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(C)]
pub struct PdoInput {
    pub statusword: u32,
    pub opmode_display: u32,
    pub actual_torque: u32,
    pub actual_position: u32,
    pub actual_velocity: u32,
    pub user_in_1: u32,
    pub user_in_2: u32,
    pub user_in_3: u32,
    pub user_in_4: u32,
}

/// Process data written to a CiA 402 slave every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(C)]
pub struct PdoOutput {
    pub controlword: u32,
    pub opmode: u32,
    pub target_position: u32,
    pub target_velocity: u32,
    pub target_torque: u32,
    pub user_out_1: u32,
    pub user_out_2: u32,
    pub user_out_3: u32,
    pub user_out_4: u32,
}

const_assert_eq!(core::mem::size_of::<PdoInput>(), PDO_SIZE);
const_assert_eq!(core::mem::size_of::<PdoOutput>(), PDO_SIZE);

/// Field selector for [`PdoInput`], numbered by wire position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InputField {
    Statusword = 0,
    OpmodeDisplay = 1,
    ActualTorque = 2,
    ActualPosition = 3,
    ActualVelocity = 4,
    UserIn1 = 5,
    UserIn2 = 6,
    UserIn3 = 7,
    UserIn4 = 8,
}

/// Field selector for [`PdoOutput`], numbered by wire position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OutputField {
    Controlword = 0,
    Opmode = 1,
    TargetPosition = 2,
    TargetVelocity = 3,
    TargetTorque = 4,
    UserOut1 = 5,
    UserOut2 = 6,
    UserOut3 = 7,
    UserOut4 = 8,
}

impl InputField {
    /// Byte offset of the field inside the struct.
    #[inline]
    pub const fn offset(self) -> usize {
        self as usize * 4
    }
}

impl OutputField {
    /// Byte offset of the field inside the struct.
    #[inline]
    pub const fn offset(self) -> usize {
        self as usize * 4
    }
}

fn words_from_bytes(bytes: &[u8; PDO_SIZE]) -> [u32; PDO_FIELD_COUNT] {
    let mut words = [0u32; PDO_FIELD_COUNT];
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

fn words_to_bytes(words: &[u32; PDO_FIELD_COUNT]) -> [u8; PDO_SIZE] {
    let mut bytes = [0u8; PDO_SIZE];
    for (chunk, word) in bytes.chunks_exact_mut(4).zip(words.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    bytes
}

impl PdoInput {
    /// Decode from the wire layout.
    pub fn from_bytes(bytes: &[u8; PDO_SIZE]) -> Self {
        let w = words_from_bytes(bytes);
        Self {
            statusword: w[0],
            opmode_display: w[1],
            actual_torque: w[2],
            actual_position: w[3],
            actual_velocity: w[4],
            user_in_1: w[5],
            user_in_2: w[6],
            user_in_3: w[7],
            user_in_4: w[8],
        }
    }

    /// Encode into the wire layout.
    pub fn to_bytes(&self) -> [u8; PDO_SIZE] {
        words_to_bytes(&[
            self.statusword,
            self.opmode_display,
            self.actual_torque,
            self.actual_position,
            self.actual_velocity,
            self.user_in_1,
            self.user_in_2,
            self.user_in_3,
            self.user_in_4,
        ])
    }

    /// User inputs 1..4.
    #[inline]
    pub const fn user_inputs(&self) -> [u32; 4] {
        [self.user_in_1, self.user_in_2, self.user_in_3, self.user_in_4]
    }
}

impl PdoOutput {
    /// Decode from the wire layout.
    pub fn from_bytes(bytes: &[u8; PDO_SIZE]) -> Self {
        let w = words_from_bytes(bytes);
        Self {
            controlword: w[0],
            opmode: w[1],
            target_position: w[2],
            target_velocity: w[3],
            target_torque: w[4],
            user_out_1: w[5],
            user_out_2: w[6],
            user_out_3: w[7],
            user_out_4: w[8],
        }
    }

    /// Encode into the wire layout.
    pub fn to_bytes(&self) -> [u8; PDO_SIZE] {
        words_to_bytes(&[
            self.controlword,
            self.opmode,
            self.target_position,
            self.target_velocity,
            self.target_torque,
            self.user_out_1,
            self.user_out_2,
            self.user_out_3,
            self.user_out_4,
        ])
    }

    /// Replace user outputs 1..4.
    #[inline]
    pub fn set_user_outputs(&mut self, values: [u32; 4]) {
        [self.user_out_1, self.user_out_2, self.user_out_3, self.user_out_4] = values;
    }
}
