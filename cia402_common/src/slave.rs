//! Slave topology records.
//!
//! A [`SlaveConfig`] is produced once at bring-up from the master topology and
//! never changes afterwards. Its input and output handles are byte regions in
//! the master's process image.

use serde::{Deserialize, Serialize};

/// Kind of device behind a slave position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SlaveType {
    /// Unidentified device.
    #[default]
    Unknown = 0,
    /// Drive implementing the CiA 402 profile.
    Cia402Drive = 1,
    /// Digital I/O terminal.
    DigitalIo = 2,
    /// Analog I/O terminal.
    AnalogIo = 3,
    /// Encoder interface terminal.
    EncoderIo = 4,
}

/// Byte range of one slave inside an input or output process image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PdoRegion {
    /// Offset from the start of the image [bytes].
    pub offset: usize,
    /// Region length [bytes].
    pub len: usize,
}

impl PdoRegion {
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// First byte past the region. Saturates instead of wrapping.
    #[inline]
    pub const fn end(&self) -> usize {
        self.offset.saturating_add(self.len)
    }

    /// Whether the region lies entirely within an image of `image_len` bytes.
    #[inline]
    pub const fn fits(&self, image_len: usize) -> bool {
        match self.offset.checked_add(self.len) {
            Some(end) => end <= image_len,
            None => false,
        }
    }

    /// Whether two regions share at least one byte.
    #[inline]
    pub const fn overlaps(&self, other: &PdoRegion) -> bool {
        self.len > 0 && other.len > 0 && self.offset < other.end() && other.offset < self.end()
    }
}

/// One slave as seen by the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveConfig {
    /// Position on the bus.
    pub id: u16,
    /// Device kind.
    pub slave_type: SlaveType,
    /// Region in the input image (slave → master).
    pub input: PdoRegion,
    /// Region in the output image (master → slave).
    pub output: PdoRegion,
}

impl SlaveConfig {
    /// Whether the PDO accessors may be used on this slave.
    #[inline]
    pub const fn is_cia402(&self) -> bool {
        matches!(self.slave_type, SlaveType::Cia402Drive)
    }
}
