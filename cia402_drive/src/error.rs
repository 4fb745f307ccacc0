//! Error types for the drive runtime.
//!
//! Accessor and transition errors are recovered locally by the service;
//! image construction and RT setup errors abort startup.

use cia402_common::error::PdoError;
use thiserror::Error;

/// Errors building a process image from the topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// Two slaves share an id.
    #[error("duplicate slave id {0}")]
    DuplicateSlave(u16),

    /// Two slaves' regions overlap in the same image.
    #[error("{image} regions of slaves {a} and {b} overlap")]
    Overlap {
        image: &'static str,
        a: u16,
        b: u16,
    },

    /// Region past the end of the largest supported image.
    #[error("slave {slave}: {image} region {offset}+{len} exceeds image limit of {limit} bytes")]
    RegionOutOfBounds {
        slave: u16,
        image: &'static str,
        offset: usize,
        len: usize,
        limit: usize,
    },

    /// CiA 402 slave region too small for the PDO struct.
    #[error("slave {slave}: {image} region of {len} bytes cannot hold a {required}-byte PDO")]
    RegionTooSmall {
        slave: u16,
        image: &'static str,
        len: usize,
        required: usize,
    },
}

/// Per-cycle service errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DriveError {
    #[error(transparent)]
    Pdo(#[from] PdoError),
}

/// Errors during RT setup or cycle execution.
#[derive(Debug, Error)]
pub enum CycleError {
    /// RT system call failed.
    #[error("RT setup error: {0}")]
    RtSetup(String),

    /// Cycle exceeded its period.
    #[error("cycle overrun: {actual_ns}ns > {budget_ns}ns budget")]
    Overrun { actual_ns: i64, budget_ns: i64 },
}
