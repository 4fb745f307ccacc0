//! CiA 402 Common Library
//!
//! Shared data model for the network drive workspace: slave topology records,
//! PDO structs, CiA 402 state and word types, motor/profile configuration,
//! logging event types and error types.
//!
//! # Module Structure
//!
//! - [`slave`] - Slave configuration and PDO regions
//! - [`pdo`] - `PdoInput` / `PdoOutput` and their wire layout
//! - [`cia402`] - Drive states, statusword/controlword bits, modes of operation
//! - [`profile`] - Motor constants and profiler configuration
//! - [`log`] - Data logging event types
//! - [`error`] - Error enums and per-drive error flags
//! - [`config`] - TOML configuration loading
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use cia402_common::prelude::*;
//!
//! let out = PdoOutput { controlword: 0x0F, ..Default::default() };
//! assert_eq!(PdoOutput::from_bytes(&out.to_bytes()), out);
//! ```

pub mod cia402;
pub mod config;
pub mod consts;
pub mod error;
pub mod log;
pub mod pdo;
pub mod prelude;
pub mod profile;
pub mod slave;
