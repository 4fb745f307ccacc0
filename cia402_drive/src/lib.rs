//! # CiA 402 Network Drive
//!
//! Master-side runtime for CiA 402 drives on a cyclic fieldbus. Provides
//! typed PDO access into a shared process image, the drive state machine,
//! and a per-drive service that runs once per cycle.
//!
//! ## Layers
//!
//! 1. **pdo**: process image and typed accessors per slave
//! 2. **state**: statusword decoding and controlword generation
//! 3. **profile**: setpoint limiting per cycle
//! 4. **service**: per-drive cycle tying the above to its collaborators
//! 5. **cycle**: periodic threads, RT setup, overrun detection
//!
//! ## Data Flow
//!
//! ```text
//! transport ──inputs──► ProcessImage ──PdoInput──► NetworkDriveService
//!     ▲                                                  │
//!     └──────outputs──── ProcessImage ◄──PdoOutput───────┘
//! ```
//!
//! Each slave's input region is written only by the transport and its
//! output region only by its drive task.

pub mod control;
pub mod cycle;
pub mod error;
pub mod interfaces;
pub mod logging;
pub mod pdo;
pub mod profile;
pub mod service;
pub mod sim;
pub mod state;
