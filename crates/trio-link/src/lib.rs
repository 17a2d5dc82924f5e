//! `trio-link` - program management and workspace sync for Trio motion
//! controllers over their telnet command channel.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Program line checksum (CRC-16).
pub mod checksum;
/// `trio.toml` configuration.
pub mod config;
/// Program, file and system operations on a controller.
pub mod controller;
/// System error flags and EtherCAT state.
pub mod diagnostics;
/// Controller, protocol and workspace errors.
pub mod error;
/// Reply frame parsing.
pub mod framing;
/// Program types and directory listings.
pub mod program;
/// Side channel for controller output.
pub mod report;
/// Command protocol session.
pub mod session;
/// Telnet option negotiation filter.
pub mod telnet;
/// Manifest reconciliation.
pub mod workspace;

pub use controller::{Controller, WriteOptions};
pub use error::TrioError;
pub use session::{Session, SessionOptions};
pub use workspace::{ApplyStatus, Manifest, UploadOptions, Workspace};
