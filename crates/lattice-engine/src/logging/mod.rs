//! Logging setup.
//!
//! Store and coordinator emit through the `log` facade only; this module is the
//! single place that picks a backend.

mod init;

pub use init::{init_logging, LoggingConfig};
