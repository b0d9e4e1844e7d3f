//! Lattice engine crate.
//!
//! This crate owns the runtime pieces a visualization host builds on: the
//! reducer-based state store and the coordinator that switches between
//! rendering engines.

pub mod logging;
pub mod time;
pub mod store;
pub mod coordinator;

pub use async_trait::async_trait;
