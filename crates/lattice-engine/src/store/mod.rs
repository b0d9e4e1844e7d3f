//! Reducer-based state store.
//!
//! - `reducer`: domain registry and the immutable `GlobalState` snapshot
//! - `perf`: per-reducer timing with a bounded sample ring
//! - `persist`: persistence adapters and the persisted envelope
//! - `domains`: the built-in `game`, `visualization` and `system` slices
//! - `store`: `StateStore`, tying the above together

mod action;
pub mod domains;
mod error;
mod perf;
mod persist;
mod reducer;
mod ring;
mod store;

pub use action::Action;
pub use error::StoreError;
pub use perf::{PerformanceSample, SampleCallback};
pub use persist::{
    FileStorage, MemoryStorage, PersistedEnvelope, PersistedGame, PersistedSystem, PersistedVisualization,
    PersistenceAdapter,
};
pub use reducer::{same_slice, GlobalState, Slice};
pub use ring::BoundedRing;
pub use store::{HistoryEntry, StateStore, StoreConfig, Unsubscribe, DEFAULT_CRITICAL_ACTIONS, RESTORE_ACTION};
