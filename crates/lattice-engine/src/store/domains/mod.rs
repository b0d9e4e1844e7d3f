//! Built-in domains: typed slices, pure reducers and action constructors.
//!
//! Reducers return their input `Rc` untouched for unrelated actions, for
//! malformed payloads, and for updates that would not change anything, so the
//! store sees those domains as unchanged.

pub mod game;
pub mod system;
pub mod visualization;

use std::rc::Rc;

use serde::de::DeserializeOwned;

use super::action::Action;

/// Applies `edit` to a copy of the slice and keeps the original if nothing
/// changed.
pub(crate) fn update<T, F>(state: &Rc<T>, edit: F) -> Rc<T>
where
    T: Clone + PartialEq,
    F: FnOnce(&mut T),
{
    let mut next = T::clone(state);
    edit(&mut next);
    if next == **state { Rc::clone(state) } else { Rc::new(next) }
}

/// Decodes an action payload, logging and returning `None` on mismatch.
pub(crate) fn payload<T: DeserializeOwned>(action: &Action) -> Option<T> {
    match serde_json::from_value(action.payload.clone()) {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("ignoring {} with unexpected payload {}: {err}", action.kind, action.payload);
            None
        }
    }
}
