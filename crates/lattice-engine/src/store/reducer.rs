use std::any::Any;
use std::fmt;
use std::rc::Rc;

use super::action::Action;
use super::error::StoreError;

/// A type-erased domain slice.
///
/// Slices are immutable; reducers produce a new `Rc` to change one and hand
/// back the input `Rc` to leave it untouched.
pub type Slice = Rc<dyn Any>;

type ErasedReducer = Box<dyn Fn(&Slice, &Action) -> Slice>;

/// True if both slices are the same allocation.
#[inline]
pub fn same_slice(a: &Slice, b: &Slice) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

struct ReducerEntry {
    domain: String,
    reduce: ErasedReducer,
}

/// Domain name -> reducer, in registration order.
#[derive(Default)]
pub(crate) struct ReducerRegistry {
    entries: Vec<ReducerEntry>,
}

impl ReducerRegistry {
    /// Registers a typed reducer and returns its erased initial slice.
    pub(crate) fn register<S, F>(&mut self, domain: &str, reducer: F, initial: S) -> Result<Slice, StoreError>
    where
        S: 'static,
        F: Fn(&Rc<S>, &Action) -> Rc<S> + 'static,
    {
        if self.contains(domain) {
            return Err(StoreError::DuplicateDomain(domain.to_string()));
        }

        let owner = domain.to_string();
        let reduce: ErasedReducer = Box::new(move |slice: &Slice, action: &Action| -> Slice {
            match Rc::clone(slice).downcast::<S>() {
                Ok(typed) => {
                    let next: Slice = reducer(&typed, action);
                    next
                }
                Err(foreign) => {
                    // Only reachable if someone swapped the slice type under us.
                    log::error!("slice for `{owner}` has an unexpected type; reducer skipped");
                    foreign
                }
            }
        });

        self.entries.push(ReducerEntry {
            domain: domain.to_string(),
            reduce,
        });
        let initial: Slice = Rc::new(initial);
        Ok(initial)
    }

    pub(crate) fn contains(&self, domain: &str) -> bool {
        self.entries.iter().any(|e| e.domain == domain)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Runs one domain's reducer.
    pub(crate) fn reduce(&self, index: usize, slice: &Slice, action: &Action) -> Slice {
        (self.entries[index].reduce)(slice, action)
    }

    pub(crate) fn domain(&self, index: usize) -> &str {
        &self.entries[index].domain
    }
}

/// Snapshot of every domain slice, in registration order.
///
/// Never mutated once published: a dispatch that changes anything builds a new
/// `GlobalState`, sharing the untouched slices with the previous one.
#[derive(Clone, Default)]
pub struct GlobalState {
    slices: Vec<(String, Slice)>,
}

impl GlobalState {
    pub fn get(&self, domain: &str) -> Option<&Slice> {
        self.slices
            .iter()
            .find(|(name, _)| name == domain)
            .map(|(_, slice)| slice)
    }

    /// Typed access to a slice. `None` if absent or of a different type.
    pub fn slice<T: 'static>(&self, domain: &str) -> Option<Rc<T>> {
        self.get(domain).and_then(|s| Rc::clone(s).downcast::<T>().ok())
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.slices.iter().map(|(name, _)| name.as_str())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub(crate) fn slice_at(&self, index: usize) -> &Slice {
        &self.slices[index].1
    }

    pub(crate) fn with_appended(&self, domain: &str, slice: Slice) -> Self {
        let mut next = self.clone();
        next.slices.push((domain.to_string(), slice));
        next
    }

    pub(crate) fn with_replaced(&self, changes: Vec<(usize, Slice)>) -> Self {
        let mut next = self.clone();
        for (index, slice) in changes {
            next.slices[index].1 = slice;
        }
        next
    }

    /// Replaces a slice by domain name. Unknown domains are ignored.
    pub(crate) fn with_domain(&self, domain: &str, slice: Slice) -> Self {
        let mut next = self.clone();
        if let Some(entry) = next.slices.iter_mut().find(|(name, _)| name == domain) {
            entry.1 = slice;
        }
        next
    }
}

impl fmt::Debug for GlobalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalState")
            .field("domains", &self.domains().collect::<Vec<_>>())
            .finish()
    }
}
