use std::collections::BTreeMap;

use super::resources::{ResourceId, ResourceRecord};

struct LedgerEntry {
    record: ResourceRecord,
    /// Owner -> attachment count.
    owners: BTreeMap<String, usize>,
}

impl LedgerEntry {
    fn ref_count(&self) -> usize {
        self.owners.values().sum()
    }
}

/// Outcome of a single detach.
#[derive(Debug)]
pub enum Detach {
    /// `(resource, owner)` was not attached.
    NotAttached,
    /// Other attachments remain.
    Retained(usize),
    /// That was the last attachment; the caller releases the resource.
    Released(ResourceRecord),
}

/// Multiset of `(resource, owner)` attachments.
///
/// A resource attached N times needs N detaches before it is handed back for
/// release; [`AttachmentLedger::drain`] bypasses the counts for teardown.
#[derive(Default)]
pub struct AttachmentLedger {
    entries: BTreeMap<ResourceId, LedgerEntry>,
}

impl AttachmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one attachment and returns the resource's total count.
    pub fn attach(&mut self, record: &ResourceRecord, owner: &str) -> usize {
        let entry = self
            .entries
            .entry(record.id.clone())
            .or_insert_with(|| LedgerEntry {
                record: record.clone(),
                owners: BTreeMap::new(),
            });
        *entry.owners.entry(owner.to_string()).or_insert(0) += 1;
        entry.ref_count()
    }

    /// Removes one attachment of `owner` to `id`.
    pub fn detach(&mut self, id: &ResourceId, owner: &str) -> Detach {
        let Some(entry) = self.entries.get_mut(id) else {
            return Detach::NotAttached;
        };
        let Some(count) = entry.owners.get_mut(owner) else {
            return Detach::NotAttached;
        };

        *count -= 1;
        if *count == 0 {
            entry.owners.remove(owner);
        }

        let remaining = entry.ref_count();
        if remaining > 0 {
            return Detach::Retained(remaining);
        }

        match self.entries.remove(id) {
            Some(entry) => Detach::Released(entry.record),
            None => Detach::NotAttached,
        }
    }

    /// Removes every attachment held by `owner`.
    ///
    /// Returns each `(resource id, times it was attached by owner)` pair and the
    /// records whose count dropped to zero.
    pub fn detach_owner(&mut self, owner: &str) -> (Vec<(ResourceId, usize)>, Vec<ResourceRecord>) {
        let mut detached = Vec::new();
        let mut released = Vec::new();

        let ids: Vec<ResourceId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.owners.contains_key(owner))
            .map(|(id, _)| id.clone())
            .collect();

        for id in ids {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            let count = entry.owners.remove(owner).unwrap_or(0);
            detached.push((id.clone(), count));

            if entry.owners.is_empty() {
                if let Some(entry) = self.entries.remove(&id) {
                    released.push(entry.record);
                }
            }
        }

        (detached, released)
    }

    pub fn ref_count(&self, id: &ResourceId) -> usize {
        self.entries.get(id).map_or(0, LedgerEntry::ref_count)
    }

    pub fn owners(&self, id: &ResourceId) -> Vec<String> {
        self.entries
            .get(id)
            .map(|e| e.owners.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Resources `owner` currently holds.
    pub fn resources_of(&self, owner: &str) -> Vec<ResourceId> {
        self.entries
            .iter()
            .filter(|(_, e)| e.owners.contains_key(owner))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Empties the ledger, returning each tracked resource exactly once.
    pub fn drain(&mut self) -> Vec<ResourceRecord> {
        std::mem::take(&mut self.entries)
            .into_values()
            .map(|e| e.record)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
