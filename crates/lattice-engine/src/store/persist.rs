use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::domains::game::{self, GameState};
use super::domains::system::{self, PerformanceLevel, SystemState};
use super::domains::update;
use super::domains::visualization::{self, Parameters, VisualizationState};
use super::error::StoreError;
use super::reducer::{GlobalState, Slice};

/// Durable key/value storage for the persisted envelope.
pub trait PersistenceAdapter {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

// ── MemoryStorage ─────────────────────────────────────────────────────────

/// In-process storage. Clones share the same map, so a fresh store built on a
/// clone sees what an earlier store wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Rc<RefCell<HashMap<String, String>>>,
    writes: Rc<Cell<usize>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set` calls across all clones.
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    /// Writes a raw value, bypassing the write counter.
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.entries.borrow_mut().insert(key.to_string(), value.to_string());
    }
}

impl PersistenceAdapter for MemoryStorage {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.raw(key))
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.insert_raw(key, value);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }
}

// ── FileStorage ───────────────────────────────────────────────────────────

/// One file per key inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Creates `dir` if needed.
    pub fn open(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create storage dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl PersistenceAdapter for FileStorage {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        // Write-then-rename so a crash never leaves a torn envelope behind.
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("failed to replace {}", path.display()))
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
        }
    }
}

// ── Envelope ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedGame {
    pub score: u64,
    pub level: u32,
    pub sublevel: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedVisualization {
    pub active_system: String,
    #[serde(default)]
    pub parameters: Parameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSystem {
    pub performance_level: PerformanceLevel,
}

/// The hand-picked subset of global state that survives a session.
///
/// Sections are optional so a store without one of the built-in domains still
/// round-trips the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game: Option<PersistedGame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization: Option<PersistedVisualization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<PersistedSystem>,
}

impl PersistedEnvelope {
    /// Projects the persisted fields out of `state`.
    pub fn capture(state: &GlobalState) -> Self {
        Self {
            game: state.slice::<GameState>(game::DOMAIN).map(|g| PersistedGame {
                score: g.score,
                level: g.level,
                sublevel: g.sublevel,
            }),
            visualization: state
                .slice::<VisualizationState>(visualization::DOMAIN)
                .map(|v| PersistedVisualization {
                    active_system: v.active_system.clone(),
                    parameters: v.parameters.clone(),
                }),
            system: state.slice::<SystemState>(system::DOMAIN).map(|s| PersistedSystem {
                performance_level: s.performance_level,
            }),
        }
    }

    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string(self).map_err(StoreError::Serialization)
    }

    pub fn from_json(raw: &str) -> Result<Self, StoreError> {
        serde_json::from_str(raw).map_err(StoreError::MalformedPersistedState)
    }

    /// Overlays the persisted fields onto `state`.
    ///
    /// Only the persisted fields of each slice change; everything else keeps
    /// its current value. Returns `None` when nothing differs.
    pub fn merge_into(&self, state: &GlobalState) -> Option<GlobalState> {
        let mut next = state.clone();
        let mut changed = false;

        if let (Some(p), Some(current)) = (&self.game, state.slice::<GameState>(game::DOMAIN)) {
            let merged = update(&current, |g| {
                g.score = p.score;
                g.level = p.level;
                g.sublevel = p.sublevel;
            });
            changed |= replace(&mut next, game::DOMAIN, &current, merged);
        }

        if let (Some(p), Some(current)) = (
            &self.visualization,
            state.slice::<VisualizationState>(visualization::DOMAIN),
        ) {
            let merged = update(&current, |v| {
                v.active_system = p.active_system.clone();
                v.parameters.extend(p.parameters.iter().map(|(k, x)| (k.clone(), *x)));
            });
            changed |= replace(&mut next, visualization::DOMAIN, &current, merged);
        }

        if let (Some(p), Some(current)) = (&self.system, state.slice::<SystemState>(system::DOMAIN)) {
            let merged = update(&current, |s| s.performance_level = p.performance_level);
            changed |= replace(&mut next, system::DOMAIN, &current, merged);
        }

        changed.then_some(next)
    }
}

fn replace<T: 'static>(state: &mut GlobalState, domain: &str, current: &Rc<T>, merged: Rc<T>) -> bool {
    if Rc::ptr_eq(current, &merged) {
        return false;
    }
    let slice: Slice = merged;
    *state = state.with_domain(domain, slice);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_storage_round_trip() {
        let dir = std::env::temp_dir().join(format!("lattice-storage-{}", std::process::id()));
        let storage = FileStorage::open(&dir).unwrap();

        assert_eq!(storage.get("lattice/state").unwrap(), None);
        storage.set("lattice/state", "{\"a\":1}").unwrap();
        assert_eq!(storage.get("lattice/state").unwrap().as_deref(), Some("{\"a\":1}"));
        storage.remove("lattice/state").unwrap();
        storage.remove("lattice/state").unwrap();
        assert_eq!(storage.get("lattice/state").unwrap(), None);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn memory_storage_clones_share_entries() {
        let a = MemoryStorage::new();
        let b = a.clone();
        a.set("k", "v").unwrap();
        assert_eq!(b.get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(b.write_count(), 1);
    }

    #[test]
    fn envelope_wire_shape() {
        let envelope = PersistedEnvelope {
            game: Some(PersistedGame { score: 1, level: 2, sublevel: 3 }),
            visualization: Some(PersistedVisualization {
                active_system: "quantum".into(),
                parameters: Parameters::from([("chaos".to_string(), 0.5)]),
            }),
            system: Some(PersistedSystem { performance_level: PerformanceLevel::Low }),
        };
        let value: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "game": { "score": 1, "level": 2, "sublevel": 3 },
                "visualization": { "activeSystem": "quantum", "parameters": { "chaos": 0.5 } },
                "system": { "performanceLevel": "low" }
            })
        );
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            PersistedEnvelope::from_json("{not json"),
            Err(StoreError::MalformedPersistedState(_))
        ));
        assert!(matches!(
            PersistedEnvelope::from_json(r#"{"game": {"score": "many"}}"#),
            Err(StoreError::MalformedPersistedState(_))
        ));
    }

    #[test]
    fn merge_without_matching_domains_is_none() {
        let envelope = PersistedEnvelope {
            game: Some(PersistedGame { score: 1, level: 1, sublevel: 0 }),
            ..Default::default()
        };
        assert!(envelope.merge_into(&GlobalState::default()).is_none());
    }
}
