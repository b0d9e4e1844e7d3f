//! In-process pools.
//!
//! No GPU behind them: "resources" are plain values in [`OpaqueHandle`]s. They
//! keep the same sharing and release rules a real pool would, which makes them
//! the reference collaborators for headless hosts and tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use anyhow::bail;
use serde_json::json;

use super::canvas::{CanvasPool, CanvasResource, ContextId};
use super::handle::OpaqueHandle;
use super::resources::{ResourceId, ResourceKind, ResourcePool, ResourceRecord, ShaderSources, TextureOptions};

// ── MemoryResourcePool ────────────────────────────────────────────────────

#[derive(Default)]
struct PoolState {
    next_id: u64,
    live: HashMap<(ResourceKind, String), ResourceRecord>,
    users: HashMap<ResourceId, BTreeSet<String>>,
    released: Vec<ResourceId>,
    detached: Vec<(ResourceId, String)>,
    failing_keys: HashSet<String>,
}

/// Resource pool that shares resources by `(kind, key)`.
#[derive(Default)]
pub struct MemoryResourcePool {
    state: RefCell<PoolState>,
}

impl MemoryResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later creation with this key fail.
    pub fn fail_on(&self, key: &str) {
        self.state.borrow_mut().failing_keys.insert(key.to_string());
    }

    pub fn live_count(&self) -> usize {
        self.state.borrow().live.len()
    }

    /// Ids passed to `release_shared_resource`, in call order.
    pub fn released(&self) -> Vec<ResourceId> {
        self.state.borrow().released.clone()
    }

    /// `(resource, user)` pairs passed to `detach_resource_from_user`, in call order.
    pub fn detached(&self) -> Vec<(ResourceId, String)> {
        self.state.borrow().detached.clone()
    }

    pub fn users_of(&self, id: &ResourceId) -> Vec<String> {
        self.state
            .borrow()
            .users
            .get(id)
            .map(|u| u.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn record(&self, kind: ResourceKind, key: &str) -> Option<ResourceRecord> {
        self.state.borrow().live.get(&(kind, key.to_string())).cloned()
    }

    fn get_or_create(
        &self,
        kind: ResourceKind,
        key: &str,
        context: &ContextId,
        make: impl FnOnce() -> OpaqueHandle,
    ) -> anyhow::Result<ResourceRecord> {
        let mut state = self.state.borrow_mut();
        if state.failing_keys.contains(key) {
            bail!("allocation of {kind:?} `{key}` failed");
        }
        if let Some(existing) = state.live.get(&(kind, key.to_string())) {
            return Ok(existing.clone());
        }

        state.next_id += 1;
        let record = ResourceRecord {
            id: ResourceId(format!("{}-{}", kind_prefix(kind), state.next_id)),
            kind,
            key: key.to_string(),
            handle: make(),
            metadata: json!({ "context": context.0 }),
        };
        state.live.insert((kind, key.to_string()), record.clone());
        log::debug!("created {kind:?} `{key}` as {}", record.id);
        Ok(record)
    }
}

fn kind_prefix(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Buffer => "buf",
        ResourceKind::Texture => "tex",
        ResourceKind::Shader => "prog",
    }
}

impl ResourcePool for MemoryResourcePool {
    fn create_buffer(&self, context: &ContextId, key: &str, data: &[f32]) -> anyhow::Result<ResourceRecord> {
        self.get_or_create(ResourceKind::Buffer, key, context, || OpaqueHandle::new(data.to_vec()))
    }

    fn create_texture(&self, context: &ContextId, key: &str, options: &TextureOptions) -> anyhow::Result<ResourceRecord> {
        self.get_or_create(ResourceKind::Texture, key, context, || OpaqueHandle::new(*options))
    }

    fn create_gradient_texture(&self, context: &ContextId) -> anyhow::Result<ResourceRecord> {
        let options = TextureOptions {
            width: 256,
            height: 1,
            repeat: false,
        };
        self.create_texture(context, "gradient", &options)
    }

    fn create_noise_texture(&self, context: &ContextId) -> anyhow::Result<ResourceRecord> {
        self.create_texture(context, "noise", &TextureOptions::default())
    }

    fn create_shader_suite(
        &self,
        context: &ContextId,
        sources: &ShaderSources,
    ) -> anyhow::Result<BTreeMap<String, ResourceRecord>> {
        sources
            .iter()
            .map(|(name, source)| {
                let record = self.get_or_create(ResourceKind::Shader, name, context, || {
                    OpaqueHandle::new(source.clone())
                })?;
                Ok::<_, anyhow::Error>((name.clone(), record))
            })
            .collect()
    }

    fn attach_resource_to_user(&self, id: &ResourceId, user: &str) {
        self.state
            .borrow_mut()
            .users
            .entry(id.clone())
            .or_default()
            .insert(user.to_string());
    }

    fn detach_resource_from_user(&self, id: &ResourceId, user: &str) {
        let mut state = self.state.borrow_mut();
        state.detached.push((id.clone(), user.to_string()));
        if let Some(users) = state.users.get_mut(id) {
            users.remove(user);
        }
    }

    fn release_shared_resource(&self, kind: ResourceKind, key: &str, resource: &ResourceRecord) {
        let mut state = self.state.borrow_mut();
        state.live.remove(&(kind, key.to_string()));
        state.users.remove(&resource.id);
        state.released.push(resource.id.clone());
        log::debug!("released {kind:?} `{key}` ({})", resource.id);
    }
}

// ── MemoryCanvasPool ──────────────────────────────────────────────────────

/// Stand-in surface produced by [`MemoryCanvasPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySurface {
    pub system: String,
    pub layer: String,
}

#[derive(Default)]
struct CanvasState {
    canvases: HashMap<(String, String), CanvasResource>,
    visible: Option<String>,
    size: (u32, u32),
    switches: Vec<String>,
    failing_surfaces: HashSet<String>,
    failing_switches: HashSet<String>,
}

/// Canvas pool that hands out one surface per `(system, layer)`.
#[derive(Default)]
pub struct MemoryCanvasPool {
    state: RefCell<CanvasState>,
}

impl MemoryCanvasPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes surface acquisition fail for `system`.
    pub fn fail_surfaces(&self, system: &str) {
        self.state.borrow_mut().failing_surfaces.insert(system.to_string());
    }

    /// Makes `switch_to_system(system)` fail.
    pub fn fail_switch(&self, system: &str) {
        self.state.borrow_mut().failing_switches.insert(system.to_string());
    }

    pub fn visible(&self) -> Option<String> {
        self.state.borrow().visible.clone()
    }

    /// Every successful `switch_to_system` target, in order.
    pub fn switches(&self) -> Vec<String> {
        self.state.borrow().switches.clone()
    }

    pub fn size(&self) -> (u32, u32) {
        self.state.borrow().size
    }
}

impl CanvasPool for MemoryCanvasPool {
    fn get_canvas_resources(&self, system: &str, layer: &str) -> anyhow::Result<CanvasResource> {
        let mut state = self.state.borrow_mut();
        if state.failing_surfaces.contains(system) {
            bail!("no surface available for `{system}`");
        }

        let key = (system.to_string(), layer.to_string());
        let resource = state.canvases.entry(key).or_insert_with(|| {
            let surface = MemorySurface {
                system: system.to_string(),
                layer: layer.to_string(),
            };
            CanvasResource {
                canvas: OpaqueHandle::new(surface.clone()),
                context: OpaqueHandle::new(surface),
                context_id: ContextId(format!("{system}:{layer}")),
                is_valid: true,
                key: format!("{system}-{layer}"),
            }
        });
        Ok(resource.clone())
    }

    fn switch_to_system(&self, system: &str) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.failing_switches.contains(system) {
            bail!("surface for `{system}` was lost");
        }
        state.visible = Some(system.to_string());
        state.switches.push(system.to_string());
        Ok(())
    }

    fn handle_resize(&self, width: u32, height: u32) {
        self.state.borrow_mut().size = (width, height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::resources::ShaderSource;

    fn ctx() -> ContextId {
        ContextId("faceted:content".to_string())
    }

    // ── resources ─────────────────────────────────────────────────────────

    #[test]
    fn same_key_shares_one_resource() {
        let pool = MemoryResourcePool::new();
        let a = pool.create_buffer(&ctx(), "quad", &[0.0, 1.0]).unwrap();
        let b = pool.create_buffer(&ctx(), "quad", &[9.0]).unwrap();

        assert_eq!(a.id, b.id);
        assert!(a.handle.same_as(&b.handle));
        assert_eq!(a.handle.downcast_ref::<Vec<f32>>(), Some(&vec![0.0, 1.0]));
        assert_eq!(pool.live_count(), 1);

        // Same key, different kind: distinct.
        let t = pool.create_texture(&ctx(), "quad", &TextureOptions::default()).unwrap();
        assert_ne!(t.id, a.id);
        assert_eq!(pool.live_count(), 2);
    }

    #[test]
    fn shader_suite_creates_one_program_per_name() {
        let pool = MemoryResourcePool::new();
        let sources = ShaderSources::from([
            (
                "main".to_string(),
                ShaderSource {
                    vertex: "v".to_string(),
                    fragment: "f".to_string(),
                },
            ),
            (
                "blur".to_string(),
                ShaderSource {
                    vertex: "v".to_string(),
                    fragment: "b".to_string(),
                },
            ),
        ]);

        let suite = pool.create_shader_suite(&ctx(), &sources).unwrap();
        assert_eq!(suite.keys().collect::<Vec<_>>(), vec!["blur", "main"]);
        assert!(suite.values().all(|r| r.kind == ResourceKind::Shader));
        assert_eq!(
            suite["main"].handle.downcast_ref::<ShaderSource>().map(|s| s.fragment.as_str()),
            Some("f")
        );
    }

    #[test]
    fn release_forgets_resource_and_users() {
        let pool = MemoryResourcePool::new();
        let r = pool.create_noise_texture(&ctx()).unwrap();
        pool.attach_resource_to_user(&r.id, "quantum");
        assert_eq!(pool.users_of(&r.id), vec!["quantum".to_string()]);

        pool.release_shared_resource(r.kind, &r.key, &r);
        assert_eq!(pool.live_count(), 0);
        assert!(pool.users_of(&r.id).is_empty());
        assert_eq!(pool.released(), vec![r.id.clone()]);

        // A later request allocates afresh.
        let again = pool.create_noise_texture(&ctx()).unwrap();
        assert_ne!(again.id, r.id);
    }

    #[test]
    fn injected_failure() {
        let pool = MemoryResourcePool::new();
        pool.fail_on("gradient");
        assert!(pool.create_gradient_texture(&ctx()).is_err());
        assert!(pool.create_noise_texture(&ctx()).is_ok());
    }

    // ── canvases ──────────────────────────────────────────────────────────

    #[test]
    fn canvas_per_system_and_layer() {
        let pool = MemoryCanvasPool::new();
        let a = pool.get_canvas_resources("faceted", "content").unwrap();
        let b = pool.get_canvas_resources("faceted", "content").unwrap();
        let c = pool.get_canvas_resources("quantum", "content").unwrap();

        assert!(a.canvas.same_as(&b.canvas));
        assert!(!a.canvas.same_as(&c.canvas));
        assert_eq!(a.context_id, ContextId("faceted:content".to_string()));
        assert_eq!(
            a.context.downcast_ref::<MemorySurface>(),
            Some(&MemorySurface {
                system: "faceted".to_string(),
                layer: "content".to_string(),
            })
        );
    }

    #[test]
    fn switch_and_resize_are_recorded() {
        let pool = MemoryCanvasPool::new();
        pool.fail_switch("holographic");

        pool.switch_to_system("faceted").unwrap();
        assert!(pool.switch_to_system("holographic").is_err());
        pool.handle_resize(640, 480);

        assert_eq!(pool.visible().as_deref(), Some("faceted"));
        assert_eq!(pool.switches(), vec!["faceted".to_string()]);
        assert_eq!(pool.size(), (640, 480));
    }
}
