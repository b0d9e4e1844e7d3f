use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use anyhow::{anyhow, Context};
use serde_json::Value;

use super::canvas::{CanvasPool, CanvasResource, ContextId};
use super::engine::{Capability, Engine, EngineContext, EngineFactory, EngineState};
use super::error::CoordinatorError;
use super::ledger::{AttachmentLedger, Detach};
use super::resources::{ResourceId, ResourcePool, ResourceRecord, ResourceRequirements, SharedResources};
use crate::store::domains::visualization::{self, Parameters};
use crate::store::StateStore;

pub type ErrorCallback = Rc<dyn Fn(&CoordinatorError)>;

/// Layers every engine gets a surface for, back to front.
pub const DEFAULT_LAYERS: [&str; 5] = ["background", "shadow", "content", "highlight", "accent"];

#[derive(Clone)]
pub struct CoordinatorConfig {
    /// Canvas layers requested per engine.
    pub layers: Vec<String>,
    /// Layer whose context shared resources are created against.
    pub primary_layer: String,
    /// Receives every recovered error (hook failures, unknown targets, ...).
    pub on_error: ErrorCallback,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            layers: DEFAULT_LAYERS.iter().map(|s| s.to_string()).collect(),
            primary_layer: "content".to_string(),
            on_error: Rc::new(|_| {}),
        }
    }
}

impl fmt::Debug for CoordinatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorConfig")
            .field("layers", &self.layers)
            .field("primary_layer", &self.primary_layer)
            .finish_non_exhaustive()
    }
}

struct EngineSlot {
    name: String,
    factory: EngineFactory,
    instance: Option<Box<dyn Engine>>,
    state: EngineState,
}

/// Owns the registered engines and keeps exactly one of them active.
///
/// Lifecycle calls that reach into engine hooks are `async` and take
/// `&mut self`, so switches are serialized by construction: a switch runs to
/// completion, successfully or not, before the next one can start.
pub struct EngineCoordinator {
    config: CoordinatorConfig,
    store: StateStore,
    resources: Rc<dyn ResourcePool>,
    canvases: Rc<dyn CanvasPool>,
    slots: Vec<EngineSlot>,
    active: Option<usize>,
    ledger: AttachmentLedger,
}

impl EngineCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        store: StateStore,
        resources: Rc<dyn ResourcePool>,
        canvases: Rc<dyn CanvasPool>,
    ) -> Self {
        Self {
            config,
            store,
            resources,
            canvases,
            slots: Vec::new(),
            active: None,
            ledger: AttachmentLedger::new(),
        }
    }

    fn report(&self, err: CoordinatorError) {
        log::error!("{err}");
        (self.config.on_error)(&err);
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }

    // ── Registration ──────────────────────────────────────────────────────

    pub fn register_engine(&mut self, name: &str, factory: EngineFactory) -> Result<(), CoordinatorError> {
        if self.index_of(name).is_some() {
            return Err(CoordinatorError::DuplicateEngine(name.to_string()));
        }
        self.slots.push(EngineSlot {
            name: name.to_string(),
            factory,
            instance: None,
            state: EngineState::Registered,
        });
        log::debug!("registered engine `{name}`");
        Ok(())
    }

    // ── Initialization ────────────────────────────────────────────────────

    /// Builds and initializes every engine still in `Registered` state.
    ///
    /// Failures are reported per engine and do not stop the others. Returns the
    /// number of engines brought up by this call.
    pub async fn initialize(&mut self) -> usize {
        let mut ready = 0;
        for index in 0..self.slots.len() {
            if self.slots[index].state != EngineState::Registered {
                continue;
            }
            match self.bring_up(index).await {
                Ok(()) => ready += 1,
                Err(err) => {
                    self.slots[index].state = EngineState::Failed;
                    self.report(err);
                }
            }
        }
        log::info!("{ready} engine(s) initialized, {} registered", self.slots.len());
        ready
    }

    async fn bring_up(&mut self, index: usize) -> Result<(), CoordinatorError> {
        let name = self.slots[index].name.clone();
        let requirements = self.slots[index].factory.requirements().clone();

        let canvases = self.acquire_canvases(&name)?;
        let context = canvases
            .get(&self.config.primary_layer)
            .map(|c| c.context_id.clone())
            .ok_or_else(|| CoordinatorError::ResourceAcquisition {
                engine: name.clone(),
                error: anyhow!("primary layer `{}` is not configured", self.config.primary_layer),
            })?;

        let resources = match self.acquire_resources(&name, &context, &requirements) {
            Ok(resources) => resources,
            Err(error) => {
                self.release_owner(&name);
                return Err(CoordinatorError::ResourceAcquisition { engine: name, error });
            }
        };

        let ctx = EngineContext {
            name: name.clone(),
            canvases,
            resources,
        };
        let mut engine = match self.slots[index].factory.build(ctx) {
            Ok(engine) => engine,
            Err(error) => {
                self.release_owner(&name);
                return Err(CoordinatorError::hook(&name, "construct", error));
            }
        };

        if engine.supports(Capability::Initialize) {
            if let Err(error) = engine.initialize().await {
                if engine.supports(Capability::Destroy) {
                    engine.destroy();
                }
                self.release_owner(&name);
                return Err(CoordinatorError::hook(&name, "initialize", error));
            }
        }

        let slot = &mut self.slots[index];
        slot.instance = Some(engine);
        slot.state = EngineState::Initialized;
        log::debug!("engine `{name}` initialized with {} shared resource(s)", self.ledger.resources_of(&name).len());
        Ok(())
    }

    fn acquire_canvases(&self, name: &str) -> Result<BTreeMap<String, CanvasResource>, CoordinatorError> {
        let mut canvases = BTreeMap::new();
        for layer in &self.config.layers {
            let canvas = self
                .canvases
                .get_canvas_resources(name, layer)
                .with_context(|| format!("canvas layer `{layer}`"))
                .and_then(|canvas| {
                    anyhow::ensure!(canvas.is_valid, "canvas layer `{layer}` is not valid");
                    Ok(canvas)
                })
                .map_err(|error| CoordinatorError::ResourceAcquisition {
                    engine: name.to_string(),
                    error,
                })?;
            canvases.insert(layer.clone(), canvas);
        }
        Ok(canvases)
    }

    /// Requests every declared resource, attaching each as it arrives.
    ///
    /// On error the caller rolls back whatever was attached for `name`.
    fn acquire_resources(
        &mut self,
        name: &str,
        context: &ContextId,
        requirements: &ResourceRequirements,
    ) -> anyhow::Result<SharedResources> {
        let mut shared = SharedResources::default();

        for req in &requirements.buffers {
            let record = self
                .resources
                .create_buffer(context, &req.key, &req.data)
                .with_context(|| format!("buffer `{}`", req.key))?;
            self.attach(&record, name);
            shared.buffers.insert(req.key.clone(), record);
        }

        for req in &requirements.textures {
            let record = self
                .resources
                .create_texture(context, &req.key, &req.options)
                .with_context(|| format!("texture `{}`", req.key))?;
            self.attach(&record, name);
            shared.textures.insert(req.key.clone(), record);
        }

        if requirements.gradient_texture {
            let record = self.resources.create_gradient_texture(context).context("gradient texture")?;
            self.attach(&record, name);
            shared.gradient = Some(record);
        }

        if requirements.noise_texture {
            let record = self.resources.create_noise_texture(context).context("noise texture")?;
            self.attach(&record, name);
            shared.noise = Some(record);
        }

        if !requirements.shaders.is_empty() {
            let suite = self
                .resources
                .create_shader_suite(context, &requirements.shaders)
                .context("shader suite")?;
            for record in suite.values() {
                self.attach(record, name);
            }
            shared.shaders = suite;
        }

        Ok(shared)
    }

    fn attach(&mut self, record: &ResourceRecord, owner: &str) {
        let count = self.ledger.attach(record, owner);
        self.resources.attach_resource_to_user(&record.id, owner);
        log::trace!("{} attached to `{owner}` (refs {count})", record.id);
    }

    fn release(&self, record: &ResourceRecord) {
        self.resources.release_shared_resource(record.kind, &record.key, record);
    }

    /// Drops every attachment `owner` holds, releasing resources nobody else uses.
    fn release_owner(&mut self, owner: &str) {
        let (detached, released) = self.ledger.detach_owner(owner);
        // One pool detach per ledger attachment.
        for (id, count) in &detached {
            for _ in 0..*count {
                self.resources.detach_resource_from_user(id, owner);
            }
        }
        for record in &released {
            self.release(record);
        }
    }

    /// Removes one attachment of `engine` to `id`.
    ///
    /// The resource is released once its last attachment goes. Returns `false`
    /// if the pair was not attached.
    pub fn detach_resource(&mut self, id: &ResourceId, engine: &str) -> bool {
        match self.ledger.detach(id, engine) {
            Detach::NotAttached => false,
            Detach::Retained(_) => {
                if !self.ledger.owners(id).iter().any(|o| o == engine) {
                    self.resources.detach_resource_from_user(id, engine);
                }
                true
            }
            Detach::Released(record) => {
                self.resources.detach_resource_from_user(id, engine);
                self.release(&record);
                true
            }
        }
    }

    // ── Switching ─────────────────────────────────────────────────────────

    /// Makes `name` the single active engine.
    ///
    /// Returns `false` and leaves the previous engine active if the target is
    /// unknown or unavailable, the current engine's `deactivate` fails, or the
    /// canvas pool cannot switch surfaces.
    pub async fn switch_engine(&mut self, name: &str) -> bool {
        let Some(target) = self.index_of(name) else {
            self.report(CoordinatorError::UnknownEngine(name.to_string()));
            return false;
        };

        let state = self.slots[target].state;
        if !state.is_live() {
            self.report(CoordinatorError::EngineUnavailable {
                name: name.to_string(),
                state,
            });
            return false;
        }

        if self.active == Some(target) {
            log::debug!("`{name}` is already active");
            return true;
        }

        self.store.dispatch(visualization::set_transitioning(true));

        let previous = self.active;
        if let Some(prev) = previous {
            if let Err(err) = self.deactivate_slot(prev).await {
                self.report(err);
                self.store.dispatch(visualization::set_transitioning(false));
                return false;
            }
        }

        if let Err(error) = self.canvases.switch_to_system(name) {
            self.report(CoordinatorError::CanvasSwitch {
                engine: name.to_string(),
                error,
            });
            // Surfaces never moved, so the previous engine can simply resume.
            if let Some(prev) = previous {
                self.activate_slot(prev);
            }
            self.store.dispatch(visualization::set_transitioning(false));
            return false;
        }

        self.activate_slot(target);
        self.store.dispatch(visualization::switch_system(name));
        log::info!("switched to engine `{name}`");
        true
    }

    async fn deactivate_slot(&mut self, index: usize) -> Result<(), CoordinatorError> {
        let slot = &mut self.slots[index];
        if let Some(engine) = slot.instance.as_mut() {
            if engine.supports(Capability::Deactivate) {
                engine
                    .deactivate()
                    .await
                    .map_err(|error| CoordinatorError::hook(&slot.name, "deactivate", error))?;
            }
            engine.set_active(false);
        }
        slot.state = EngineState::Inactive;
        self.active = None;
        Ok(())
    }

    fn activate_slot(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        if let Some(engine) = slot.instance.as_mut() {
            engine.set_active(true);
        }
        slot.state = EngineState::Active;
        self.active = Some(index);
    }

    // ── Commands ──────────────────────────────────────────────────────────

    /// Sends `params` to `target`, or to the active engine when `target` is `None`.
    ///
    /// Returns whether an engine accepted them.
    pub fn apply_parameters(&mut self, params: &Parameters, target: Option<&str>) -> bool {
        let index = match target {
            Some(name) => match self.index_of(name) {
                Some(index) => index,
                None => {
                    self.report(CoordinatorError::UnknownEngine(name.to_string()));
                    return false;
                }
            },
            None => match self.active {
                Some(index) => index,
                None => {
                    self.report(CoordinatorError::NoActiveEngine);
                    return false;
                }
            },
        };

        let slot = &mut self.slots[index];
        let outcome = match slot.instance.as_mut() {
            Some(engine) if engine.supports(Capability::Parameters) => engine
                .set_parameters(params)
                .map(|()| true)
                .map_err(|error| CoordinatorError::hook(&slot.name, "setParameters", error)),
            Some(_) => {
                log::debug!("engine `{}` does not take parameters", slot.name);
                Ok(false)
            }
            None => Err(CoordinatorError::EngineUnavailable {
                name: slot.name.clone(),
                state: slot.state,
            }),
        };

        outcome.unwrap_or_else(|err| {
            self.report(err);
            false
        })
    }

    /// Calls hook `hook` on every engine that supports it.
    ///
    /// Returns `true` if at least one engine handled it.
    pub fn broadcast(&mut self, hook: &str, payload: &Value) -> bool {
        let mut handled = false;
        let mut failures = Vec::new();

        for slot in &mut self.slots {
            let Some(engine) = slot.instance.as_mut() else {
                continue;
            };
            if !engine.supports(Capability::Hook(hook)) {
                continue;
            }
            match engine.call_hook(hook, payload) {
                Ok(()) => handled = true,
                Err(error) => failures.push(CoordinatorError::hook(&slot.name, hook, error)),
            }
        }

        for err in failures {
            self.report(err);
        }
        handled
    }

    /// Resizes the canvas pool, then the active engine.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.canvases.handle_resize(width, height);
        if let Some(engine) = self.active_instance() {
            if engine.supports(Capability::Resize) {
                engine.handle_resize(width, height);
            }
        }
    }

    /// Renders one frame with the active engine.
    pub fn render(&mut self, timestamp: f64) {
        if let Some(engine) = self.active_instance() {
            if engine.supports(Capability::Render) {
                engine.render(timestamp);
            }
        }
    }

    fn active_instance(&mut self) -> Option<&mut Box<dyn Engine>> {
        let index = self.active?;
        self.slots[index].instance.as_mut()
    }

    /// Snapshot of an engine's internal state, if it supports saving.
    pub async fn save_engine_state(&mut self, name: &str) -> Option<Value> {
        let Some(index) = self.index_of(name) else {
            self.report(CoordinatorError::UnknownEngine(name.to_string()));
            return None;
        };

        let slot = &mut self.slots[index];
        let engine = slot.instance.as_mut()?;
        if !engine.supports(Capability::SaveState) {
            return None;
        }
        let result = engine.save_state().await;
        match result {
            Ok(state) => Some(state),
            Err(error) => {
                let err = CoordinatorError::hook(name, "saveState", error);
                self.report(err);
                None
            }
        }
    }

    /// Hands a previously saved snapshot back to an engine.
    pub async fn restore_engine_state(&mut self, name: &str, state: Value) -> bool {
        let Some(index) = self.index_of(name) else {
            self.report(CoordinatorError::UnknownEngine(name.to_string()));
            return false;
        };

        let Some(engine) = self.slots[index].instance.as_mut() else {
            return false;
        };
        if !engine.supports(Capability::RestoreState) {
            return false;
        }
        match engine.restore_state(state).await {
            Ok(()) => true,
            Err(error) => {
                self.report(CoordinatorError::hook(name, "restoreState", error));
                false
            }
        }
    }

    // ── Introspection ─────────────────────────────────────────────────────

    /// The live instance registered as `name`.
    pub fn engine(&self, name: &str) -> Option<&dyn Engine> {
        let index = self.index_of(name)?;
        self.slots[index].instance.as_deref()
    }

    pub fn engine_state(&self, name: &str) -> Option<EngineState> {
        self.index_of(name).map(|i| self.slots[i].state)
    }

    pub fn active_engine(&self) -> Option<&str> {
        self.active.map(|i| self.slots[i].name.as_str())
    }

    /// Registered names, in registration order.
    pub fn engine_names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn ledger(&self) -> &AttachmentLedger {
        &self.ledger
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    // ── Teardown ──────────────────────────────────────────────────────────

    /// Deactivates the active engine, destroys every engine, and releases each
    /// shared resource exactly once regardless of outstanding attachments.
    pub async fn destroy(&mut self) {
        if let Some(index) = self.active {
            if let Err(err) = self.deactivate_slot(index).await {
                self.report(err);
            }
        }

        for slot in &mut self.slots {
            if let Some(mut engine) = slot.instance.take() {
                if engine.is_active() {
                    engine.set_active(false);
                }
                if engine.supports(Capability::Destroy) {
                    engine.destroy();
                }
            }
            slot.state = EngineState::Destroyed;
        }
        self.active = None;

        let records = self.ledger.drain();
        for record in &records {
            self.release(record);
        }
        log::info!("coordinator destroyed, {} shared resource(s) released", records.len());
    }
}

impl fmt::Debug for EngineCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineCoordinator")
            .field("engines", &self.engine_names())
            .field("active", &self.active_engine())
            .field("attached_resources", &self.ledger.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use async_trait::async_trait;
    use pollster::block_on;
    use serde_json::json;

    use super::*;
    use crate::coordinator::memory::{MemoryCanvasPool, MemoryResourcePool};
    use crate::coordinator::resources::ResourceKind;
    use crate::store::{MemoryStorage, StoreConfig};
    use crate::time::ManualScheduler;

    type Calls = Rc<RefCell<Vec<String>>>;

    #[derive(Default, Clone)]
    struct Script {
        fail_init: bool,
        fail_deactivate: bool,
        no_parameters: bool,
        hooks: Vec<&'static str>,
    }

    struct StubEngine {
        name: String,
        active: bool,
        calls: Calls,
        script: Script,
        saved: Value,
    }

    impl StubEngine {
        fn log(&self, what: &str) {
            self.calls.borrow_mut().push(format!("{}:{what}", self.name));
        }
    }

    #[async_trait(?Send)]
    impl Engine for StubEngine {
        fn supports(&self, capability: Capability<'_>) -> bool {
            match capability {
                Capability::Parameters => !self.script.no_parameters,
                Capability::Hook(hook) => self.script.hooks.iter().any(|h| *h == hook),
                _ => true,
            }
        }

        fn set_active(&mut self, active: bool) {
            self.active = active;
            self.log(if active { "on" } else { "off" });
        }

        fn is_active(&self) -> bool {
            self.active
        }

        async fn initialize(&mut self) -> anyhow::Result<()> {
            self.log("init");
            anyhow::ensure!(!self.script.fail_init, "shader compile failed");
            Ok(())
        }

        async fn deactivate(&mut self) -> anyhow::Result<()> {
            self.log("deactivate");
            anyhow::ensure!(!self.script.fail_deactivate, "context lost");
            Ok(())
        }

        async fn save_state(&mut self) -> anyhow::Result<Value> {
            Ok(self.saved.clone())
        }

        async fn restore_state(&mut self, state: Value) -> anyhow::Result<()> {
            self.saved = state;
            Ok(())
        }

        fn handle_resize(&mut self, width: u32, height: u32) {
            self.log(&format!("resize {width}x{height}"));
        }

        fn render(&mut self, timestamp: f64) {
            self.log(&format!("render {timestamp}"));
        }

        fn set_parameters(&mut self, params: &Parameters) -> anyhow::Result<()> {
            self.log(&format!("params {}", params.len()));
            Ok(())
        }

        fn call_hook(&mut self, hook: &str, payload: &Value) -> anyhow::Result<()> {
            anyhow::ensure!(!payload.is_null(), "hook `{hook}` needs a payload");
            self.log(&format!("hook {hook}"));
            Ok(())
        }

        fn destroy(&mut self) {
            self.log("destroy");
        }
    }

    fn stub(calls: &Calls, script: Script) -> EngineFactory {
        let calls = Rc::clone(calls);
        EngineFactory::new(move |ctx: EngineContext| {
            Ok(StubEngine {
                name: ctx.name,
                active: false,
                calls: Rc::clone(&calls),
                script: script.clone(),
                saved: Value::Null,
            })
        })
    }

    struct Rig {
        coord: EngineCoordinator,
        store: StateStore,
        pool: Rc<MemoryResourcePool>,
        canvases: Rc<MemoryCanvasPool>,
        calls: Calls,
        errors: Rc<RefCell<Vec<String>>>,
    }

    fn rig() -> Rig {
        let store = StateStore::with_default_domains(
            StoreConfig::default(),
            Rc::new(MemoryStorage::new()),
            Rc::new(ManualScheduler::new()),
        );
        let pool = Rc::new(MemoryResourcePool::new());
        let canvases = Rc::new(MemoryCanvasPool::new());
        let errors = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&errors);
        let config = CoordinatorConfig {
            on_error: Rc::new(move |err| sink.borrow_mut().push(err.to_string())),
            ..CoordinatorConfig::default()
        };
        let coord = EngineCoordinator::new(config, store.clone(), pool.clone(), canvases.clone());
        Rig {
            coord,
            store,
            pool,
            canvases,
            calls: Rc::new(RefCell::new(Vec::new())),
            errors,
        }
    }

    fn shared_quad() -> ResourceRequirements {
        ResourceRequirements::default()
            .buffer("quad", vec![-1.0, -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0])
            .gradient()
    }

    fn two_engines() -> Rig {
        let mut rig = rig();
        rig.coord
            .register_engine("faceted", stub(&rig.calls, Script::default()).with_requirements(shared_quad()))
            .unwrap();
        rig.coord
            .register_engine(
                "quantum",
                stub(&rig.calls, Script::default())
                    .with_requirements(shared_quad().noise().shader("lattice", "void main() {}", "void main() {}")),
            )
            .unwrap();
        assert_eq!(block_on(rig.coord.initialize()), 2);
        rig.calls.borrow_mut().clear();
        rig
    }

    fn is_active(rig: &Rig, name: &str) -> bool {
        rig.coord.engine(name).map(|e| e.is_active()).unwrap_or(false)
    }

    // ── registration / init ───────────────────────────────────────────────

    #[test]
    fn duplicate_engine_rejected() {
        let mut rig = rig();
        rig.coord.register_engine("faceted", stub(&rig.calls, Script::default())).unwrap();
        let err = rig
            .coord
            .register_engine("faceted", stub(&rig.calls, Script::default()))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::DuplicateEngine(ref n) if n == "faceted"));
    }

    #[test]
    fn initialize_attaches_shared_resources_per_engine() {
        let rig = two_engines();
        let quad = rig.pool.record(ResourceKind::Buffer, "quad").unwrap();
        let noise = rig.pool.record(ResourceKind::Texture, "noise").unwrap();

        assert_eq!(rig.coord.ledger().ref_count(&quad.id), 2);
        assert_eq!(rig.coord.ledger().ref_count(&noise.id), 1);
        assert_eq!(rig.coord.ledger().resources_of("quantum").len(), 4);
        assert!(rig.pool.record(ResourceKind::Shader, "lattice").is_some());
        assert_eq!(rig.pool.users_of(&quad.id), vec!["faceted".to_string(), "quantum".to_string()]);
        assert_eq!(rig.coord.engine_state("faceted"), Some(EngineState::Initialized));
        assert!(rig.coord.active_engine().is_none());
    }

    #[test]
    fn failing_engine_does_not_block_others() {
        let mut rig = rig();
        rig.coord
            .register_engine("faceted", stub(&rig.calls, Script::default()).with_requirements(shared_quad()))
            .unwrap();
        rig.coord
            .register_engine(
                "broken",
                stub(&rig.calls, Script { fail_init: true, ..Script::default() })
                    .with_requirements(shared_quad().texture("broken-only", Default::default())),
            )
            .unwrap();

        assert_eq!(block_on(rig.coord.initialize()), 1);
        assert_eq!(rig.coord.engine_state("broken"), Some(EngineState::Failed));
        assert_eq!(rig.coord.engine_state("faceted"), Some(EngineState::Initialized));
        assert!(rig.coord.engine("broken").is_none());
        assert!(rig.calls.borrow().contains(&"broken:destroy".to_string()));

        // Exclusive texture released, shared quad kept for faceted.
        let quad = rig.pool.record(ResourceKind::Buffer, "quad").unwrap();
        assert_eq!(rig.coord.ledger().owners(&quad.id), vec!["faceted".to_string()]);
        assert!(rig.pool.record(ResourceKind::Texture, "broken-only").is_none());
        assert_eq!(rig.pool.released().len(), 1);

        assert!(!block_on(rig.coord.switch_engine("broken")));
        assert_eq!(rig.errors.borrow().len(), 2);
    }

    #[test]
    fn construction_failure_rolls_back_resources() {
        let mut rig = rig();
        rig.coord
            .register_engine("faceted", stub(&rig.calls, Script::default()).with_requirements(shared_quad()))
            .unwrap();
        rig.coord
            .register_engine(
                "ghost",
                EngineFactory::new(|_: EngineContext| Err::<StubEngine, _>(anyhow!("no adapter")))
                    .with_requirements(shared_quad().texture("ghost-only", Default::default())),
            )
            .unwrap();

        assert_eq!(block_on(rig.coord.initialize()), 1);
        assert_eq!(rig.coord.engine_state("ghost"), Some(EngineState::Failed));
        assert!(rig.coord.engine("ghost").is_none());
        assert_eq!(
            *rig.errors.borrow(),
            vec!["engine `ghost` failed in `construct`: no adapter".to_string()]
        );

        let quad = rig.pool.record(ResourceKind::Buffer, "quad").unwrap();
        assert_eq!(rig.coord.ledger().owners(&quad.id), vec!["faceted".to_string()]);
        assert_eq!(rig.pool.users_of(&quad.id), vec!["faceted".to_string()]);
        assert!(rig.pool.record(ResourceKind::Texture, "ghost-only").is_none());
        assert_eq!(rig.pool.released().len(), 1);
        assert!(rig.coord.ledger().resources_of("ghost").is_empty());
    }

    #[test]
    fn rollback_detaches_once_per_attachment() {
        let mut rig = rig();
        rig.coord
            .register_engine(
                "broken",
                stub(&rig.calls, Script { fail_init: true, ..Script::default() })
                    .with_requirements(shared_quad().buffer("quad", vec![0.0; 8])),
            )
            .unwrap();

        assert_eq!(block_on(rig.coord.initialize()), 0);
        let quad_detaches = rig
            .pool
            .detached()
            .into_iter()
            .filter(|(id, user)| id.0.starts_with("buf-") && user == "broken")
            .count();
        assert_eq!(quad_detaches, 2);
    }

    #[test]
    fn resource_failure_is_reported_per_engine() {
        let mut rig = rig();
        rig.pool.fail_on("noise");
        rig.coord
            .register_engine("faceted", stub(&rig.calls, Script::default()).with_requirements(shared_quad()))
            .unwrap();
        rig.coord
            .register_engine(
                "quantum",
                stub(&rig.calls, Script::default()).with_requirements(shared_quad().noise()),
            )
            .unwrap();

        assert_eq!(block_on(rig.coord.initialize()), 1);
        assert_eq!(rig.coord.engine_state("quantum"), Some(EngineState::Failed));
        let errors = rig.errors.borrow();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("failed to acquire resources for `quantum`"));
        // Never constructed.
        assert!(!rig.calls.borrow().iter().any(|c| c.starts_with("quantum:")));
    }

    #[test]
    fn missing_surfaces_fail_engine() {
        let mut rig = rig();
        rig.canvases.fail_surfaces("faceted");
        rig.coord.register_engine("faceted", stub(&rig.calls, Script::default())).unwrap();
        assert_eq!(block_on(rig.coord.initialize()), 0);
        assert_eq!(rig.coord.engine_state("faceted"), Some(EngineState::Failed));
    }

    // ── switching ─────────────────────────────────────────────────────────

    #[test]
    fn switch_between_two_engines() {
        let mut rig = two_engines();

        assert!(block_on(rig.coord.switch_engine("faceted")));
        assert!(is_active(&rig, "faceted"));

        assert!(block_on(rig.coord.switch_engine("quantum")));
        assert!(!is_active(&rig, "faceted"));
        assert!(is_active(&rig, "quantum"));
        assert_eq!(rig.coord.active_engine(), Some("quantum"));
        assert_eq!(rig.coord.engine_state("faceted"), Some(EngineState::Inactive));

        let dispatched = rig.store.history();
        assert!(dispatched
            .iter()
            .any(|h| h.action.kind == visualization::SWITCH_SYSTEM && h.action.payload == json!("quantum")));
        assert_eq!(rig.store.visualization_state().unwrap().active_system, "quantum");
        assert!(!rig.store.visualization_state().unwrap().transitioning);
        assert_eq!(rig.canvases.visible().as_deref(), Some("quantum"));

        assert_eq!(
            *rig.calls.borrow(),
            vec!["faceted:on", "faceted:deactivate", "faceted:off", "quantum:on"]
        );
    }

    #[test]
    fn switching_to_active_engine_is_a_no_op() {
        let mut rig = two_engines();
        assert!(block_on(rig.coord.switch_engine("quantum")));
        let calls_before = rig.calls.borrow().len();
        let dispatches_before = rig.store.history().len();

        assert!(block_on(rig.coord.switch_engine("quantum")));
        assert_eq!(rig.calls.borrow().len(), calls_before);
        assert_eq!(rig.store.history().len(), dispatches_before);
        assert_eq!(rig.canvases.switches(), vec!["quantum".to_string()]);
    }

    #[test]
    fn unknown_engine_reports_and_fails() {
        let mut rig = two_engines();
        assert!(block_on(rig.coord.switch_engine("faceted")));
        assert!(!block_on(rig.coord.switch_engine("holographic")));
        assert_eq!(*rig.errors.borrow(), vec!["unknown engine `holographic`".to_string()]);
        assert!(is_active(&rig, "faceted"));
    }

    #[test]
    fn failed_deactivate_keeps_previous_engine() {
        let mut rig = rig();
        rig.coord
            .register_engine("sticky", stub(&rig.calls, Script { fail_deactivate: true, ..Script::default() }))
            .unwrap();
        rig.coord.register_engine("quantum", stub(&rig.calls, Script::default())).unwrap();
        block_on(rig.coord.initialize());

        assert!(block_on(rig.coord.switch_engine("sticky")));
        assert!(!block_on(rig.coord.switch_engine("quantum")));

        assert!(is_active(&rig, "sticky"));
        assert!(!is_active(&rig, "quantum"));
        assert_eq!(rig.coord.active_engine(), Some("sticky"));
        assert_eq!(rig.store.visualization_state().unwrap().active_system, "sticky");
        assert!(!rig.store.visualization_state().unwrap().transitioning);
        assert!(rig.errors.borrow()[0].contains("failed in `deactivate`"));
    }

    #[test]
    fn failed_canvas_switch_restores_previous_engine() {
        let mut rig = two_engines();
        rig.canvases.fail_switch("quantum");

        assert!(block_on(rig.coord.switch_engine("faceted")));
        assert!(!block_on(rig.coord.switch_engine("quantum")));

        assert!(is_active(&rig, "faceted"));
        assert!(!is_active(&rig, "quantum"));
        assert_eq!(rig.coord.engine_state("faceted"), Some(EngineState::Active));
        assert_eq!(rig.canvases.visible().as_deref(), Some("faceted"));
    }

    // ── commands ──────────────────────────────────────────────────────────

    #[test]
    fn parameters_route_to_active_or_named_engine() {
        let mut rig = two_engines();
        let params = Parameters::from([("chaos".to_string(), 0.5)]);

        assert!(!rig.coord.apply_parameters(&params, None));
        assert_eq!(*rig.errors.borrow(), vec!["no engine is active".to_string()]);

        block_on(rig.coord.switch_engine("faceted"));
        rig.calls.borrow_mut().clear();

        assert!(rig.coord.apply_parameters(&params, None));
        assert!(rig.coord.apply_parameters(&params, Some("quantum")));
        assert!(!rig.coord.apply_parameters(&params, Some("nope")));
        assert_eq!(*rig.calls.borrow(), vec!["faceted:params 1", "quantum:params 1"]);
    }

    #[test]
    fn parameters_skip_engines_without_capability() {
        let mut rig = rig();
        rig.coord
            .register_engine("plain", stub(&rig.calls, Script { no_parameters: true, ..Script::default() }))
            .unwrap();
        block_on(rig.coord.initialize());
        block_on(rig.coord.switch_engine("plain"));

        assert!(!rig.coord.apply_parameters(&Parameters::new(), None));
        assert!(rig.errors.borrow().is_empty());
    }

    #[test]
    fn broadcast_reaches_only_capable_engines() {
        let mut rig = rig();
        rig.coord
            .register_engine("a", stub(&rig.calls, Script { hooks: vec!["pulse"], ..Script::default() }))
            .unwrap();
        rig.coord.register_engine("b", stub(&rig.calls, Script::default())).unwrap();
        block_on(rig.coord.initialize());
        rig.calls.borrow_mut().clear();

        assert!(rig.coord.broadcast("pulse", &json!({ "strength": 1.0 })));
        assert!(!rig.coord.broadcast("audioLevel", &json!(0.3)));
        assert_eq!(*rig.calls.borrow(), vec!["a:hook pulse"]);

        // A hook that fails is reported and does not count as handled.
        assert!(!rig.coord.broadcast("pulse", &Value::Null));
        assert_eq!(rig.errors.borrow().len(), 1);
    }

    #[test]
    fn resize_and_render_hit_active_engine_only() {
        let mut rig = two_engines();
        rig.coord.resize(800, 600);
        assert_eq!(rig.canvases.size(), (800, 600));
        assert!(rig.calls.borrow().is_empty());

        block_on(rig.coord.switch_engine("quantum"));
        rig.calls.borrow_mut().clear();
        rig.coord.resize(1024, 768);
        rig.coord.render(16.0);
        assert_eq!(*rig.calls.borrow(), vec!["quantum:resize 1024x768", "quantum:render 16"]);
    }

    #[test]
    fn engine_state_round_trips_through_hooks() {
        let mut rig = two_engines();
        assert!(block_on(rig.coord.restore_engine_state("faceted", json!({ "rotation": 1.5 }))));
        assert_eq!(
            block_on(rig.coord.save_engine_state("faceted")),
            Some(json!({ "rotation": 1.5 }))
        );
        assert_eq!(block_on(rig.coord.save_engine_state("ghost")), None);
    }

    // ── resources / teardown ──────────────────────────────────────────────

    #[test]
    fn detach_releases_on_last_reference() {
        let mut rig = two_engines();
        let quad = rig.pool.record(ResourceKind::Buffer, "quad").unwrap();

        assert!(rig.coord.detach_resource(&quad.id, "faceted"));
        assert!(rig.pool.released().is_empty());
        assert_eq!(rig.pool.users_of(&quad.id), vec!["quantum".to_string()]);

        assert!(!rig.coord.detach_resource(&quad.id, "faceted"));
        assert!(rig.coord.detach_resource(&quad.id, "quantum"));
        assert_eq!(rig.pool.released(), vec![quad.id.clone()]);
    }

    #[test]
    fn destroy_releases_every_resource_once() {
        let mut rig = two_engines();
        block_on(rig.coord.switch_engine("faceted"));
        rig.calls.borrow_mut().clear();

        let tracked = rig.coord.ledger().len();
        assert_eq!(tracked, 4); // quad, gradient, noise, program

        block_on(rig.coord.destroy());

        let released = rig.pool.released();
        assert_eq!(released.len(), tracked);
        let mut unique = released.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), tracked);
        assert_eq!(rig.pool.live_count(), 0);
        assert!(rig.coord.ledger().is_empty());

        assert_eq!(
            *rig.calls.borrow(),
            vec!["faceted:deactivate", "faceted:off", "faceted:destroy", "quantum:destroy"]
        );
        assert_eq!(rig.coord.engine_state("faceted"), Some(EngineState::Destroyed));
        assert!(rig.coord.engine("faceted").is_none());
        assert!(rig.coord.active_engine().is_none());

        // Destroyed is terminal.
        assert!(!block_on(rig.coord.switch_engine("faceted")));

        // A second teardown has nothing left to release.
        block_on(rig.coord.destroy());
        assert_eq!(rig.pool.released().len(), tracked);
    }
}
