use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use super::canvas::CanvasResource;
use super::resources::{ResourceRequirements, SharedResources};
use crate::store::domains::visualization::Parameters;

/// Optional behavior an engine may implement.
///
/// The coordinator asks [`Engine::supports`] before every optional call and
/// skips engines that decline.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Capability<'a> {
    Initialize,
    Deactivate,
    Resize,
    Render,
    Parameters,
    SaveState,
    RestoreState,
    Destroy,
    /// A named broadcast hook (`"pulse"`, `"audioLevel"`, ...).
    Hook(&'a str),
}

/// A pluggable rendering engine.
///
/// `supports`, `set_active` and `is_active` are required; everything else has
/// a no-op default and is only called when `supports` says so.
#[async_trait(?Send)]
pub trait Engine {
    fn supports(&self, capability: Capability<'_>) -> bool;

    fn set_active(&mut self, active: bool);

    fn is_active(&self) -> bool;

    /// One-time setup after construction (shader warmup, first upload).
    async fn initialize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called before the engine stops being the visible one.
    async fn deactivate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn save_state(&mut self) -> anyhow::Result<Value> {
        Ok(Value::Null)
    }

    async fn restore_state(&mut self, state: Value) -> anyhow::Result<()> {
        let _ = state;
        Ok(())
    }

    fn handle_resize(&mut self, width: u32, height: u32) {
        let _ = (width, height);
    }

    fn render(&mut self, timestamp: f64) {
        let _ = timestamp;
    }

    fn set_parameters(&mut self, params: &Parameters) -> anyhow::Result<()> {
        let _ = params;
        Ok(())
    }

    /// Runs the broadcast hook `hook`.
    fn call_hook(&mut self, hook: &str, payload: &Value) -> anyhow::Result<()> {
        let _ = payload;
        anyhow::bail!("hook `{hook}` is not implemented")
    }

    /// Final teardown. No other method is called afterwards.
    fn destroy(&mut self) {}
}

/// Everything a factory needs to build an engine.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub name: String,
    /// Layer name -> surface.
    pub canvases: BTreeMap<String, CanvasResource>,
    pub resources: SharedResources,
}

type BuildFn = Box<dyn Fn(EngineContext) -> anyhow::Result<Box<dyn Engine>>>;

/// Constructor for one engine plus the shared resources it needs.
pub struct EngineFactory {
    requirements: ResourceRequirements,
    build: BuildFn,
}

impl EngineFactory {
    pub fn new<E, F>(build: F) -> Self
    where
        E: Engine + 'static,
        F: Fn(EngineContext) -> anyhow::Result<E> + 'static,
    {
        Self {
            requirements: ResourceRequirements::default(),
            build: Box::new(move |ctx| {
                let engine: Box<dyn Engine> = Box::new(build(ctx)?);
                Ok(engine)
            }),
        }
    }

    pub fn with_requirements(mut self, requirements: ResourceRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn requirements(&self) -> &ResourceRequirements {
        &self.requirements
    }

    pub(crate) fn build(&self, ctx: EngineContext) -> anyhow::Result<Box<dyn Engine>> {
        (self.build)(ctx)
    }
}

impl fmt::Debug for EngineFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineFactory")
            .field("requirements", &self.requirements)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of a registered engine.
///
/// `Registered -> Initialized -> (Active <-> Inactive) -> Destroyed`, with
/// `Failed` for engines whose construction or initialization did not succeed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EngineState {
    Registered,
    Initialized,
    Active,
    Inactive,
    Failed,
    Destroyed,
}

impl EngineState {
    /// Whether the engine has a live instance that can be switched to.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Initialized | Self::Active | Self::Inactive)
    }
}
