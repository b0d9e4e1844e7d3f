use std::fmt;

use super::handle::OpaqueHandle;

/// Identifies a drawing context; resources are created against one.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ContextId(pub String);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A drawing surface for one `(system, layer)` pair.
#[derive(Debug, Clone)]
pub struct CanvasResource {
    pub canvas: OpaqueHandle,
    pub context: OpaqueHandle,
    pub context_id: ContextId,
    pub is_valid: bool,
    pub key: String,
}

/// Owner of per-engine, per-layer drawing surfaces.
pub trait CanvasPool {
    fn get_canvas_resources(&self, system: &str, layer: &str) -> anyhow::Result<CanvasResource>;

    /// Makes `system`'s surfaces the visible ones.
    fn switch_to_system(&self, system: &str) -> anyhow::Result<()>;

    fn handle_resize(&self, width: u32, height: u32);
}
