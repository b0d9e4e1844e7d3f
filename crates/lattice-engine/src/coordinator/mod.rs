//! Engine coordination.
//!
//! [`EngineCoordinator`] owns a set of named rendering engines, keeps at most
//! one of them active, and tracks which engine holds which shared GPU
//! resource so each is released exactly once.

mod canvas;
mod coordinator;
mod engine;
mod error;
mod handle;
mod ledger;
mod memory;
mod resources;

pub use canvas::{CanvasPool, CanvasResource, ContextId};
pub use coordinator::{CoordinatorConfig, EngineCoordinator, ErrorCallback, DEFAULT_LAYERS};
pub use engine::{Capability, Engine, EngineContext, EngineFactory, EngineState};
pub use error::CoordinatorError;
pub use handle::OpaqueHandle;
pub use ledger::{AttachmentLedger, Detach};
pub use memory::{MemoryCanvasPool, MemoryResourcePool, MemorySurface};
pub use resources::{
    BufferRequest, ResourceId, ResourceKind, ResourcePool, ResourceRecord, ResourceRequirements, ShaderSource,
    ShaderSources, SharedResources, TextureOptions, TextureRequest,
};
