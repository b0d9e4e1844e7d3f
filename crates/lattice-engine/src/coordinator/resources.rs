use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use super::canvas::ContextId;
use super::handle::OpaqueHandle;

/// Pool-assigned resource identifier.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ResourceId(pub String);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Shader,
}

/// A pooled resource as created by a [`ResourcePool`].
#[derive(Debug, Clone)]
pub struct ResourceRecord {
    pub id: ResourceId,
    pub kind: ResourceKind,
    /// Sharing key within `kind`; two requests with the same key share one resource.
    pub key: String,
    pub handle: OpaqueHandle,
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureOptions {
    pub width: u32,
    pub height: u32,
    pub repeat: bool,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            repeat: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub vertex: String,
    pub fragment: String,
}

/// Program name -> sources.
pub type ShaderSources = BTreeMap<String, ShaderSource>;

#[derive(Debug, Clone, PartialEq)]
pub struct BufferRequest {
    pub key: String,
    pub data: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureRequest {
    pub key: String,
    pub options: TextureOptions,
}

/// Shared resources an engine declares at registration time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceRequirements {
    pub buffers: Vec<BufferRequest>,
    pub textures: Vec<TextureRequest>,
    pub gradient_texture: bool,
    pub noise_texture: bool,
    pub shaders: ShaderSources,
}

impl ResourceRequirements {
    pub fn buffer(mut self, key: impl Into<String>, data: Vec<f32>) -> Self {
        self.buffers.push(BufferRequest { key: key.into(), data });
        self
    }

    pub fn texture(mut self, key: impl Into<String>, options: TextureOptions) -> Self {
        self.textures.push(TextureRequest { key: key.into(), options });
        self
    }

    pub fn gradient(mut self) -> Self {
        self.gradient_texture = true;
        self
    }

    pub fn noise(mut self) -> Self {
        self.noise_texture = true;
        self
    }

    pub fn shader(mut self, name: impl Into<String>, vertex: impl Into<String>, fragment: impl Into<String>) -> Self {
        self.shaders.insert(
            name.into(),
            ShaderSource {
                vertex: vertex.into(),
                fragment: fragment.into(),
            },
        );
        self
    }
}

/// Resources handed to an engine's factory, grouped the way they were requested.
#[derive(Debug, Clone, Default)]
pub struct SharedResources {
    pub buffers: BTreeMap<String, ResourceRecord>,
    pub textures: BTreeMap<String, ResourceRecord>,
    pub gradient: Option<ResourceRecord>,
    pub noise: Option<ResourceRecord>,
    pub shaders: BTreeMap<String, ResourceRecord>,
}

impl SharedResources {
    pub fn records(&self) -> impl Iterator<Item = &ResourceRecord> {
        self.buffers
            .values()
            .chain(self.textures.values())
            .chain(self.gradient.iter())
            .chain(self.noise.iter())
            .chain(self.shaders.values())
    }
}

/// Owner of shared GPU resources.
///
/// The pool is the only thing that creates or mutates resources; the
/// coordinator requests, tracks attachment, and asks for release.
pub trait ResourcePool {
    fn create_buffer(&self, context: &ContextId, key: &str, data: &[f32]) -> anyhow::Result<ResourceRecord>;

    fn create_texture(&self, context: &ContextId, key: &str, options: &TextureOptions) -> anyhow::Result<ResourceRecord>;

    fn create_gradient_texture(&self, context: &ContextId) -> anyhow::Result<ResourceRecord>;

    fn create_noise_texture(&self, context: &ContextId) -> anyhow::Result<ResourceRecord>;

    /// Compiles every program in `sources`, keyed by program name.
    fn create_shader_suite(
        &self,
        context: &ContextId,
        sources: &ShaderSources,
    ) -> anyhow::Result<BTreeMap<String, ResourceRecord>>;

    fn attach_resource_to_user(&self, id: &ResourceId, user: &str);

    fn detach_resource_from_user(&self, id: &ResourceId, user: &str);

    fn release_shared_resource(&self, kind: ResourceKind, key: &str, resource: &ResourceRecord);
}
