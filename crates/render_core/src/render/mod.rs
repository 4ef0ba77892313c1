//! # Rendering Primitives
//!
//! Everything the scene and the scene renderer share: property bags, shader
//! and mesh libraries, the camera, the light environment, GPU binding layouts
//! and the CPU fullscreen programs of the software device.
//!
//! ## Error Handling
//!
//! Configuration problems (unknown shader or mesh names, malformed lights,
//! structural registry violations) surface as [`RenderError`] at the call
//! site and are logged where they are detected. The engine cannot run
//! without its fixed shader set, so callers treat these as fatal.

pub mod bindings;
pub mod camera;
pub mod lighting;
pub mod mesh;
pub mod programs;
pub mod property;
pub mod shader;

use crate::config::ConfigError;
use crate::gpu::{GpuError, GraphicsDevice};
use crate::scene::mesh_registry::RegistryError;

pub use camera::Camera;
pub use lighting::{LightEnvironment, LightError};
pub use mesh::{Mesh, MeshLibrary};
pub use property::{Instance, InstanceRef, Material, MaterialRef, PropertyValue};
pub use shader::{Shader, ShaderLibrary};

/// Rendering errors
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// A shader looked up by name is not registered
    #[error("Shader not found: {0}")]
    ShaderNotFound(String),

    /// A mesh looked up by name is not registered
    #[error("Mesh not found: {0}")]
    MeshNotFound(String),

    /// An instance or material lacks a property its shader's layout declares
    #[error("Property '{property}' required by shader '{shader}' is missing or has the wrong type")]
    MissingProperty {
        /// Property name
        property: String,
        /// Shader declaring it
        shader: String,
    },

    /// Graphics device failure
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),

    /// Mesh registry invariant violation
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Malformed light parameters
    #[error("Light error: {0}")]
    Light(#[from] LightError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Explicitly constructed access to the device and the name-keyed libraries.
///
/// Built in dependency order (device, then libraries) and passed by reference
/// to the renderer and the scene; dropping it releases the libraries' GPU
/// handles before the device.
pub struct RenderContext<D: GraphicsDevice> {
    /// Shader library
    pub shaders: ShaderLibrary,
    /// Mesh library
    pub meshes: MeshLibrary,
    /// Graphics device (declared last so it drops last)
    pub device: D,
}

impl<D: GraphicsDevice> RenderContext<D> {
    /// Context with the built-in shader set and meshes uploaded to `device`
    pub fn new(mut device: D) -> RenderResult<Self> {
        let shaders = ShaderLibrary::with_builtin_shaders();
        let meshes = MeshLibrary::with_builtin_meshes(&mut device)?;
        log::info!("Render context ready ({} shaders)", shaders.len());
        Ok(Self {
            shaders,
            meshes,
            device,
        })
    }
}
