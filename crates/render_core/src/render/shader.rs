//! Shader descriptions and the name-keyed shader library
//!
//! A [`Shader`] here is the CPU-side contract of a GPU program: which
//! per-instance and per-material properties it reads, in which order. Batches
//! use the instance layout to size and fill instance buffers.

use std::collections::HashMap;
use std::rc::Rc;

use crate::render::{RenderError, RenderResult};

/// Opaque PBR geometry
pub const PBR_STATIC: &str = "PBR_Static";
/// Unlit emissive geometry (visible light sources)
pub const EMISSIVE: &str = "Emissive";
/// PBR geometry fading in over time
pub const DISSOLUTION: &str = "Dissolution";
/// Fullscreen environment background
pub const SKYBOX: &str = "Skybox";
/// Fullscreen exposure and gamma resolve
pub const POST_PROCESS: &str = "PostProcess";
/// Cube-face diffuse irradiance convolution
pub const IRRADIANCE: &str = "Irradiance";
/// Cube-face GGX specular prefilter
pub const PREFILTER: &str = "Prefilter";

/// Property names shared between shader layouts and scene code
pub mod properties {
    /// Instance world transform
    pub const TRANSFORM: &str = crate::render::property::TRANSFORM;
    /// Emitted radiance of an emissive instance
    pub const RADIANCE: &str = "Radiance";
    /// Seconds since the dissolve started
    pub const ELAPSED_TIME: &str = "ElapsedTime";
    /// Seconds the dissolve lasts
    pub const DISSOLUTION_DURATION: &str = "DissolutionDuration";
    /// Base color factor
    pub const BASE_COLOR: &str = "BaseColor";
    /// Metalness factor
    pub const METALNESS: &str = "Metalness";
    /// Roughness factor
    pub const ROUGHNESS: &str = "Roughness";
    /// Non-zero when `MetalnessMap` is meaningful
    pub const HAS_METALNESS_MAP: &str = "HasMetalnessMap";
    /// Non-zero when `RoughnessMap` is meaningful
    pub const HAS_ROUGHNESS_MAP: &str = "HasRoughnessMap";
    /// Albedo texture
    pub const ALBEDO_MAP: &str = "AlbedoMap";
    /// Tangent-space normal texture
    pub const NORMAL_MAP: &str = "NormalMap";
    /// Metalness texture
    pub const METALNESS_MAP: &str = "MetalnessMap";
    /// Roughness texture
    pub const ROUGHNESS_MAP: &str = "RoughnessMap";
    /// Dissolve threshold noise
    pub const NOISE_MAP: &str = "NoiseMap";
}

/// Kind of a layout entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// f32
    Float,
    /// vec3, padded to 16 bytes
    Vec3,
    /// vec4
    Vec4,
    /// column-major mat4
    Mat4,
    /// Texture binding (no buffer space)
    Texture,
}

impl PropertyKind {
    /// Bytes one value occupies in a packed buffer
    pub const fn size(self) -> usize {
        match self {
            Self::Float => 4,
            Self::Vec3 | Self::Vec4 => 16,
            Self::Mat4 => 64,
            Self::Texture => 0,
        }
    }
}

/// CPU-side description of a GPU program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shader {
    /// Library name
    pub name: String,
    /// Per-instance properties in buffer order
    pub instance_layout: Vec<(String, PropertyKind)>,
    /// Per-material properties in buffer order (textures bind to slots)
    pub material_layout: Vec<(String, PropertyKind)>,
}

impl Shader {
    /// Shader with empty layouts (fullscreen programs)
    pub fn fullscreen(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance_layout: Vec::new(),
            material_layout: Vec::new(),
        }
    }

    /// Bytes per instance in an instance buffer
    pub fn instance_stride(&self) -> usize {
        layout_size(&self.instance_layout)
    }

    /// Bytes of the material constant block
    pub fn material_size(&self) -> usize {
        layout_size(&self.material_layout)
    }

    /// Texture names in slot order
    pub fn texture_names(&self) -> impl Iterator<Item = &str> {
        self.material_layout
            .iter()
            .filter(|(_, kind)| *kind == PropertyKind::Texture)
            .map(|(name, _)| name.as_str())
    }
}

fn layout_size(layout: &[(String, PropertyKind)]) -> usize {
    layout.iter().map(|(_, kind)| kind.size()).sum()
}

fn layout(entries: &[(&str, PropertyKind)]) -> Vec<(String, PropertyKind)> {
    entries
        .iter()
        .map(|(name, kind)| ((*name).to_string(), *kind))
        .collect()
}

/// Name-keyed shader registry
#[derive(Debug, Default)]
pub struct ShaderLibrary {
    shaders: HashMap<String, Rc<Shader>>,
}

impl ShaderLibrary {
    /// Empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Library holding the engine's fixed shader set
    pub fn with_builtin_shaders() -> Self {
        use properties::*;
        use PropertyKind::{Float, Mat4, Texture, Vec3, Vec4};

        let mut library = Self::new();

        let surface = [
            (BASE_COLOR, Vec4),
            (METALNESS, Float),
            (ROUGHNESS, Float),
            (HAS_METALNESS_MAP, Float),
            (HAS_ROUGHNESS_MAP, Float),
            (ALBEDO_MAP, Texture),
            (NORMAL_MAP, Texture),
            (METALNESS_MAP, Texture),
            (ROUGHNESS_MAP, Texture),
        ];

        library.register(Shader {
            name: PBR_STATIC.to_string(),
            instance_layout: layout(&[(TRANSFORM, Mat4)]),
            material_layout: layout(&surface),
        });

        library.register(Shader {
            name: EMISSIVE.to_string(),
            instance_layout: layout(&[(TRANSFORM, Mat4), (RADIANCE, Vec3)]),
            material_layout: Vec::new(),
        });

        let mut dissolve_surface = layout(&surface);
        dissolve_surface.push((NOISE_MAP.to_string(), Texture));
        library.register(Shader {
            name: DISSOLUTION.to_string(),
            instance_layout: layout(&[
                (TRANSFORM, Mat4),
                (ELAPSED_TIME, Float),
                (DISSOLUTION_DURATION, Float),
            ]),
            material_layout: dissolve_surface,
        });

        for name in [SKYBOX, POST_PROCESS, IRRADIANCE, PREFILTER] {
            library.register(Shader::fullscreen(name));
        }

        library
    }

    /// Add or replace a shader
    pub fn register(&mut self, shader: Shader) -> Rc<Shader> {
        let shader = Rc::new(shader);
        log::debug!("Registered shader '{}'", shader.name);
        self.shaders.insert(shader.name.clone(), Rc::clone(&shader));
        shader
    }

    /// Look up a shader; unknown names are a configuration error
    pub fn get(&self, name: &str) -> RenderResult<&Rc<Shader>> {
        self.shaders.get(name).ok_or_else(|| {
            log::error!("Shader '{}' not found", name);
            RenderError::ShaderNotFound(name.to_string())
        })
    }

    /// Number of registered shaders
    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    /// Whether the library is empty
    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }
}
