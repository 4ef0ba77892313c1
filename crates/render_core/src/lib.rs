//! # Render Core
//!
//! The scene-rendering core of a real-time 3D engine: it turns a declarative
//! scene (instances, materials, lights, camera, sky) into an ordered sequence
//! of GPU passes producing the final image.
//!
//! ## Features
//!
//! - **Mesh Registry**: shader → mesh → submesh → material → instance
//!   batching with one instanced draw per batch
//! - **Light Environment**: directional, point and spot lights with
//!   physically based irradiance-to-radiance conversion
//! - **Frame Passes**: PreRender → Geometry → Skybox → PostProcess with a
//!   reversed-Z, infinite-far camera
//! - **IBL**: diffuse irradiance and GGX-prefiltered cube maps from a skybox
//! - **Software Device**: headless [`gpu::GraphicsDevice`] that records
//!   commands and runs the fullscreen programs on the CPU
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_core::prelude::*;
//!
//! fn main() -> Result<(), RenderError> {
//!     let mut device = SoftwareDevice::new();
//!     install_builtin_programs(&mut device);
//!     let mut ctx = RenderContext::new(device)?;
//!
//!     let skybox = ctx.device.create_texture(&TextureDesc::cube("Sky", 64, 1, TextureFormat::Rgba32Float))?;
//!     let mut renderer = SceneRenderer::new(&mut ctx, RendererSettings::default(), skybox, 1280, 720)?;
//!     let mut scene = Scene::new(&ctx.shaders, &ctx.meshes, Camera::default(), CameraSettings::default(), 1280, 720)?;
//!
//!     let output = ctx.device.create_framebuffer(&FramebufferDesc {
//!         width: 1280,
//!         height: 720,
//!         color: ColorTarget::Owned(TextureFormat::Rgba8Srgb),
//!         depth: false,
//!         label: "Swapchain".to_string(),
//!     })?;
//!
//!     scene.update(1.0 / 60.0)?;
//!     renderer.render_scene(&mut ctx, &mut scene, output, &RenderSettings::default())?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod events;
pub mod foundation;
pub mod gpu;
pub mod ibl;
pub mod input;
pub mod render;
pub mod scene;
pub mod settings;

#[cfg(test)]
mod tests;

/// Common imports for host applications
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError},
        events::{Event, EventHandler, EventType, Key, MouseButton},
        foundation::{
            logging::init_logging,
            math::{Mat4, Transform, Vec3},
            ray::Ray,
        },
        gpu::{
            software::SoftwareDevice, ColorTarget, FramebufferDesc, FramebufferHandle, GpuError, GraphicsDevice,
            TextureDesc, TextureFormat, TextureHandle,
        },
        ibl::EnvironmentMaps,
        input::{CameraController, MouseState},
        render::{
            lighting::LightId, programs::install_builtin_programs, Camera, Instance, InstanceRef, LightEnvironment,
            Material, MaterialRef, Mesh, PropertyValue, RenderContext, RenderError, RenderResult, ShaderLibrary,
        },
        scene::{FrameStats, MeshRegistry, RegistryHit, Scene, SceneRenderer},
        settings::{CameraSettings, EngineSettings, RenderSettings, RendererSettings},
    };
}
