//! Scene Renderer - turns a [`Scene`] into the frame's GPU passes
//!
//! Every frame runs the same strictly ordered stages:
//!
//! 1. **PreRender**: light world-space refresh and upload, camera/settings
//!    and light bindings, instance buffer refresh, HDR target resize
//! 2. **Geometry**: camera upload, then the opaque (clearing), dissolution
//!    and emissive pipelines, each drawing its shader's batches
//! 3. **Skybox**: fullscreen sky at the far depth boundary
//! 4. **PostProcess**: exposure and gamma resolve into the output target
//!
//! Missing shaders are caught at construction. Per-frame edge cases (no
//! lights of a kind, no batches for a shader) skip work instead of failing.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::gpu::{
    BufferDesc, BufferHandle, BufferKind, ClearFlags, ColorTarget, DepthCompare, DepthState, FramebufferDesc,
    FramebufferHandle, GpuError, GraphicsDevice, IndexedDraw, PipelineDesc, PipelineHandle, TextureDesc,
    TextureFormat, TextureHandle,
};
use crate::ibl::EnvironmentMaps;
use crate::render::bindings::{constant_slot, structured_slot, texture_slot, GpuCamera, GpuRenderSettings};
use crate::render::lighting::LightBuffer;
use crate::render::property::MaterialRef;
use crate::render::shader::{properties::NORMAL_MAP, DISSOLUTION, EMISSIVE, PBR_STATIC, POST_PROCESS, SKYBOX};
use crate::render::{RenderContext, RenderResult};
use crate::scene::mesh_registry::BatchDraw;
use crate::scene::Scene;
use crate::settings::{RenderSettings, RendererSettings};

/// Geometry pipelines in submission order; only the first clears
const GEOMETRY_SHADERS: [&str; 3] = [PBR_STATIC, DISSOLUTION, EMISSIVE];

const REVERSED_Z_TEST: DepthState = DepthState {
    compare: DepthCompare::Greater,
    write: true,
};

/// What one frame submitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Draw calls, instanced and fullscreen
    pub draw_calls: u32,
    /// Instances drawn across all instanced calls
    pub instances: u32,
    /// Pipelines bound
    pub passes: u32,
}

#[derive(Debug)]
struct MaterialConstants {
    buffer: BufferHandle,
    revision: Option<u64>,
}

/// 1x1 textures bound to material slots the material leaves empty, so no
/// slot keeps the previous batch's texture
#[derive(Debug, Clone, Copy)]
struct DefaultTextures {
    white: TextureHandle,
    flat_normal: TextureHandle,
}

impl DefaultTextures {
    fn new(device: &mut dyn GraphicsDevice) -> RenderResult<Self> {
        let mut solid = |label: &str, texel: [f32; 4]| -> RenderResult<TextureHandle> {
            let texture = device.create_texture(&TextureDesc::d2(label, 1, 1, TextureFormat::Rgba32Float))?;
            device.write_texture(texture, 0, 0, &texel)?;
            Ok(texture)
        };
        Ok(Self {
            white: solid("DefaultWhite", [1.0, 1.0, 1.0, 1.0])?,
            flat_normal: solid("DefaultNormal", [0.5, 0.5, 1.0, 1.0])?,
        })
    }

    fn for_property(&self, name: &str) -> TextureHandle {
        if name == NORMAL_MAP {
            self.flat_normal
        } else {
            self.white
        }
    }

    fn release(&self, device: &mut dyn GraphicsDevice) {
        device.destroy_texture(self.white);
        device.destroy_texture(self.flat_normal);
    }
}

/// Multi-pass renderer for one scene at a time
pub struct SceneRenderer {
    settings: RendererSettings,
    hdr_target: FramebufferHandle,
    geometry_pipelines: [PipelineHandle; 3],
    skybox_pipeline: PipelineHandle,
    post_process_pipeline: Option<(FramebufferHandle, PipelineHandle)>,
    default_textures: DefaultTextures,
    camera_buffer: BufferHandle,
    settings_buffer: BufferHandle,
    directional_lights: LightBuffer,
    point_lights: LightBuffer,
    spot_lights: LightBuffer,
    material_constants: HashMap<u64, MaterialConstants>,
    environment: EnvironmentMaps,
}

impl SceneRenderer {
    /// Create the HDR target, the fixed pipelines and the lighting maps of
    /// `skybox`
    pub fn new<D: GraphicsDevice>(
        ctx: &mut RenderContext<D>,
        settings: RendererSettings,
        skybox: TextureHandle,
        width: u32,
        height: u32,
    ) -> RenderResult<Self> {
        settings.validate()?;
        for shader in GEOMETRY_SHADERS.iter().chain(&[SKYBOX, POST_PROCESS]) {
            ctx.shaders.get(shader)?;
        }

        let device = &mut ctx.device;
        let hdr_target = device.create_framebuffer(&FramebufferDesc {
            width: width.max(1),
            height: height.max(1),
            color: ColorTarget::Owned(TextureFormat::Rgba16Float),
            depth: true,
            label: "HDR".to_string(),
        })?;

        let geometry_pipeline = |device: &mut D, shader: &str, clear: ClearFlags| {
            device.create_pipeline(&PipelineDesc {
                shader: shader.to_string(),
                target: hdr_target,
                depth: REVERSED_Z_TEST,
                clear,
                clear_color: settings.clear_color,
                clear_depth: 0.0,
                label: shader.to_string(),
            })
        };
        let geometry_pipelines = [
            geometry_pipeline(device, PBR_STATIC, ClearFlags::COLOR | ClearFlags::DEPTH)?,
            geometry_pipeline(device, DISSOLUTION, ClearFlags::empty())?,
            geometry_pipeline(device, EMISSIVE, ClearFlags::empty())?,
        ];

        let skybox_pipeline = device.create_pipeline(&PipelineDesc {
            shader: SKYBOX.to_string(),
            target: hdr_target,
            depth: DepthState {
                compare: DepthCompare::GreaterEqual,
                write: false,
            },
            clear: ClearFlags::empty(),
            clear_color: settings.clear_color,
            clear_depth: 0.0,
            label: SKYBOX.to_string(),
        })?;

        let default_textures = DefaultTextures::new(device)?;
        let camera_buffer = device.create_buffer(&BufferDesc::constant::<GpuCamera>("Camera"))?;
        let settings_buffer = device.create_buffer(&BufferDesc::constant::<GpuRenderSettings>("RenderSettings"))?;
        let environment = EnvironmentMaps::precompute(&mut ctx.device, &ctx.shaders, skybox, &settings.ibl)?;

        let capacity = settings.initial_light_capacity as usize;
        log::info!("Scene renderer ready ({}x{} HDR target)", width, height);
        Ok(Self {
            settings,
            hdr_target,
            geometry_pipelines,
            skybox_pipeline,
            post_process_pipeline: None,
            default_textures,
            camera_buffer,
            settings_buffer,
            directional_lights: LightBuffer::new("DirectionalLights", capacity),
            point_lights: LightBuffer::new("PointLights", capacity),
            spot_lights: LightBuffer::new("SpotLights", capacity),
            material_constants: HashMap::new(),
            environment,
        })
    }

    /// Renderer configuration
    pub const fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    /// Current skybox and its lighting maps
    pub const fn environment(&self) -> &EnvironmentMaps {
        &self.environment
    }

    /// HDR color/depth target the geometry and sky passes draw into
    pub const fn hdr_target(&self) -> FramebufferHandle {
        self.hdr_target
    }

    /// Light buffers as `(directional, point, spot)`
    pub const fn light_buffers(&self) -> (&LightBuffer, &LightBuffer, &LightBuffer) {
        (&self.directional_lights, &self.point_lights, &self.spot_lights)
    }

    /// Replace the skybox, recomputing both lighting maps in full
    pub fn set_skybox<D: GraphicsDevice>(&mut self, ctx: &mut RenderContext<D>, skybox: TextureHandle) -> RenderResult<()> {
        let environment = EnvironmentMaps::precompute(&mut ctx.device, &ctx.shaders, skybox, &self.settings.ibl)?;
        self.environment.release(&mut ctx.device);
        self.environment = environment;
        Ok(())
    }

    /// Render one frame of `scene` into `target`
    pub fn render_scene<D: GraphicsDevice>(
        &mut self,
        ctx: &mut RenderContext<D>,
        scene: &mut Scene,
        target: FramebufferHandle,
        settings: &RenderSettings,
    ) -> RenderResult<FrameStats> {
        let device: &mut dyn GraphicsDevice = &mut ctx.device;
        let mut stats = FrameStats::default();

        self.pre_render(device, scene, target, settings)?;
        self.geometry_pass(device, scene, &mut stats)?;
        self.skybox_pass(device, &mut stats)?;
        self.post_process_pass(device, target, &mut stats)?;

        log::trace!(
            "Frame: {} draws, {} instances, {} passes",
            stats.draw_calls,
            stats.instances,
            stats.passes
        );
        Ok(stats)
    }

    fn pre_render(
        &mut self,
        device: &mut dyn GraphicsDevice,
        scene: &mut Scene,
        target: FramebufferHandle,
        settings: &RenderSettings,
    ) -> RenderResult<()> {
        let lights = scene.lights_mut();
        lights.update_world_space();
        self.directional_lights
            .upload(device, &lights.gpu_directional_lights())?;
        self.point_lights.upload(device, &lights.gpu_point_lights())?;
        self.spot_lights.upload(device, &lights.gpu_spot_lights())?;

        let gpu_settings = GpuRenderSettings::from(settings);
        device.write_buffer(self.settings_buffer, 0, bytemuck::bytes_of(&gpu_settings))?;
        device.bind_constant_buffer(constant_slot::CAMERA, self.camera_buffer)?;
        device.bind_constant_buffer(constant_slot::SETTINGS, self.settings_buffer)?;
        self.directional_lights
            .bind(device, structured_slot::DIRECTIONAL_LIGHTS)?;
        self.point_lights.bind(device, structured_slot::POINT_LIGHTS)?;
        self.spot_lights.bind(device, structured_slot::SPOT_LIGHTS)?;

        scene.registry_mut().update_instance_buffers(device)?;

        let (width, height) = device.framebuffer_size(target)?;
        device.resize_framebuffer(self.hdr_target, width, height)?;
        Ok(())
    }

    fn geometry_pass(&mut self, device: &mut dyn GraphicsDevice, scene: &Scene, stats: &mut FrameStats) -> RenderResult<()> {
        let camera = scene.camera();
        let gpu_camera = GpuCamera::new(
            &camera.get_projection_matrix(),
            &camera.get_view_matrix(),
            &camera.position,
            &camera.frustum_corners(),
        );
        device.write_buffer(self.camera_buffer, 0, bytemuck::bytes_of(&gpu_camera))?;

        device.bind_texture(texture_slot::ENVIRONMENT, self.environment.skybox)?;
        device.bind_texture(texture_slot::IRRADIANCE, self.environment.irradiance)?;
        device.bind_texture(texture_slot::PREFILTERED, self.environment.prefiltered)?;

        let mut drawn_materials = HashSet::new();
        for (pipeline, shader) in self.geometry_pipelines.into_iter().zip(GEOMETRY_SHADERS) {
            device.bind_pipeline(pipeline)?;
            stats.passes += 1;

            let Some(batch) = scene.registry().get_mesh_batch(shader) else {
                continue;
            };
            for draw in batch.draws() {
                drawn_materials.insert(draw.material.id());
                self.draw_batch(device, &draw, stats)?;
            }
        }

        // Constant buffers of materials that are no longer drawn
        self.material_constants.retain(|id, constants| {
            let keep = drawn_materials.contains(id);
            if !keep {
                device.destroy_buffer(constants.buffer);
            }
            keep
        });
        Ok(())
    }

    fn draw_batch(&mut self, device: &mut dyn GraphicsDevice, draw: &BatchDraw<'_>, stats: &mut FrameStats) -> RenderResult<()> {
        let mesh = draw.mesh;
        let buffers = mesh
            .buffers()
            .ok_or_else(|| GpuError::InvalidOperation(format!("mesh '{}' was never uploaded", mesh.name)))?;
        let submesh = mesh.submeshes.get(draw.submesh_index).ok_or_else(|| {
            GpuError::OutOfBounds(format!("submesh {} of mesh '{}'", draw.submesh_index, mesh.name))
        })?;
        let instance_buffer = draw.instances.buffer().ok_or_else(|| {
            GpuError::InvalidOperation(format!("instances of mesh '{}' were never uploaded", mesh.name))
        })?;

        self.bind_material(device, draw.material)?;

        let instance_count = draw.instances.len() as u32;
        device.draw_indexed_instanced(&IndexedDraw {
            vertex_buffer: buffers.vertices,
            index_buffer: buffers.indices,
            instance_buffer,
            index_offset: submesh.index_offset,
            index_count: submesh.index_count,
            vertex_offset: submesh.vertex_offset,
            instance_count,
        })?;

        stats.draw_calls += 1;
        stats.instances += instance_count;
        Ok(())
    }

    /// Bind the material's constant block (refreshed when it changed) and
    /// its textures in layout order from [`texture_slot::MATERIAL_BASE`]
    fn bind_material(&mut self, device: &mut dyn GraphicsDevice, material: &MaterialRef) -> RenderResult<()> {
        let material = material.borrow();
        let shader = material.shader();

        let size = shader.material_size();
        if size > 0 {
            let constants = match self.material_constants.entry(material.id()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let buffer = device.create_buffer(&BufferDesc {
                        kind: BufferKind::Constant,
                        size,
                        stride: 0,
                        label: material.name().to_string(),
                    })?;
                    entry.insert(MaterialConstants { buffer, revision: None })
                }
            };
            if constants.revision != Some(material.revision()) {
                device.write_buffer(constants.buffer, 0, &material.pack_constants()?)?;
                constants.revision = Some(material.revision());
                log::debug!("Uploaded constants of material '{}'", material.name());
            }
            device.bind_constant_buffer(constant_slot::MATERIAL, constants.buffer)?;
        }

        for (slot, name) in (texture_slot::MATERIAL_BASE..).zip(shader.texture_names()) {
            let texture = material
                .texture(name)
                .unwrap_or_else(|| self.default_textures.for_property(name));
            device.bind_texture(slot, texture)?;
        }
        Ok(())
    }

    fn skybox_pass(&self, device: &mut dyn GraphicsDevice, stats: &mut FrameStats) -> RenderResult<()> {
        device.bind_pipeline(self.skybox_pipeline)?;
        device.bind_texture(texture_slot::ENVIRONMENT, self.environment.skybox)?;
        device.draw_fullscreen()?;
        stats.passes += 1;
        stats.draw_calls += 1;
        Ok(())
    }

    fn post_process_pass(
        &mut self,
        device: &mut dyn GraphicsDevice,
        target: FramebufferHandle,
        stats: &mut FrameStats,
    ) -> RenderResult<()> {
        let pipeline = match self.post_process_pipeline {
            Some((current, pipeline)) if current == target => pipeline,
            previous => {
                if let Some((_, stale)) = previous {
                    device.destroy_pipeline(stale);
                    log::debug!("Output target changed, rebuilding post-process pipeline");
                }
                let pipeline = device.create_pipeline(&PipelineDesc {
                    shader: POST_PROCESS.to_string(),
                    target,
                    depth: DepthState::DISABLED,
                    clear: ClearFlags::COLOR,
                    clear_color: [0.0, 0.0, 0.0, 1.0],
                    clear_depth: 0.0,
                    label: POST_PROCESS.to_string(),
                })?;
                self.post_process_pipeline = Some((target, pipeline));
                pipeline
            }
        };

        let hdr_color = device.framebuffer_color(self.hdr_target)?;
        device.bind_pipeline(pipeline)?;
        device.bind_texture(texture_slot::HDR_COLOR, hdr_color)?;
        device.draw_fullscreen()?;
        stats.passes += 1;
        stats.draw_calls += 1;
        Ok(())
    }

    /// Destroy every GPU object the renderer created. The skybox stays with
    /// its owner.
    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some((_, pipeline)) = self.post_process_pipeline.take() {
            device.destroy_pipeline(pipeline);
        }
        self.default_textures.release(device);
        device.destroy_pipeline(self.skybox_pipeline);
        for pipeline in self.geometry_pipelines {
            device.destroy_pipeline(pipeline);
        }
        for (_, constants) in self.material_constants.drain() {
            device.destroy_buffer(constants.buffer);
        }
        self.directional_lights.release(device);
        self.point_lights.release(device);
        self.spot_lights.release(device);
        device.destroy_buffer(self.camera_buffer);
        device.destroy_buffer(self.settings_buffer);
        self.environment.release(device);
        device.destroy_framebuffer(self.hdr_target);
        log::info!("Scene renderer released");
    }
}
