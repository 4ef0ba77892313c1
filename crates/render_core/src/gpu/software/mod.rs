//! # Software Device
//!
//! Headless [`GraphicsDevice`] that keeps every resource in host memory.
//! Buffers are byte vectors, textures are RGBA `f32` texels regardless of the
//! declared format, and every state change or draw is appended to a command
//! log that tests and tools can inspect.
//!
//! Fullscreen draws are executed: the current pipeline's shader name selects a
//! registered [`FullscreenProgram`], which is evaluated once per target texel
//! of every layer in the target view. Fragments of a fullscreen pass sit at
//! depth 0.0 (the reversed-Z far boundary). Indexed draws are validated and
//! recorded but not rasterized, so depth keeps its cleared value.

use std::collections::{BTreeMap, HashMap};

use slotmap::SlotMap;

use super::{
    BufferDesc, BufferHandle, ClearFlags, ColorTarget, FramebufferDesc, FramebufferHandle, GpuError,
    GpuResult, GraphicsDevice, IndexedDraw, PipelineDesc, PipelineHandle, TextureDesc, TextureHandle,
    TextureView,
};
use crate::foundation::math::Vec3;
use crate::ibl::sampling::direction_to_cube_uv;

/// Depth of every fullscreen fragment
pub const FULLSCREEN_DEPTH: f32 = 0.0;

/// One entry of the device command log
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    /// Bytes uploaded into a buffer
    WriteBuffer {
        /// Target buffer
        buffer: BufferHandle,
        /// Buffer label
        label: String,
        /// Uploaded byte count
        bytes: usize,
    },
    /// Framebuffer extent changed
    ResizeFramebuffer {
        /// Resized framebuffer
        framebuffer: FramebufferHandle,
        /// New width
        width: u32,
        /// New height
        height: u32,
    },
    /// Pipeline made current
    BindPipeline {
        /// Bound pipeline
        pipeline: PipelineHandle,
        /// Pipeline shader
        shader: String,
        /// Clears performed on bind
        cleared: ClearFlags,
    },
    /// Constant buffer bound
    BindConstantBuffer {
        /// Slot
        slot: u32,
        /// Buffer
        buffer: BufferHandle,
    },
    /// Structured buffer bound
    BindStructuredBuffer {
        /// Slot
        slot: u32,
        /// Buffer
        buffer: BufferHandle,
    },
    /// Texture bound
    BindTexture {
        /// Slot
        slot: u32,
        /// Texture
        texture: TextureHandle,
    },
    /// Instanced indexed draw
    DrawIndexed {
        /// Shader of the current pipeline
        shader: String,
        /// Index count
        index_count: u32,
        /// Instance count
        instance_count: u32,
    },
    /// Fullscreen draw
    DrawFullscreen {
        /// Shader of the current pipeline
        shader: String,
        /// Target width
        width: u32,
        /// Target height
        height: u32,
        /// Target layers shaded
        layers: u32,
    },
}

/// Position of one fullscreen fragment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fragment {
    /// Absolute texture layer being written (cube face for cube targets)
    pub layer: u32,
    /// Texel center in `[0, 1]`, origin at the top-left
    pub uv: (f32, f32),
    /// Integer texel coordinate
    pub pixel: (u32, u32),
    /// Target extent
    pub size: (u32, u32),
}

/// CPU stand-in for a fullscreen fragment shader
pub trait FullscreenProgram {
    /// Color written for `fragment`
    fn shade(&self, ctx: &ShadeContext<'_>, fragment: &Fragment) -> [f32; 4];
}

struct BufferData {
    desc: BufferDesc,
    bytes: Vec<u8>,
}

struct TextureData {
    desc: TextureDesc,
    /// Texels per (mip, layer), indexed `mip * layers + layer`
    levels: Vec<Vec<[f32; 4]>>,
}

impl TextureData {
    fn new(desc: &TextureDesc) -> Self {
        let mut levels = Vec::with_capacity((desc.mip_levels * desc.layers) as usize);
        for mip in 0..desc.mip_levels {
            let (width, height) = desc.mip_extent(mip);
            for _ in 0..desc.layers {
                levels.push(vec![[0.0; 4]; (width * height) as usize]);
            }
        }
        Self {
            desc: desc.clone(),
            levels,
        }
    }

    fn level_index(&self, layer: u32, mip: u32) -> usize {
        (mip * self.desc.layers + layer) as usize
    }
}

struct FramebufferData {
    width: u32,
    height: u32,
    color: TextureView,
    owns_color: bool,
    depth: Option<Vec<f32>>,
}

/// Read access to bound resources while a fullscreen program runs
pub struct ShadeContext<'a> {
    buffers: &'a SlotMap<BufferHandle, BufferData>,
    textures: &'a SlotMap<TextureHandle, TextureData>,
    constant_slots: &'a BTreeMap<u32, BufferHandle>,
    texture_slots: &'a BTreeMap<u32, TextureHandle>,
}

impl<'a> ShadeContext<'a> {
    /// Constant block bound at `slot`, read as `T`
    pub fn constants<T: bytemuck::Pod>(&self, slot: u32) -> Option<T> {
        let handle = self.constant_slots.get(&slot)?;
        let bytes = &self.buffers.get(*handle)?.bytes;
        bytes
            .get(..std::mem::size_of::<T>())
            .and_then(|b| bytemuck::try_pod_read_unaligned(b).ok())
    }

    /// Sampler over the texture bound at `slot`
    pub fn texture(&self, slot: u32) -> Option<Sampler<'a>> {
        let handle = self.texture_slots.get(&slot)?;
        self.textures.get(*handle).map(|data| Sampler { data })
    }
}

/// Nearest-neighbour texture reads
pub struct Sampler<'a> {
    data: &'a TextureData,
}

impl Sampler<'_> {
    /// Descriptor of the sampled texture
    pub fn desc(&self) -> &TextureDesc {
        &self.data.desc
    }

    /// Texel at integer coordinates (clamped to the level)
    pub fn fetch(&self, layer: u32, mip: u32, x: u32, y: u32) -> [f32; 4] {
        let desc = &self.data.desc;
        let mip = mip.min(desc.mip_levels.saturating_sub(1));
        let layer = layer.min(desc.layers.saturating_sub(1));
        let (width, height) = desc.mip_extent(mip);
        let x = x.min(width - 1);
        let y = y.min(height - 1);
        self.data
            .levels
            .get(self.data.level_index(layer, mip))
            .and_then(|level| level.get((y * width + x) as usize))
            .copied()
            .unwrap_or([0.0; 4])
    }

    /// Texel under normalized `(u, v)` of a layer and mip
    pub fn sample_2d(&self, layer: u32, mip: u32, u: f32, v: f32) -> [f32; 4] {
        let (width, height) = self.data.desc.mip_extent(mip);
        let x = (u.clamp(0.0, 1.0) * width as f32) as u32;
        let y = (v.clamp(0.0, 1.0) * height as f32) as u32;
        self.fetch(layer, mip, x, y)
    }

    /// Cube-map texel seen along `direction`
    pub fn sample_cube(&self, direction: &Vec3, mip: u32) -> [f32; 4] {
        let (face, u, v) = direction_to_cube_uv(direction);
        self.sample_2d(face, mip, u, v)
    }
}

/// Headless CPU graphics device
#[derive(Default)]
pub struct SoftwareDevice {
    buffers: SlotMap<BufferHandle, BufferData>,
    textures: SlotMap<TextureHandle, TextureData>,
    framebuffers: SlotMap<FramebufferHandle, FramebufferData>,
    pipelines: SlotMap<PipelineHandle, PipelineDesc>,
    programs: HashMap<String, Box<dyn FullscreenProgram>>,
    current_pipeline: Option<PipelineHandle>,
    constant_slots: BTreeMap<u32, BufferHandle>,
    structured_slots: BTreeMap<u32, BufferHandle>,
    texture_slots: BTreeMap<u32, TextureHandle>,
    commands: Vec<DeviceCommand>,
}

impl SoftwareDevice {
    /// Create an empty device with no programs registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the program executed for fullscreen draws of `shader`
    pub fn register_program(&mut self, shader: impl Into<String>, program: Box<dyn FullscreenProgram>) {
        let shader = shader.into();
        log::debug!("Registered fullscreen program '{}'", shader);
        self.programs.insert(shader, program);
    }

    /// Whether a program is registered for `shader`
    pub fn has_program(&self, shader: &str) -> bool {
        self.programs.contains_key(shader)
    }

    /// Commands recorded since creation or the last clear
    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    /// Drain the command log
    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Forget recorded commands
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Contents of a buffer
    pub fn read_buffer(&self, buffer: BufferHandle) -> GpuResult<&[u8]> {
        Ok(&self.buffer(buffer)?.bytes)
    }

    /// Texels of one layer and mip level, row-major from the top-left
    pub fn read_texture(&self, texture: TextureHandle, layer: u32, mip: u32) -> GpuResult<&[[f32; 4]]> {
        let data = self.texture(texture)?;
        if layer >= data.desc.layers || mip >= data.desc.mip_levels {
            return Err(GpuError::OutOfBounds(format!(
                "layer {layer} mip {mip} of '{}'",
                data.desc.label
            )));
        }
        Ok(&data.levels[data.level_index(layer, mip)])
    }

    /// Buffer currently bound to a structured slot
    pub fn bound_structured_buffer(&self, slot: u32) -> Option<BufferHandle> {
        self.structured_slots.get(&slot).copied()
    }

    /// Number of live buffers
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of live textures
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /// Number of live pipelines
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Descriptor a pipeline was created with
    pub fn pipeline_desc(&self, pipeline: PipelineHandle) -> GpuResult<&PipelineDesc> {
        self.pipelines
            .get(pipeline)
            .ok_or(GpuError::InvalidHandle { kind: "pipeline" })
    }

    fn buffer(&self, buffer: BufferHandle) -> GpuResult<&BufferData> {
        self.buffers
            .get(buffer)
            .ok_or(GpuError::InvalidHandle { kind: "buffer" })
    }

    fn texture(&self, texture: TextureHandle) -> GpuResult<&TextureData> {
        self.textures
            .get(texture)
            .ok_or(GpuError::InvalidHandle { kind: "texture" })
    }

    fn framebuffer(&self, framebuffer: FramebufferHandle) -> GpuResult<&FramebufferData> {
        self.framebuffers
            .get(framebuffer)
            .ok_or(GpuError::InvalidHandle { kind: "framebuffer" })
    }

    fn current_pipeline(&self) -> GpuResult<&PipelineDesc> {
        self.current_pipeline
            .and_then(|handle| self.pipelines.get(handle))
            .ok_or_else(|| GpuError::MissingBinding("no pipeline bound".to_string()))
    }

    fn validate_view(&self, view: &TextureView, width: u32, height: u32) -> GpuResult<()> {
        let desc = &self.texture(view.texture)?.desc;
        if view.mip >= desc.mip_levels || view.layer_count == 0 || view.base_layer + view.layer_count > desc.layers {
            return Err(GpuError::OutOfBounds(format!(
                "view mip {} layers {}..{} of '{}'",
                view.mip,
                view.base_layer,
                view.base_layer + view.layer_count,
                desc.label
            )));
        }
        if desc.mip_extent(view.mip) != (width, height) {
            return Err(GpuError::InvalidOperation(format!(
                "framebuffer {}x{} does not match mip {} of '{}'",
                width, height, view.mip, desc.label
            )));
        }
        Ok(())
    }

    fn clear_color(&mut self, view: TextureView, color: [f32; 4]) -> GpuResult<()> {
        let data = self
            .textures
            .get_mut(view.texture)
            .ok_or(GpuError::InvalidHandle { kind: "texture" })?;
        for layer in view.base_layer..view.base_layer + view.layer_count {
            let index = data.level_index(layer, view.mip);
            if let Some(level) = data.levels.get_mut(index) {
                level.fill(color);
            }
        }
        Ok(())
    }
}

impl GraphicsDevice for SoftwareDevice {
    fn create_buffer(&mut self, desc: &BufferDesc) -> GpuResult<BufferHandle> {
        if desc.size == 0 {
            return Err(GpuError::InvalidOperation(format!("buffer '{}' has zero size", desc.label)));
        }
        log::trace!("Creating buffer '{}' ({} bytes)", desc.label, desc.size);
        Ok(self.buffers.insert(BufferData {
            desc: desc.clone(),
            bytes: vec![0; desc.size],
        }))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(data) = self.buffers.remove(buffer) {
            log::trace!("Destroyed buffer '{}'", data.desc.label);
        }
    }

    fn buffer_size(&self, buffer: BufferHandle) -> GpuResult<usize> {
        Ok(self.buffer(buffer)?.bytes.len())
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: usize, data: &[u8]) -> GpuResult<()> {
        let target = self
            .buffers
            .get_mut(buffer)
            .ok_or(GpuError::InvalidHandle { kind: "buffer" })?;
        let end = offset + data.len();
        if end > target.bytes.len() {
            return Err(GpuError::OutOfBounds(format!(
                "write of {} bytes at {} into '{}' ({} bytes)",
                data.len(),
                offset,
                target.desc.label,
                target.bytes.len()
            )));
        }
        target.bytes[offset..end].copy_from_slice(data);
        self.commands.push(DeviceCommand::WriteBuffer {
            buffer,
            label: target.desc.label.clone(),
            bytes: data.len(),
        });
        Ok(())
    }

    fn map_buffer_write(&mut self, buffer: BufferHandle, write: &mut dyn FnMut(&mut [u8])) -> GpuResult<()> {
        let target = self
            .buffers
            .get_mut(buffer)
            .ok_or(GpuError::InvalidHandle { kind: "buffer" })?;
        write(&mut target.bytes);
        self.commands.push(DeviceCommand::WriteBuffer {
            buffer,
            label: target.desc.label.clone(),
            bytes: target.bytes.len(),
        });
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> GpuResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 || desc.mip_levels == 0 {
            return Err(GpuError::InvalidOperation(format!("texture '{}' has an empty extent", desc.label)));
        }
        if desc.cube && (desc.layers != 6 || desc.width != desc.height) {
            return Err(GpuError::InvalidOperation(format!(
                "cube texture '{}' must be square with 6 layers",
                desc.label
            )));
        }
        log::trace!(
            "Creating texture '{}' {}x{} layers={} mips={}",
            desc.label,
            desc.width,
            desc.height,
            desc.layers,
            desc.mip_levels
        );
        Ok(self.textures.insert(TextureData::new(desc)))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(data) = self.textures.remove(texture) {
            log::trace!("Destroyed texture '{}'", data.desc.label);
        }
    }

    fn texture_desc(&self, texture: TextureHandle) -> GpuResult<TextureDesc> {
        Ok(self.texture(texture)?.desc.clone())
    }

    fn write_texture(&mut self, texture: TextureHandle, layer: u32, mip: u32, texels: &[f32]) -> GpuResult<()> {
        let data = self
            .textures
            .get_mut(texture)
            .ok_or(GpuError::InvalidHandle { kind: "texture" })?;
        if layer >= data.desc.layers || mip >= data.desc.mip_levels {
            return Err(GpuError::OutOfBounds(format!(
                "layer {layer} mip {mip} of '{}'",
                data.desc.label
            )));
        }
        let (width, height) = data.desc.mip_extent(mip);
        let expected = (width * height * 4) as usize;
        if texels.len() != expected {
            return Err(GpuError::OutOfBounds(format!(
                "expected {expected} floats for '{}', got {}",
                data.desc.label,
                texels.len()
            )));
        }
        let index = data.level_index(layer, mip);
        for (dst, src) in data.levels[index].iter_mut().zip(texels.chunks_exact(4)) {
            dst.copy_from_slice(src);
        }
        Ok(())
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> GpuResult<FramebufferHandle> {
        let (color, owns_color) = match desc.color {
            ColorTarget::Owned(format) => {
                let texture = self.create_texture(&TextureDesc::d2(
                    format!("{} color", desc.label),
                    desc.width,
                    desc.height,
                    format,
                ))?;
                let view = TextureView {
                    texture,
                    mip: 0,
                    base_layer: 0,
                    layer_count: 1,
                };
                (view, true)
            }
            ColorTarget::View(view) => {
                self.validate_view(&view, desc.width, desc.height)?;
                (view, false)
            }
        };

        let depth = desc
            .depth
            .then(|| vec![0.0; (desc.width * desc.height) as usize]);

        log::debug!("Created framebuffer '{}' {}x{}", desc.label, desc.width, desc.height);
        Ok(self.framebuffers.insert(FramebufferData {
            width: desc.width,
            height: desc.height,
            color,
            owns_color,
            depth,
        }))
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if let Some(data) = self.framebuffers.remove(framebuffer) {
            if data.owns_color {
                self.destroy_texture(data.color.texture);
            }
        }
    }

    fn resize_framebuffer(&mut self, framebuffer: FramebufferHandle, width: u32, height: u32) -> GpuResult<()> {
        let data = self.framebuffer(framebuffer)?;
        if (data.width, data.height) == (width, height) {
            return Ok(());
        }
        if !data.owns_color {
            return Err(GpuError::InvalidOperation(
                "cannot resize a framebuffer rendering into a texture view".to_string(),
            ));
        }
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidOperation(format!("cannot resize framebuffer to {width}x{height}")));
        }

        let old_texture = data.color.texture;
        let mut texture_desc = self.texture(old_texture)?.desc.clone();
        texture_desc.width = width;
        texture_desc.height = height;
        let texture = self.create_texture(&texture_desc)?;
        self.destroy_texture(old_texture);

        let data = self
            .framebuffers
            .get_mut(framebuffer)
            .ok_or(GpuError::InvalidHandle { kind: "framebuffer" })?;
        data.width = width;
        data.height = height;
        data.color.texture = texture;
        if data.depth.is_some() {
            data.depth = Some(vec![0.0; (width * height) as usize]);
        }

        self.commands.push(DeviceCommand::ResizeFramebuffer {
            framebuffer,
            width,
            height,
        });
        Ok(())
    }

    fn framebuffer_size(&self, framebuffer: FramebufferHandle) -> GpuResult<(u32, u32)> {
        let data = self.framebuffer(framebuffer)?;
        Ok((data.width, data.height))
    }

    fn framebuffer_color(&self, framebuffer: FramebufferHandle) -> GpuResult<TextureHandle> {
        Ok(self.framebuffer(framebuffer)?.color.texture)
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> GpuResult<PipelineHandle> {
        let target = self.framebuffer(desc.target)?;
        if target.depth.is_none() && (desc.depth.write || desc.clear.contains(ClearFlags::DEPTH)) {
            return Err(GpuError::InvalidOperation(format!(
                "pipeline '{}' uses depth but its target has no depth attachment",
                desc.label
            )));
        }
        log::debug!("Created pipeline '{}' (shader '{}')", desc.label, desc.shader);
        Ok(self.pipelines.insert(desc.clone()))
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) {
        if self.pipelines.remove(pipeline).is_some() && self.current_pipeline == Some(pipeline) {
            self.current_pipeline = None;
        }
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) -> GpuResult<()> {
        let desc = self.pipeline_desc(pipeline)?.clone();
        let target = self.framebuffer(desc.target)?;
        let view = target.color;

        if desc.clear.contains(ClearFlags::COLOR) {
            self.clear_color(view, desc.clear_color)?;
        }
        if desc.clear.contains(ClearFlags::DEPTH) {
            if let Some(depth) = self
                .framebuffers
                .get_mut(desc.target)
                .and_then(|data| data.depth.as_mut())
            {
                depth.fill(desc.clear_depth);
            }
        }

        self.current_pipeline = Some(pipeline);
        self.commands.push(DeviceCommand::BindPipeline {
            pipeline,
            shader: desc.shader,
            cleared: desc.clear,
        });
        Ok(())
    }

    fn bind_constant_buffer(&mut self, slot: u32, buffer: BufferHandle) -> GpuResult<()> {
        self.buffer(buffer)?;
        self.constant_slots.insert(slot, buffer);
        self.commands.push(DeviceCommand::BindConstantBuffer { slot, buffer });
        Ok(())
    }

    fn bind_structured_buffer(&mut self, slot: u32, buffer: BufferHandle) -> GpuResult<()> {
        self.buffer(buffer)?;
        self.structured_slots.insert(slot, buffer);
        self.commands.push(DeviceCommand::BindStructuredBuffer { slot, buffer });
        Ok(())
    }

    fn bind_texture(&mut self, slot: u32, texture: TextureHandle) -> GpuResult<()> {
        self.texture(texture)?;
        self.texture_slots.insert(slot, texture);
        self.commands.push(DeviceCommand::BindTexture { slot, texture });
        Ok(())
    }

    fn draw_indexed_instanced(&mut self, draw: &IndexedDraw) -> GpuResult<()> {
        let shader = self.current_pipeline()?.shader.clone();
        self.buffer(draw.vertex_buffer)?;

        let indices = self.buffer(draw.index_buffer)?;
        let index_end = (draw.index_offset as usize + draw.index_count as usize) * std::mem::size_of::<u32>();
        if index_end > indices.bytes.len() {
            return Err(GpuError::OutOfBounds(format!(
                "indices {}..{} exceed '{}'",
                draw.index_offset,
                draw.index_offset + draw.index_count,
                indices.desc.label
            )));
        }

        let instances = self.buffer(draw.instance_buffer)?;
        let needed = instances.desc.stride * draw.instance_count as usize;
        if needed > instances.bytes.len() {
            return Err(GpuError::OutOfBounds(format!(
                "{} instances exceed '{}'",
                draw.instance_count, instances.desc.label
            )));
        }

        self.commands.push(DeviceCommand::DrawIndexed {
            shader,
            index_count: draw.index_count,
            instance_count: draw.instance_count,
        });
        Ok(())
    }

    fn draw_fullscreen(&mut self) -> GpuResult<()> {
        let desc = self.current_pipeline()?.clone();
        let program = self
            .programs
            .get(&desc.shader)
            .ok_or_else(|| GpuError::MissingBinding(format!("no program for shader '{}'", desc.shader)))?;
        let target = self.framebuffer(desc.target)?;
        let view = target.color;
        let (width, height) = (target.width, target.height);

        let ctx = ShadeContext {
            buffers: &self.buffers,
            textures: &self.textures,
            constant_slots: &self.constant_slots,
            texture_slots: &self.texture_slots,
        };

        let mut shaded = Vec::with_capacity(view.layer_count as usize);
        let mut depth = target.depth.clone();
        for layer in view.base_layer..view.base_layer + view.layer_count {
            let mut texels = Vec::with_capacity((width * height) as usize);
            for y in 0..height {
                for x in 0..width {
                    let index = (y * width + x) as usize;
                    if let Some(depth) = depth.as_mut() {
                        if !desc.depth.compare.passes(FULLSCREEN_DEPTH, depth[index]) {
                            texels.push(None);
                            continue;
                        }
                        if desc.depth.write {
                            depth[index] = FULLSCREEN_DEPTH;
                        }
                    }
                    let fragment = Fragment {
                        layer,
                        uv: ((x as f32 + 0.5) / width as f32, (y as f32 + 0.5) / height as f32),
                        pixel: (x, y),
                        size: (width, height),
                    };
                    texels.push(Some(program.shade(&ctx, &fragment)));
                }
            }
            shaded.push((layer, texels));
        }

        let data = self
            .textures
            .get_mut(view.texture)
            .ok_or(GpuError::InvalidHandle { kind: "texture" })?;
        for (layer, texels) in shaded {
            let index = data.level_index(layer, view.mip);
            for (dst, src) in data.levels[index].iter_mut().zip(texels) {
                if let Some(color) = src {
                    *dst = color;
                }
            }
        }
        if let Some(target) = self.framebuffers.get_mut(desc.target) {
            target.depth = depth;
        }

        self.commands.push(DeviceCommand::DrawFullscreen {
            shader: desc.shader,
            width,
            height,
            layers: view.layer_count,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{BufferKind, DepthCompare, DepthState, TextureFormat};
    use approx::assert_relative_eq;

    struct Solid([f32; 4]);

    impl FullscreenProgram for Solid {
        fn shade(&self, _ctx: &ShadeContext<'_>, _fragment: &Fragment) -> [f32; 4] {
            self.0
        }
    }

    struct ConstantEcho;

    impl FullscreenProgram for ConstantEcho {
        fn shade(&self, ctx: &ShadeContext<'_>, _fragment: &Fragment) -> [f32; 4] {
            ctx.constants::<[f32; 4]>(0).unwrap_or([-1.0; 4])
        }
    }

    fn pipeline(device: &mut SoftwareDevice, shader: &str, target: FramebufferHandle, depth: DepthState) -> PipelineHandle {
        device
            .create_pipeline(&PipelineDesc {
                shader: shader.to_string(),
                target,
                depth,
                clear: ClearFlags::COLOR | ClearFlags::DEPTH,
                clear_color: [0.0, 0.0, 0.0, 1.0],
                clear_depth: 0.0,
                label: shader.to_string(),
            })
            .expect("pipeline")
    }

    fn owned_target(device: &mut SoftwareDevice) -> FramebufferHandle {
        device
            .create_framebuffer(&FramebufferDesc {
                width: 4,
                height: 2,
                color: ColorTarget::Owned(TextureFormat::Rgba16Float),
                depth: true,
                label: "target".to_string(),
            })
            .expect("framebuffer")
    }

    #[test]
    fn test_write_buffer_bounds() {
        let mut device = SoftwareDevice::new();
        let buffer = device
            .create_buffer(&BufferDesc {
                kind: BufferKind::Structured,
                size: 8,
                stride: 4,
                label: "small".to_string(),
            })
            .expect("buffer");
        assert!(device.write_buffer(buffer, 4, &[1, 2, 3, 4]).is_ok());
        assert!(matches!(
            device.write_buffer(buffer, 6, &[1, 2, 3, 4]),
            Err(GpuError::OutOfBounds(_))
        ));
        assert_eq!(device.read_buffer(buffer).expect("read"), &[0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_stale_handle_rejected() {
        let mut device = SoftwareDevice::new();
        let buffer = device
            .create_buffer(&BufferDesc::constant::<[f32; 4]>("stale"))
            .expect("buffer");
        device.destroy_buffer(buffer);
        assert_eq!(
            device.write_buffer(buffer, 0, &[0; 4]),
            Err(GpuError::InvalidHandle { kind: "buffer" })
        );
    }

    #[test]
    fn test_fullscreen_draw_reads_constants() {
        let mut device = SoftwareDevice::new();
        device.register_program("Echo", Box::new(ConstantEcho));
        let target = owned_target(&mut device);
        let pipe = pipeline(&mut device, "Echo", target, DepthState::DISABLED);

        let constants = device
            .create_buffer(&BufferDesc::constant::<[f32; 4]>("echo"))
            .expect("buffer");
        device
            .write_buffer(constants, 0, bytemuck::bytes_of(&[0.25_f32, 0.5, 0.75, 1.0]))
            .expect("write");
        device.bind_pipeline(pipe).expect("bind");
        device.bind_constant_buffer(0, constants).expect("bind constants");
        device.draw_fullscreen().expect("draw");

        let color = device.framebuffer_color(target).expect("color");
        let texels = device.read_texture(color, 0, 0).expect("texels");
        assert_eq!(texels.len(), 8);
        assert_relative_eq!(texels[5][2], 0.75);
    }

    #[test]
    fn test_sky_depth_test_respects_cleared_depth() {
        let mut device = SoftwareDevice::new();
        device.register_program("Sky", Box::new(Solid([1.0; 4])));
        let target = owned_target(&mut device);

        let sky = device
            .create_pipeline(&PipelineDesc {
                shader: "Sky".to_string(),
                target,
                depth: DepthState {
                    compare: DepthCompare::GreaterEqual,
                    write: false,
                },
                clear: ClearFlags::DEPTH,
                clear_color: [0.0; 4],
                clear_depth: 0.5,
                label: "sky".to_string(),
            })
            .expect("pipeline");
        device.bind_pipeline(sky).expect("bind");
        device.draw_fullscreen().expect("draw");

        // Depth 0.5 is "in front of" the far boundary, so the sky is rejected.
        let color = device.framebuffer_color(target).expect("color");
        assert!(device
            .read_texture(color, 0, 0)
            .expect("texels")
            .iter()
            .all(|texel| texel[0] == 0.0));
    }

    #[test]
    fn test_missing_program_is_reported() {
        let mut device = SoftwareDevice::new();
        let target = owned_target(&mut device);
        let pipe = pipeline(&mut device, "Unknown", target, DepthState::DISABLED);
        device.bind_pipeline(pipe).expect("bind");
        assert!(matches!(device.draw_fullscreen(), Err(GpuError::MissingBinding(_))));
    }

    #[test]
    fn test_resize_replaces_owned_color() {
        let mut device = SoftwareDevice::new();
        let target = owned_target(&mut device);
        let before = device.framebuffer_color(target).expect("color");
        device.resize_framebuffer(target, 8, 8).expect("resize");

        assert_eq!(device.framebuffer_size(target).expect("size"), (8, 8));
        let after = device.framebuffer_color(target).expect("color");
        assert_ne!(before, after);
        assert_eq!(device.texture_count(), 1);
    }

    #[test]
    fn test_view_framebuffer_must_match_mip_extent() {
        let mut device = SoftwareDevice::new();
        let cube = device
            .create_texture(&TextureDesc::cube("cube", 8, 4, TextureFormat::Rgba16Float))
            .expect("texture");
        let view = TextureView {
            texture: cube,
            mip: 1,
            base_layer: 0,
            layer_count: 6,
        };
        let mut desc = FramebufferDesc {
            width: 4,
            height: 4,
            color: ColorTarget::View(view),
            depth: false,
            label: "mip1".to_string(),
        };
        assert!(device.create_framebuffer(&desc).is_ok());
        desc.width = 8;
        assert!(matches!(
            device.create_framebuffer(&desc),
            Err(GpuError::InvalidOperation(_))
        ));
    }
}
