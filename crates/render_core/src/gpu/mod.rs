//! # Graphics Device Contract
//!
//! The renderer talks to the GPU only through [`GraphicsDevice`]: resource
//! factories taking descriptor structs, byte uploads, slot-based binding and
//! two draw entry points. Backends (Vulkan, wgpu, the headless
//! [`software::SoftwareDevice`]) implement it; nothing above this module
//! names a graphics API.
//!
//! Handles are generation-checked slot-map keys, so a handle outliving its
//! resource is reported as [`GpuError::InvalidHandle`] instead of aliasing a
//! newer resource.

pub mod software;

use bitflags::bitflags;

slotmap::new_key_type! {
    /// Handle to a GPU buffer
    pub struct BufferHandle;
    /// Handle to a GPU texture
    pub struct TextureHandle;
    /// Handle to a framebuffer (render target)
    pub struct FramebufferHandle;
    /// Handle to a graphics pipeline
    pub struct PipelineHandle;
}

/// Result type for device operations
pub type GpuResult<T> = Result<T, GpuError>;

/// Errors reported by graphics devices
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GpuError {
    /// Handle does not refer to a live resource
    #[error("Invalid {kind} handle")]
    InvalidHandle {
        /// Resource kind ("buffer", "texture", ...)
        kind: &'static str,
    },

    /// Write or view exceeds the resource bounds
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    /// Descriptor or call is not valid for this resource
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Draw issued without the state it needs
    #[error("Missing binding: {0}")]
    MissingBinding(String),
}

/// Buffer usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    /// Small uniform block bound to a constant slot
    Constant,
    /// Array of fixed-stride elements read by shaders
    Structured,
    /// Per-vertex data
    Vertex,
    /// 32-bit indices
    Index,
    /// Per-instance vertex data
    Instance,
}

/// Buffer creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDesc {
    /// Usage
    pub kind: BufferKind,
    /// Size in bytes
    pub size: usize,
    /// Element stride in bytes (0 for untyped constant blocks)
    pub stride: usize,
    /// Debug label
    pub label: String,
}

impl BufferDesc {
    /// Constant buffer large enough for one `T`
    pub fn constant<T>(label: impl Into<String>) -> Self {
        Self {
            kind: BufferKind::Constant,
            size: std::mem::size_of::<T>(),
            stride: 0,
            label: label.into(),
        }
    }

    /// Structured buffer of `count` elements of `stride` bytes
    pub fn structured(label: impl Into<String>, stride: usize, count: usize) -> Self {
        Self {
            kind: BufferKind::Structured,
            size: stride * count,
            stride,
            label: label.into(),
        }
    }
}

/// Texel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 4 x f32
    Rgba32Float,
    /// 4 x f16 (HDR targets)
    Rgba16Float,
    /// 4 x u8, sRGB encoded
    Rgba8Srgb,
}

/// Texture creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    /// Width of mip 0
    pub width: u32,
    /// Height of mip 0
    pub height: u32,
    /// Array layers (6 for cube maps)
    pub layers: u32,
    /// Mip levels
    pub mip_levels: u32,
    /// Sampled as a cube map
    pub cube: bool,
    /// Texel format
    pub format: TextureFormat,
    /// Debug label
    pub label: String,
}

impl TextureDesc {
    /// Square cube texture with `mip_levels` levels
    pub fn cube(label: impl Into<String>, size: u32, mip_levels: u32, format: TextureFormat) -> Self {
        Self {
            width: size,
            height: size,
            layers: 6,
            mip_levels,
            cube: true,
            format,
            label: label.into(),
        }
    }

    /// Single-layer 2D texture without mips
    pub fn d2(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            layers: 1,
            mip_levels: 1,
            cube: false,
            format,
            label: label.into(),
        }
    }

    /// Extent of a mip level (never below 1x1)
    pub fn mip_extent(&self, mip: u32) -> (u32, u32) {
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }
}

/// A mip level and layer range of a texture, used as a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureView {
    /// Viewed texture
    pub texture: TextureHandle,
    /// Mip level
    pub mip: u32,
    /// First layer
    pub base_layer: u32,
    /// Number of layers, rendered as layered output
    pub layer_count: u32,
}

/// Color attachment of a framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorTarget {
    /// The device allocates a color texture sized with the framebuffer
    Owned(TextureFormat),
    /// Render into an existing texture view (fixed size)
    View(TextureView),
}

/// Framebuffer creation parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferDesc {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Color attachment
    pub color: ColorTarget,
    /// Attach a depth buffer
    pub depth: bool,
    /// Debug label
    pub label: String,
}

/// Depth comparison function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthCompare {
    /// Pass when fragment depth < stored depth
    Less,
    /// Pass when fragment depth > stored depth (reversed-Z geometry)
    Greater,
    /// Pass when fragment depth >= stored depth (reversed-Z sky at the far boundary)
    GreaterEqual,
    /// Always pass (depth test disabled)
    Always,
}

impl DepthCompare {
    /// Evaluate the comparison
    pub fn passes(self, fragment: f32, stored: f32) -> bool {
        match self {
            Self::Less => fragment < stored,
            Self::Greater => fragment > stored,
            Self::GreaterEqual => fragment >= stored,
            Self::Always => true,
        }
    }
}

/// Fixed depth state of a pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthState {
    /// Comparison function
    pub compare: DepthCompare,
    /// Write passing fragments' depth
    pub write: bool,
}

impl DepthState {
    /// No depth test, no depth write
    pub const DISABLED: Self = Self {
        compare: DepthCompare::Always,
        write: false,
    };
}

bitflags! {
    /// Attachments cleared when a pipeline is bound
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearFlags: u8 {
        /// Clear the color attachment to `clear_color`
        const COLOR = 0b01;
        /// Clear the depth attachment to `clear_depth`
        const DEPTH = 0b10;
    }
}

/// Pipeline creation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDesc {
    /// Shader program name (resolved through the shader library)
    pub shader: String,
    /// Render target this pipeline draws into
    pub target: FramebufferHandle,
    /// Depth test/write state
    pub depth: DepthState,
    /// Clears performed on bind
    pub clear: ClearFlags,
    /// Color clear value
    pub clear_color: [f32; 4],
    /// Depth clear value (0.0 is "infinitely far" under reversed-Z)
    pub clear_depth: f32,
    /// Debug label
    pub label: String,
}

/// One instanced, indexed draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedDraw {
    /// Vertex buffer
    pub vertex_buffer: BufferHandle,
    /// Index buffer
    pub index_buffer: BufferHandle,
    /// Per-instance data
    pub instance_buffer: BufferHandle,
    /// First index
    pub index_offset: u32,
    /// Index count
    pub index_count: u32,
    /// Added to every index
    pub vertex_offset: i32,
    /// Instances to draw
    pub instance_count: u32,
}

/// GPU device abstraction consumed by the renderer
pub trait GraphicsDevice {
    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDesc) -> GpuResult<BufferHandle>;

    /// Release a buffer; stale handles are ignored
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Size of a buffer in bytes
    fn buffer_size(&self, buffer: BufferHandle) -> GpuResult<usize>;

    /// Upload bytes at `offset`
    fn write_buffer(&mut self, buffer: BufferHandle, offset: usize, data: &[u8]) -> GpuResult<()>;

    /// Scoped map-for-write of the whole buffer
    fn map_buffer_write(
        &mut self,
        buffer: BufferHandle,
        write: &mut dyn FnMut(&mut [u8]),
    ) -> GpuResult<()>;

    /// Create a texture with undefined contents
    fn create_texture(&mut self, desc: &TextureDesc) -> GpuResult<TextureHandle>;

    /// Release a texture; stale handles are ignored
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Descriptor a texture was created with
    fn texture_desc(&self, texture: TextureHandle) -> GpuResult<TextureDesc>;

    /// Upload RGBA f32 texels of one layer/mip (`width * height * 4` floats)
    fn write_texture(&mut self, texture: TextureHandle, layer: u32, mip: u32, texels: &[f32]) -> GpuResult<()>;

    /// Create a framebuffer
    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> GpuResult<FramebufferHandle>;

    /// Release a framebuffer (and its owned attachments)
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);

    /// Resize a framebuffer with owned attachments
    fn resize_framebuffer(&mut self, framebuffer: FramebufferHandle, width: u32, height: u32) -> GpuResult<()>;

    /// Current framebuffer extent
    fn framebuffer_size(&self, framebuffer: FramebufferHandle) -> GpuResult<(u32, u32)>;

    /// Texture backing the color attachment
    fn framebuffer_color(&self, framebuffer: FramebufferHandle) -> GpuResult<TextureHandle>;

    /// Create a pipeline bound to its target framebuffer
    fn create_pipeline(&mut self, desc: &PipelineDesc) -> GpuResult<PipelineHandle>;

    /// Release a pipeline; stale handles are ignored
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle);

    /// Make a pipeline current and perform its configured clears
    fn bind_pipeline(&mut self, pipeline: PipelineHandle) -> GpuResult<()>;

    /// Bind a constant buffer to a slot
    fn bind_constant_buffer(&mut self, slot: u32, buffer: BufferHandle) -> GpuResult<()>;

    /// Bind a structured buffer to a slot
    fn bind_structured_buffer(&mut self, slot: u32, buffer: BufferHandle) -> GpuResult<()>;

    /// Bind a texture to a slot
    fn bind_texture(&mut self, slot: u32, texture: TextureHandle) -> GpuResult<()>;

    /// Issue an instanced indexed draw with the current pipeline
    fn draw_indexed_instanced(&mut self, draw: &IndexedDraw) -> GpuResult<()>;

    /// Issue a fullscreen draw with the current pipeline
    fn draw_fullscreen(&mut self) -> GpuResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_extent_never_zero() {
        let desc = TextureDesc::cube("env", 8, 4, TextureFormat::Rgba16Float);
        assert_eq!(desc.mip_extent(0), (8, 8));
        assert_eq!(desc.mip_extent(3), (1, 1));
        assert_eq!(desc.mip_extent(6), (1, 1));
    }

    #[test]
    fn test_reversed_z_compare_modes() {
        assert!(DepthCompare::Greater.passes(0.5, 0.0));
        assert!(!DepthCompare::Greater.passes(0.0, 0.0));
        assert!(DepthCompare::GreaterEqual.passes(0.0, 0.0));
        assert!(!DepthCompare::GreaterEqual.passes(0.0, 0.3));
    }
}
