//! Binding slots and constant-buffer layouts shared by every pass
//!
//! All layouts are `#[repr(C)]`, 16-byte multiples and `Pod`, so they can be
//! uploaded with `bytemuck::bytes_of` and read back by the CPU programs.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{Mat4, Vec3};
use crate::settings::RenderSettings;

/// Constant buffer slots
pub mod constant_slot {
    /// [`GpuCamera`](super::GpuCamera)
    pub const CAMERA: u32 = 0;
    /// [`GpuRenderSettings`](super::GpuRenderSettings)
    pub const SETTINGS: u32 = 1;
    /// Material constant block
    pub const MATERIAL: u32 = 2;
    /// [`IblParams`](super::IblParams)
    pub const IBL_PARAMS: u32 = 3;
}

/// Structured buffer slots
pub mod structured_slot {
    /// Directional lights
    pub const DIRECTIONAL_LIGHTS: u32 = 0;
    /// Point lights
    pub const POINT_LIGHTS: u32 = 1;
    /// Spot lights
    pub const SPOT_LIGHTS: u32 = 2;
}

/// Texture slots
pub mod texture_slot {
    /// Skybox cube map
    pub const ENVIRONMENT: u32 = 0;
    /// Diffuse irradiance cube map
    pub const IRRADIANCE: u32 = 1;
    /// Specular prefiltered cube map
    pub const PREFILTERED: u32 = 2;
    /// HDR color attachment read by post-processing
    pub const HDR_COLOR: u32 = 3;
    /// First slot of material textures, in shader layout order
    pub const MATERIAL_BASE: u32 = 4;
}

fn columns(matrix: &Mat4) -> [[f32; 4]; 4] {
    (*matrix).into()
}

fn point(vector: &Vec3) -> [f32; 4] {
    [vector.x, vector.y, vector.z, 1.0]
}

fn direction(vector: &Vec3) -> [f32; 4] {
    [vector.x, vector.y, vector.z, 0.0]
}

/// Camera constant block
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuCamera {
    /// Projection
    pub projection: [[f32; 4]; 4],
    /// Inverse projection
    pub inverse_projection: [[f32; 4]; 4],
    /// View
    pub view: [[f32; 4]; 4],
    /// Inverse view
    pub inverse_view: [[f32; 4]; 4],
    /// Projection * view
    pub view_projection: [[f32; 4]; 4],
    /// Inverse of projection * view
    pub inverse_view_projection: [[f32; 4]; 4],
    /// World-space camera position (w = 1)
    pub position: [f32; 4],
    /// World-space directions through the top-left, top-right and
    /// bottom-left corners at unit view depth, without camera translation.
    /// A pixel's view ray is `tl + u * (tr - tl) + v * (bl - tl)`.
    pub frustum_corners: [[f32; 4]; 3],
}

impl GpuCamera {
    /// Pack matrices, position and frustum corners
    pub fn new(
        projection: &Mat4,
        view: &Mat4,
        position: &Vec3,
        corners: &[Vec3; 3],
    ) -> Self {
        let view_projection = projection * view;
        Self {
            projection: columns(projection),
            inverse_projection: columns(&projection.try_inverse().unwrap_or_else(Mat4::identity)),
            view: columns(view),
            inverse_view: columns(&view.try_inverse().unwrap_or_else(Mat4::identity)),
            view_projection: columns(&view_projection),
            inverse_view_projection: columns(&view_projection.try_inverse().unwrap_or_else(Mat4::identity)),
            position: point(position),
            frustum_corners: [direction(&corners[0]), direction(&corners[1]), direction(&corners[2])],
        }
    }

    /// View ray direction (unnormalized) through normalized screen `(u, v)`
    pub fn corner_ray(&self, u: f32, v: f32) -> Vec3 {
        let corner = |i: usize| Vec3::new(self.frustum_corners[i][0], self.frustum_corners[i][1], self.frustum_corners[i][2]);
        let (top_left, top_right, bottom_left) = (corner(0), corner(1), corner(2));
        top_left + (top_right - top_left) * u + (bottom_left - top_left) * v
    }
}

/// Per-frame settings constant block
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuRenderSettings {
    /// Linear exposure multiplier
    pub exposure: f32,
    /// Output gamma
    pub gamma: f32,
    /// Exposure value the multiplier was derived from
    pub ev100: f32,
    /// Padding
    pub _pad: f32,
}

impl From<&RenderSettings> for GpuRenderSettings {
    fn from(settings: &RenderSettings) -> Self {
        Self {
            exposure: settings.exposure(),
            gamma: settings.gamma,
            ev100: settings.exposure_ev100,
            _pad: 0.0,
        }
    }
}

/// IBL precompute constant block, uploaded once per rendered mip
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct IblParams {
    /// Edge length of the source environment map
    pub env_map_size: f32,
    /// Samples per texel
    pub sample_count: u32,
    /// Roughness this mip represents
    pub roughness: f32,
    /// Padding
    pub _pad: f32,
}
