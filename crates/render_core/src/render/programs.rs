//! CPU implementations of the fullscreen shaders for [`SoftwareDevice`]
//!
//! Each program reads the same bindings its GPU counterpart would: the
//! camera and settings constant blocks, the IBL parameter block and the
//! environment or HDR textures.

use crate::foundation::math::Vec3;
use crate::gpu::software::{Fragment, FullscreenProgram, ShadeContext, SoftwareDevice};
use crate::ibl::sampling::{convolve_irradiance, cube_face_direction, prefilter_radiance};
use crate::render::bindings::{constant_slot, texture_slot, GpuCamera, GpuRenderSettings, IblParams};
use crate::render::shader::{IRRADIANCE, POST_PROCESS, PREFILTER, SKYBOX};

const UNBOUND: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

fn rgb(texel: [f32; 4]) -> Vec3 {
    Vec3::new(texel[0], texel[1], texel[2])
}

fn opaque(color: Vec3) -> [f32; 4] {
    [color.x, color.y, color.z, 1.0]
}

/// Diffuse irradiance convolution of the environment, one cube face per layer
pub struct IrradianceProgram;

impl FullscreenProgram for IrradianceProgram {
    fn shade(&self, ctx: &ShadeContext<'_>, fragment: &Fragment) -> [f32; 4] {
        let (Some(environment), Some(params)) = (
            ctx.texture(texture_slot::ENVIRONMENT),
            ctx.constants::<IblParams>(constant_slot::IBL_PARAMS),
        ) else {
            return UNBOUND;
        };

        let normal = cube_face_direction(fragment.layer, fragment.uv.0, fragment.uv.1);
        opaque(convolve_irradiance(&normal, params.sample_count, |direction| {
            rgb(environment.sample_cube(direction, 0))
        }))
    }
}

/// GGX prefilter of the environment at the roughness in [`IblParams`]
pub struct PrefilterProgram;

impl FullscreenProgram for PrefilterProgram {
    fn shade(&self, ctx: &ShadeContext<'_>, fragment: &Fragment) -> [f32; 4] {
        let (Some(environment), Some(params)) = (
            ctx.texture(texture_slot::ENVIRONMENT),
            ctx.constants::<IblParams>(constant_slot::IBL_PARAMS),
        ) else {
            return UNBOUND;
        };

        let normal = cube_face_direction(fragment.layer, fragment.uv.0, fragment.uv.1);
        opaque(prefilter_radiance(&normal, params.roughness, params.sample_count, |direction| {
            rgb(environment.sample_cube(direction, 0))
        }))
    }
}

/// Environment background reconstructed from the camera frustum corners
pub struct SkyboxProgram;

impl FullscreenProgram for SkyboxProgram {
    fn shade(&self, ctx: &ShadeContext<'_>, fragment: &Fragment) -> [f32; 4] {
        let (Some(environment), Some(camera)) = (
            ctx.texture(texture_slot::ENVIRONMENT),
            ctx.constants::<GpuCamera>(constant_slot::CAMERA),
        ) else {
            return UNBOUND;
        };

        let direction = camera.corner_ray(fragment.uv.0, fragment.uv.1);
        opaque(rgb(environment.sample_cube(&direction, 0)))
    }
}

/// Exposure and gamma resolve of the HDR color attachment
pub struct PostProcessProgram;

impl FullscreenProgram for PostProcessProgram {
    fn shade(&self, ctx: &ShadeContext<'_>, fragment: &Fragment) -> [f32; 4] {
        let (Some(hdr), Some(settings)) = (
            ctx.texture(texture_slot::HDR_COLOR),
            ctx.constants::<GpuRenderSettings>(constant_slot::SETTINGS),
        ) else {
            return UNBOUND;
        };

        let color = rgb(hdr.sample_2d(0, 0, fragment.uv.0, fragment.uv.1));
        let inverse_gamma = 1.0 / settings.gamma;
        opaque((color * settings.exposure).map(|c| c.max(0.0).powf(inverse_gamma)))
    }
}

/// Register the fullscreen programs of the built-in shader set
pub fn install_builtin_programs(device: &mut SoftwareDevice) {
    device.register_program(IRRADIANCE, Box::new(IrradianceProgram));
    device.register_program(PREFILTER, Box::new(PrefilterProgram));
    device.register_program(SKYBOX, Box::new(SkyboxProgram));
    device.register_program(POST_PROCESS, Box::new(PostProcessProgram));
}
