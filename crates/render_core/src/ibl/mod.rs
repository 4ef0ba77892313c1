//! # Image-Based Lighting Precomputation
//!
//! Derives the two lighting cube maps from a skybox:
//!
//! - **Irradiance**: one mip, six faces; each face is a fullscreen pass
//!   integrating the sky's radiance over the hemisphere around each texel's
//!   direction (diffuse response).
//! - **Prefiltered**: `floor(log2(size)) + 1` mips; mip `m` is the GGX
//!   prefilter at roughness `m / (mips - 1)`, each mip rendered through its
//!   own framebuffer view with its own parameter upload (specular response).
//!
//! Both maps are pure functions of the skybox and are recomputed in full
//! whenever the skybox changes. Framebuffers, pipelines and parameter buffers
//! are transient and released before returning.

pub mod sampling;

use crate::gpu::{
    BufferDesc, BufferHandle, ClearFlags, ColorTarget, DepthState, FramebufferDesc, GraphicsDevice,
    PipelineDesc, TextureDesc, TextureFormat, TextureHandle, TextureView,
};
use crate::render::bindings::{constant_slot, texture_slot, IblParams};
use crate::render::shader::{ShaderLibrary, IRRADIANCE, PREFILTER};
use crate::render::RenderResult;
use crate::settings::IblSettings;
use sampling::{mip_count, roughness_for_mip, CUBE_FACES};

/// Skybox plus the lighting maps derived from it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentMaps {
    /// User-supplied environment cube map (not owned)
    pub skybox: TextureHandle,
    /// Diffuse irradiance cube map
    pub irradiance: TextureHandle,
    /// Specular prefiltered cube map
    pub prefiltered: TextureHandle,
    /// Mip levels of the prefiltered map
    pub prefiltered_mips: u32,
}

impl EnvironmentMaps {
    /// Compute both lighting maps for `skybox`
    pub fn precompute(
        device: &mut dyn GraphicsDevice,
        shaders: &ShaderLibrary,
        skybox: TextureHandle,
        settings: &IblSettings,
    ) -> RenderResult<Self> {
        log::info!("Precomputing IBL maps ({}x{} per face)", settings.map_size, settings.map_size);
        let irradiance = compute_irradiance_map(device, shaders, skybox, settings)?;
        let prefiltered = match compute_prefiltered_map(device, shaders, skybox, settings) {
            Ok(texture) => texture,
            Err(e) => {
                device.destroy_texture(irradiance);
                return Err(e);
            }
        };

        Ok(Self {
            skybox,
            irradiance,
            prefiltered,
            prefiltered_mips: mip_count(settings.map_size),
        })
    }

    /// Release the derived maps; the skybox stays with its owner
    pub fn release(&self, device: &mut dyn GraphicsDevice) {
        device.destroy_texture(self.irradiance);
        device.destroy_texture(self.prefiltered);
    }
}

fn upload_params(device: &mut dyn GraphicsDevice, label: String, params: &IblParams) -> RenderResult<BufferHandle> {
    let buffer = device.create_buffer(&BufferDesc::constant::<IblParams>(label))?;
    device.write_buffer(buffer, 0, bytemuck::bytes_of(params))?;
    Ok(buffer)
}

/// Draw one fullscreen pass of `shader` into `view`, with transient
/// framebuffer and pipeline
fn render_into_view(
    device: &mut dyn GraphicsDevice,
    shader: &str,
    view: TextureView,
    size: (u32, u32),
    params: BufferHandle,
    skybox: TextureHandle,
) -> RenderResult<()> {
    let label = format!("{shader} mip {} layer {}", view.mip, view.base_layer);
    let framebuffer = device.create_framebuffer(&FramebufferDesc {
        width: size.0,
        height: size.1,
        color: ColorTarget::View(view),
        depth: false,
        label: label.clone(),
    })?;

    let result = device
        .create_pipeline(&PipelineDesc {
            shader: shader.to_string(),
            target: framebuffer,
            depth: DepthState::DISABLED,
            clear: ClearFlags::COLOR,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            clear_depth: 0.0,
            label,
        })
        .and_then(|pipeline| {
            let drawn = device
                .bind_pipeline(pipeline)
                .and_then(|()| device.bind_constant_buffer(constant_slot::IBL_PARAMS, params))
                .and_then(|()| device.bind_texture(texture_slot::ENVIRONMENT, skybox))
                .and_then(|()| device.draw_fullscreen());
            device.destroy_pipeline(pipeline);
            drawn
        });

    device.destroy_framebuffer(framebuffer);
    Ok(result?)
}

/// Diffuse irradiance cube map: one mip, one pass per face
pub fn compute_irradiance_map(
    device: &mut dyn GraphicsDevice,
    shaders: &ShaderLibrary,
    skybox: TextureHandle,
    settings: &IblSettings,
) -> RenderResult<TextureHandle> {
    shaders.get(IRRADIANCE)?;
    let env_map_size = device.texture_desc(skybox)?.width;
    let size = settings.map_size;

    let texture = device.create_texture(&TextureDesc::cube("irradiance", size, 1, TextureFormat::Rgba16Float))?;
    let params = upload_params(
        device,
        "irradiance params".to_string(),
        &IblParams {
            env_map_size: env_map_size as f32,
            sample_count: settings.irradiance_samples(),
            roughness: 0.0,
            _pad: 0.0,
        },
    )?;

    let mut result = Ok(());
    for face in 0..CUBE_FACES {
        let view = TextureView {
            texture,
            mip: 0,
            base_layer: face,
            layer_count: 1,
        };
        result = render_into_view(device, IRRADIANCE, view, (size, size), params, skybox);
        if result.is_err() {
            break;
        }
    }
    device.destroy_buffer(params);

    match result {
        Ok(()) => {
            log::debug!("Irradiance map ready ({} samples)", settings.irradiance_samples());
            Ok(texture)
        }
        Err(e) => {
            device.destroy_texture(texture);
            Err(e)
        }
    }
}

/// Specular prefiltered cube map: one layered pass per mip, roughness
/// sweeping linearly from 0 at mip 0 to 1 at the last mip
pub fn compute_prefiltered_map(
    device: &mut dyn GraphicsDevice,
    shaders: &ShaderLibrary,
    skybox: TextureHandle,
    settings: &IblSettings,
) -> RenderResult<TextureHandle> {
    shaders.get(PREFILTER)?;
    let env_map_size = device.texture_desc(skybox)?.width;
    let mips = mip_count(settings.map_size);
    let desc = TextureDesc::cube("prefiltered", settings.map_size, mips, TextureFormat::Rgba16Float);
    let texture = device.create_texture(&desc)?;

    for mip in 0..mips {
        let roughness = roughness_for_mip(mip, mips);
        let params = match upload_params(
            device,
            format!("prefilter params mip {mip}"),
            &IblParams {
                env_map_size: env_map_size as f32,
                sample_count: settings.prefilter_samples(),
                roughness,
                _pad: 0.0,
            },
        ) {
            Ok(params) => params,
            Err(e) => {
                device.destroy_texture(texture);
                return Err(e);
            }
        };

        let view = TextureView {
            texture,
            mip,
            base_layer: 0,
            layer_count: CUBE_FACES,
        };
        let drawn = render_into_view(device, PREFILTER, view, desc.mip_extent(mip), params, skybox);
        device.destroy_buffer(params);
        if let Err(e) = drawn {
            device.destroy_texture(texture);
            return Err(e);
        }
        log::trace!("Prefiltered mip {} at roughness {:.3}", mip, roughness);
    }

    log::debug!("Prefiltered map ready ({} mips)", mips);
    Ok(texture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::{DeviceCommand, SoftwareDevice};
    use crate::render::programs::install_builtin_programs;
    use crate::foundation::math::Vec3;
    use approx::assert_relative_eq;
    use sampling::cube_face_direction;

    const SIZE: u32 = 8;

    fn settings() -> IblSettings {
        IblSettings {
            map_size: SIZE,
            irradiance_sample_count: 64,
            prefilter_sample_count: 16,
        }
    }

    fn skybox(device: &mut SoftwareDevice, color: impl Fn(Vec3) -> [f32; 3]) -> TextureHandle {
        let texture = device
            .create_texture(&TextureDesc::cube("sky", SIZE, 1, TextureFormat::Rgba32Float))
            .expect("sky");
        for face in 0..CUBE_FACES {
            let mut texels = Vec::new();
            for y in 0..SIZE {
                for x in 0..SIZE {
                    let u = (x as f32 + 0.5) / SIZE as f32;
                    let v = (y as f32 + 0.5) / SIZE as f32;
                    let [r, g, b] = color(cube_face_direction(face, u, v));
                    texels.extend_from_slice(&[r, g, b, 1.0]);
                }
            }
            device.write_texture(texture, face, 0, &texels).expect("upload");
        }
        texture
    }

    fn device() -> (SoftwareDevice, ShaderLibrary) {
        let mut device = SoftwareDevice::new();
        install_builtin_programs(&mut device);
        (device, ShaderLibrary::with_builtin_shaders())
    }

    #[test]
    fn test_uniform_sky_gives_uniform_maps() {
        let (mut device, shaders) = device();
        let sky = skybox(&mut device, |_| [0.5, 0.25, 1.0]);
        let maps = EnvironmentMaps::precompute(&mut device, &shaders, sky, &settings()).expect("precompute");

        for face in 0..CUBE_FACES {
            for texel in device.read_texture(maps.irradiance, face, 0).expect("irradiance") {
                assert_relative_eq!(texel[0], 0.5, epsilon = 1e-4);
                assert_relative_eq!(texel[2], 1.0, epsilon = 1e-4);
            }
            for mip in 0..maps.prefiltered_mips {
                for texel in device.read_texture(maps.prefiltered, face, mip).expect("prefiltered") {
                    assert_relative_eq!(texel[1], 0.25, epsilon = 1e-4);
                }
            }
        }
    }

    #[test]
    fn test_directional_sky_gives_varying_irradiance() {
        let (mut device, shaders) = device();
        let sky = skybox(&mut device, |d| if d.y > 0.0 { [4.0, 4.0, 4.0] } else { [0.0, 0.0, 0.0] });
        let irradiance = compute_irradiance_map(&mut device, &shaders, sky, &settings()).expect("irradiance");

        // Texel (4, 4) sits next to the face center.
        let center = (4 * SIZE + 4) as usize;
        let up = device.read_texture(irradiance, 2, 0).expect("+Y")[center][0];
        let down = device.read_texture(irradiance, 3, 0).expect("-Y")[center][0];
        assert!(up > 3.5, "upward irradiance {up}");
        assert!(down < 0.5, "downward irradiance {down}");
    }

    #[test]
    fn test_pass_structure_and_cleanup() {
        let (mut device, shaders) = device();
        let sky = skybox(&mut device, |_| [1.0, 1.0, 1.0]);
        let buffers_before = device.buffer_count();
        device.clear_commands();

        let maps = EnvironmentMaps::precompute(&mut device, &shaders, sky, &settings()).expect("precompute");
        let draws: Vec<_> = device
            .commands()
            .iter()
            .filter_map(|command| match command {
                DeviceCommand::DrawFullscreen { shader, width, layers, .. } => Some((shader.as_str(), *width, *layers)),
                _ => None,
            })
            .collect();

        let irradiance_draws = draws.iter().filter(|(shader, ..)| *shader == IRRADIANCE).count();
        assert_eq!(irradiance_draws, 6);

        let prefilter: Vec<_> = draws.iter().filter(|(shader, ..)| *shader == PREFILTER).collect();
        assert_eq!(prefilter.len(), 4);
        assert_eq!(prefilter[0].1, 8);
        assert_eq!(prefilter[3].1, 1);
        assert!(prefilter.iter().all(|(_, _, layers)| *layers == 6));

        assert_eq!(device.buffer_count(), buffers_before);
        maps.release(&mut device);
        assert_eq!(device.texture_count(), 1);
    }

    #[test]
    fn test_missing_program_shader_is_fatal() {
        let mut device = SoftwareDevice::new();
        let sky = skybox(&mut device, |_| [1.0, 1.0, 1.0]);
        let result = compute_irradiance_map(&mut device, &ShaderLibrary::new(), sky, &settings());
        assert!(matches!(result, Err(crate::render::RenderError::ShaderNotFound(_))));
    }
}
