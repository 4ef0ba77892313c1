//! # Engine Settings
//!
//! Serializable configuration for the renderer and the camera controller.
//! Loaded through [`Config`] from TOML or RON, with defaults matching the
//! engine's fixed shader set.

use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigError};

/// Image-based lighting precomputation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IblSettings {
    /// Edge length of the irradiance and prefiltered cube maps. Matches the
    /// BRDF lookup-table resolution; must be a power of two.
    pub map_size: u32,
    /// Hemisphere samples per irradiance texel (0 = use `map_size`)
    pub irradiance_sample_count: u32,
    /// GGX samples per prefiltered texel (0 = use `map_size`)
    pub prefilter_sample_count: u32,
}

impl IblSettings {
    /// Sample count actually used for the irradiance convolution
    pub fn irradiance_samples(&self) -> u32 {
        if self.irradiance_sample_count == 0 {
            self.map_size
        } else {
            self.irradiance_sample_count
        }
    }

    /// Sample count actually used for specular prefiltering
    pub fn prefilter_samples(&self) -> u32 {
        if self.prefilter_sample_count == 0 {
            self.map_size
        } else {
            self.prefilter_sample_count
        }
    }
}

impl Default for IblSettings {
    fn default() -> Self {
        Self {
            map_size: 512,
            irradiance_sample_count: 0,
            prefilter_sample_count: 0,
        }
    }
}

/// Renderer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    /// Exposure value at ISO 100 used by the post-process pass
    pub exposure_ev100: f32,
    /// Output gamma
    pub gamma: f32,
    /// Clear color of the HDR target [R, G, B, A]
    pub clear_color: [f32; 4],
    /// IBL precomputation parameters
    pub ibl: IblSettings,
    /// Initial element capacity of each light structured buffer
    pub initial_light_capacity: u32,
}

impl RendererSettings {
    /// Check values that would otherwise surface as GPU errors later
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ibl.map_size == 0 || !self.ibl.map_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "IBL map size must be a non-zero power of two, got {}",
                self.ibl.map_size
            )));
        }
        if self.gamma <= 0.0 {
            return Err(ConfigError::Invalid(format!("gamma must be positive, got {}", self.gamma)));
        }
        if self.initial_light_capacity == 0 {
            return Err(ConfigError::Invalid("initial light capacity must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Per-frame settings derived from this configuration
    pub fn frame_settings(&self) -> RenderSettings {
        RenderSettings {
            exposure_ev100: self.exposure_ev100,
            gamma: self.gamma,
        }
    }
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            exposure_ev100: 0.0,
            gamma: 2.2,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            ibl: IblSettings::default(),
            initial_light_capacity: 16,
        }
    }
}

/// Camera controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Vertical field of view in degrees
    pub fov_degrees: f32,
    /// Near plane distance (the far plane is at infinity)
    pub near: f32,
    /// Movement speed in units per second
    pub move_speed: f32,
    /// Rotation speed in radians per pixel of mouse travel
    pub rotation_speed: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            fov_degrees: 60.0,
            near: 0.1,
            move_speed: 5.0,
            rotation_speed: 0.005,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Renderer configuration
    pub renderer: RendererSettings,
    /// Camera configuration
    pub camera: CameraSettings,
}

impl Config for EngineSettings {}

/// Per-frame settings uploaded to the settings constant buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    /// Exposure value at ISO 100
    pub exposure_ev100: f32,
    /// Output gamma
    pub gamma: f32,
}

impl RenderSettings {
    /// Linear exposure multiplier for this frame
    pub fn exposure(&self) -> f32 {
        exposure_from_ev100(self.exposure_ev100)
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        RendererSettings::default().frame_settings()
    }
}

/// Photometric exposure: `1 / (1.2 * 2^EV100)` (saturation-based, ISO 100)
pub fn exposure_from_ev100(ev100: f32) -> f32 {
    1.0 / (1.2 * 2.0_f32.powf(ev100))
}
