//! # Light Environment
//!
//! Directional, point and spot lights in shader-ready units. Point and spot
//! lights are paired with the mesh instance that represents them on screen;
//! their world position (and spot direction) is read from that instance's
//! transform every frame, so a dragged light bulb lights the scene from where
//! it is drawn.
//!
//! User-facing inputs are photometric: a point light is described by the
//! irradiance it should deliver at a reference distance, and converted to the
//! radiance its finite-size sphere must emit.

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{translation_of, Vec3};
use crate::gpu::{BufferDesc, BufferHandle, GraphicsDevice};
use crate::render::property::{next_object_id, InstanceRef};
use crate::render::RenderResult;

/// Malformed light parameters
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LightError {
    /// Sphere light radius must be positive
    #[error("light radius must be positive, got {0}")]
    NonPositiveRadius(f32),

    /// Reference distance must be positive
    #[error("reference distance must be positive, got {0}")]
    NonPositiveDistance(f32),

    /// The reference point would lie inside the light
    #[error("light radius {radius} exceeds reference distance {distance}")]
    RadiusExceedsDistance {
        /// Light radius
        radius: f32,
        /// Reference distance
        distance: f32,
    },

    /// Spot cutoff cosine outside [-1, 1]
    #[error("{which} cutoff cosine {value} is outside [-1, 1]")]
    CutoffOutOfRange {
        /// "inner" or "outer"
        which: &'static str,
        /// Rejected value
        value: f32,
    },

    /// Direction with no length
    #[error("light direction has zero length")]
    ZeroDirection,
}

/// Radiance a sphere light of `radius` must emit so that a surface facing it
/// at `distance` receives `irradiance`.
///
/// The sphere subtends a cap with `1 - cos(theta) = 1 - sqrt(1 - (r/d)^2)`;
/// radiance is irradiance divided by that term.
pub fn radiance_from_irradiance(irradiance: Vec3, radius: f32, distance: f32) -> Result<Vec3, LightError> {
    if radius <= 0.0 {
        return Err(LightError::NonPositiveRadius(radius));
    }
    if distance <= 0.0 {
        return Err(LightError::NonPositiveDistance(distance));
    }
    if radius > distance {
        return Err(LightError::RadiusExceedsDistance { radius, distance });
    }

    let ratio = radius / distance;
    let denom = 1.0 - (1.0 - ratio * ratio).sqrt();
    Ok(irradiance / denom)
}

/// Distance beyond which a sphere light of `radius` delivers less than
/// `threshold` times its radiance as irradiance. Inverse of the cap term of
/// [`radiance_from_irradiance`].
pub fn contribution_distance(threshold: f32, radius: f32) -> f32 {
    if threshold >= 1.0 {
        return radius;
    }
    if threshold <= 0.0 {
        return f32::INFINITY;
    }
    let cos_theta = 1.0 - threshold;
    radius / (1.0 - cos_theta * cos_theta).sqrt()
}

fn normalized(direction: Vec3) -> Result<Vec3, LightError> {
    direction
        .try_normalize(f32::EPSILON)
        .ok_or(LightError::ZeroDirection)
}

fn validate_cutoff(which: &'static str, value: f32) -> Result<(), LightError> {
    if (-1.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(LightError::CutoffOutOfRange { which, value })
    }
}

/// Identifier of a light within its environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LightId(u64);

/// Infinitely distant light
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalLight {
    id: LightId,
    /// Unit direction the light travels in
    pub direction: Vec3,
    /// Emitted radiance
    pub radiance: Vec3,
    /// Apparent solid angle of the source (steradians)
    pub solid_angle: f32,
}

impl DirectionalLight {
    /// Identifier
    pub const fn id(&self) -> LightId {
        self.id
    }
}

/// Sphere light positioned by its paired instance
#[derive(Debug, Clone)]
pub struct PointLight {
    id: LightId,
    /// Emitted radiance
    pub radiance: Vec3,
    /// Sphere radius
    pub radius: f32,
    instance: InstanceRef,
    position: Vec3,
}

impl PointLight {
    /// Identifier
    pub const fn id(&self) -> LightId {
        self.id
    }

    /// Instance drawn for this light
    pub const fn instance(&self) -> &InstanceRef {
        &self.instance
    }

    /// World position as of the last [`LightEnvironment::update_world_space`]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Distance beyond which this light delivers less than `threshold`
    /// irradiance on its brightest channel
    pub fn contribution_distance(&self, threshold: f32) -> f32 {
        let peak = self.radiance.max();
        if peak <= 0.0 {
            return 0.0;
        }
        contribution_distance(threshold / peak, self.radius)
    }
}

/// Cone-restricted sphere light positioned and oriented by its paired instance
#[derive(Debug, Clone)]
pub struct SpotLight {
    id: LightId,
    /// Emitted radiance
    pub radiance: Vec3,
    /// Sphere radius
    pub radius: f32,
    /// Cosine of the full-intensity half angle
    pub inner_cutoff: f32,
    /// Cosine of the zero-intensity half angle
    pub outer_cutoff: f32,
    local_direction: Vec3,
    instance: InstanceRef,
    position: Vec3,
    direction: Vec3,
}

impl SpotLight {
    /// Identifier
    pub const fn id(&self) -> LightId {
        self.id
    }

    /// Instance drawn for this light
    pub const fn instance(&self) -> &InstanceRef {
        &self.instance
    }

    /// World position as of the last update
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Unit world direction as of the last update
    pub const fn direction(&self) -> Vec3 {
        self.direction
    }
}

/// Structured-buffer element for directional lights
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuDirectionalLight {
    /// Unit direction
    pub direction: [f32; 3],
    /// Solid angle
    pub solid_angle: f32,
    /// Radiance
    pub radiance: [f32; 3],
    /// Padding
    pub _pad: f32,
}

/// Structured-buffer element for point lights
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuPointLight {
    /// World position
    pub position: [f32; 3],
    /// Sphere radius
    pub radius: f32,
    /// Radiance
    pub radiance: [f32; 3],
    /// Padding
    pub _pad: f32,
}

/// Structured-buffer element for spot lights
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuSpotLight {
    /// World position
    pub position: [f32; 3],
    /// Sphere radius
    pub radius: f32,
    /// Radiance
    pub radiance: [f32; 3],
    /// Inner cutoff cosine
    pub inner_cutoff: f32,
    /// Unit world direction
    pub direction: [f32; 3],
    /// Outer cutoff cosine
    pub outer_cutoff: f32,
}

/// All lights of a scene
#[derive(Debug, Clone, Default)]
pub struct LightEnvironment {
    directional: Vec<DirectionalLight>,
    point: Vec<PointLight>,
    spot: Vec<SpotLight>,
}

impl LightEnvironment {
    /// Environment with no lights
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a distant light; `direction` is normalized
    pub fn add_directional_light(
        &mut self,
        direction: Vec3,
        radiance: Vec3,
        solid_angle: f32,
    ) -> Result<LightId, LightError> {
        let direction = normalized(direction)?;
        let id = LightId(next_object_id());
        self.directional.push(DirectionalLight {
            id,
            direction,
            radiance,
            solid_angle,
        });
        log::debug!("Added directional light {:?} along {:?}", id, direction);
        Ok(id)
    }

    /// Add a sphere light that delivers `irradiance` at `distance`, drawn as
    /// `instance`. The environment keeps a reference to the instance for as
    /// long as the light exists.
    pub fn add_point_light(
        &mut self,
        instance: &InstanceRef,
        irradiance: Vec3,
        radius: f32,
        distance: f32,
    ) -> Result<LightId, LightError> {
        let radiance = radiance_from_irradiance(irradiance, radius, distance).inspect_err(|e| {
            log::error!("Rejected point light: {}", e);
        })?;
        let id = LightId(next_object_id());
        self.point.push(PointLight {
            id,
            radiance,
            radius,
            instance: instance.clone(),
            position: translation_of(&instance.transform()),
        });
        log::debug!("Added point light {:?} (radius {})", id, radius);
        Ok(id)
    }

    /// Add a spot light. `direction` is in the paired instance's local space
    /// and normalized; both cutoffs are cosines in [-1, 1].
    pub fn add_spot_light(
        &mut self,
        instance: &InstanceRef,
        irradiance: Vec3,
        radius: f32,
        distance: f32,
        direction: Vec3,
        inner_cutoff: f32,
        outer_cutoff: f32,
    ) -> Result<LightId, LightError> {
        let validated = radiance_from_irradiance(irradiance, radius, distance).and_then(|radiance| {
            validate_cutoff("inner", inner_cutoff)?;
            validate_cutoff("outer", outer_cutoff)?;
            Ok((radiance, normalized(direction)?))
        });
        let (radiance, local_direction) = validated.inspect_err(|e| {
            log::error!("Rejected spot light: {}", e);
        })?;

        if inner_cutoff < outer_cutoff {
            log::warn!(
                "Spot light inner cutoff {} is wider than outer cutoff {}",
                inner_cutoff,
                outer_cutoff
            );
        }

        let transform = instance.transform();
        let id = LightId(next_object_id());
        self.spot.push(SpotLight {
            id,
            radiance,
            radius,
            inner_cutoff,
            outer_cutoff,
            local_direction,
            instance: instance.clone(),
            position: translation_of(&transform),
            direction: world_direction(&transform, &local_direction),
        });
        log::debug!("Added spot light {:?} (radius {})", id, radius);
        Ok(id)
    }

    /// Remove a directional light
    pub fn remove_directional_light(&mut self, id: LightId) -> bool {
        let before = self.directional.len();
        self.directional.retain(|light| light.id != id);
        before != self.directional.len()
    }

    /// Remove a point light, dropping its instance reference
    pub fn remove_point_light(&mut self, id: LightId) -> bool {
        let before = self.point.len();
        self.point.retain(|light| light.id != id);
        before != self.point.len()
    }

    /// Remove a spot light, dropping its instance reference
    pub fn remove_spot_light(&mut self, id: LightId) -> bool {
        let before = self.spot.len();
        self.spot.retain(|light| light.id != id);
        before != self.spot.len()
    }

    /// Re-derive world positions and directions from the paired instances
    pub fn update_world_space(&mut self) {
        for light in &mut self.point {
            light.position = translation_of(&light.instance.transform());
        }
        for light in &mut self.spot {
            let transform = light.instance.transform();
            light.position = translation_of(&transform);
            light.direction = world_direction(&transform, &light.local_direction);
        }
    }

    /// Directional lights in insertion order
    pub fn directional_lights(&self) -> &[DirectionalLight] {
        &self.directional
    }

    /// Point lights in insertion order
    pub fn point_lights(&self) -> &[PointLight] {
        &self.point
    }

    /// Spot lights in insertion order
    pub fn spot_lights(&self) -> &[SpotLight] {
        &self.spot
    }

    /// Total number of lights
    pub fn len(&self) -> usize {
        self.directional.len() + self.point.len() + self.spot.len()
    }

    /// Whether there are no lights
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// GPU elements for directional lights
    pub fn gpu_directional_lights(&self) -> Vec<GpuDirectionalLight> {
        self.directional
            .iter()
            .map(|light| GpuDirectionalLight {
                direction: light.direction.into(),
                solid_angle: light.solid_angle,
                radiance: light.radiance.into(),
                _pad: 0.0,
            })
            .collect()
    }

    /// GPU elements for point lights
    pub fn gpu_point_lights(&self) -> Vec<GpuPointLight> {
        self.point
            .iter()
            .map(|light| GpuPointLight {
                position: light.position.into(),
                radius: light.radius,
                radiance: light.radiance.into(),
                _pad: 0.0,
            })
            .collect()
    }

    /// GPU elements for spot lights
    pub fn gpu_spot_lights(&self) -> Vec<GpuSpotLight> {
        self.spot
            .iter()
            .map(|light| GpuSpotLight {
                position: light.position.into(),
                radius: light.radius,
                radiance: light.radiance.into(),
                inner_cutoff: light.inner_cutoff,
                direction: light.direction.into(),
                outer_cutoff: light.outer_cutoff,
            })
            .collect()
    }
}

fn world_direction(transform: &crate::foundation::math::Mat4, local: &Vec3) -> Vec3 {
    transform
        .transform_vector(local)
        .try_normalize(f32::EPSILON)
        .unwrap_or(*local)
}

/// Growable structured buffer holding one light kind
#[derive(Debug)]
pub struct LightBuffer {
    label: &'static str,
    buffer: Option<BufferHandle>,
    capacity: usize,
    len: usize,
}

impl LightBuffer {
    /// Buffer that allocates `initial_capacity` elements on first upload
    pub const fn new(label: &'static str, initial_capacity: usize) -> Self {
        Self {
            label,
            buffer: None,
            capacity: initial_capacity,
            len: 0,
        }
    }

    /// Current element capacity
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Elements written by the last upload
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the last upload was empty
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// GPU buffer, once allocated
    pub const fn handle(&self) -> Option<BufferHandle> {
        self.buffer
    }

    /// Write `elements`, reallocating with doubled capacity when they no
    /// longer fit. The buffer never shrinks.
    pub fn upload<T: Pod>(&mut self, device: &mut dyn GraphicsDevice, elements: &[T]) -> RenderResult<()> {
        let stride = std::mem::size_of::<T>();
        if self.buffer.is_none() || elements.len() > self.capacity {
            let mut capacity = self.capacity.max(1);
            while capacity < elements.len() {
                capacity *= 2;
            }
            if let Some(old) = self.buffer.take() {
                device.destroy_buffer(old);
                log::info!("Growing {} buffer: {} -> {} elements", self.label, self.capacity, capacity);
            }
            self.buffer = Some(device.create_buffer(&BufferDesc::structured(self.label, stride, capacity))?);
            self.capacity = capacity;
        }

        self.len = elements.len();
        if let Some(buffer) = self.buffer {
            if !elements.is_empty() {
                device.write_buffer(buffer, 0, bytemuck::cast_slice(elements))?;
            }
        }
        Ok(())
    }

    /// Bind to `slot` unless empty
    pub fn bind(&self, device: &mut dyn GraphicsDevice, slot: u32) -> RenderResult<bool> {
        match self.buffer {
            Some(buffer) if self.len > 0 => {
                device.bind_structured_buffer(slot, buffer)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Release the GPU buffer
    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(buffer) = self.buffer.take() {
            device.destroy_buffer(buffer);
        }
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4;
    use crate::gpu::software::SoftwareDevice;
    use crate::render::property::Instance;
    use approx::assert_relative_eq;

    fn light_instance(position: Vec3) -> InstanceRef {
        InstanceRef::new(Instance::with_transform(Mat4::new_translation(&position)))
    }

    #[test]
    fn test_radiance_denominator_bounds() {
        for &(radius, distance) in &[(0.1, 1.0), (0.5, 2.0), (0.99, 1.0), (1.0, 50.0)] {
            let ratio: f32 = radius / distance;
            let denom = 1.0 - (1.0 - ratio * ratio).sqrt();
            assert!(denom > 0.0 && denom < 1.0);

            let radiance = radiance_from_irradiance(Vec3::repeat(2.0), radius, distance).expect("valid");
            assert!(radiance.iter().all(|c| c.is_finite()));
            assert_relative_eq!(radiance.x, 2.0 / denom, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_radiance_monotonic_in_irradiance() {
        let low = radiance_from_irradiance(Vec3::repeat(1.0), 0.2, 3.0).expect("valid");
        let high = radiance_from_irradiance(Vec3::repeat(1.5), 0.2, 3.0).expect("valid");
        assert!(high.x > low.x);
    }

    #[test]
    fn test_invalid_point_light_rejected() {
        assert_eq!(
            radiance_from_irradiance(Vec3::repeat(1.0), 0.0, 1.0),
            Err(LightError::NonPositiveRadius(0.0))
        );
        assert_eq!(
            radiance_from_irradiance(Vec3::repeat(1.0), 0.5, -1.0),
            Err(LightError::NonPositiveDistance(-1.0))
        );
        assert!(matches!(
            radiance_from_irradiance(Vec3::repeat(1.0), 2.0, 1.0),
            Err(LightError::RadiusExceedsDistance { .. })
        ));

        let mut lights = LightEnvironment::new();
        let instance = light_instance(Vec3::zeros());
        assert!(lights.add_point_light(&instance, Vec3::repeat(1.0), -0.1, 1.0).is_err());
        assert!(lights.is_empty());
    }

    #[test]
    fn test_contribution_distance_inverts_cap_term() {
        let radius = 0.25;
        let distance = contribution_distance(0.01, radius);
        let ratio = radius / distance;
        assert_relative_eq!(1.0 - (1.0 - ratio * ratio).sqrt(), 0.01, epsilon = 1e-5);

        assert_relative_eq!(contribution_distance(1.0, radius), radius);
        assert!(contribution_distance(0.0, radius).is_infinite());
    }

    #[test]
    fn test_directions_stored_unit_length() {
        let mut lights = LightEnvironment::new();
        lights
            .add_directional_light(Vec3::new(0.0, -10.0, 3.0), Vec3::repeat(1.0), 6.8e-5)
            .expect("valid");
        let instance = light_instance(Vec3::new(1.0, 2.0, 3.0));
        lights
            .add_spot_light(&instance, Vec3::repeat(1.0), 0.1, 2.0, Vec3::new(0.0, 0.0, -7.0), 0.9, 0.8)
            .expect("valid");

        assert_relative_eq!(lights.directional_lights()[0].direction.magnitude(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(lights.spot_lights()[0].direction().magnitude(), 1.0, epsilon = 1e-6);
        assert!(lights
            .add_directional_light(Vec3::zeros(), Vec3::repeat(1.0), 1.0)
            .is_err());
    }

    #[test]
    fn test_spot_cutoffs_validated() {
        let mut lights = LightEnvironment::new();
        let instance = light_instance(Vec3::zeros());
        let result = lights.add_spot_light(&instance, Vec3::repeat(1.0), 0.1, 2.0, Vec3::z(), 1.5, 0.8);
        assert!(matches!(result, Err(LightError::CutoffOutOfRange { which: "inner", .. })));
    }

    #[test]
    fn test_positions_follow_instance() {
        let mut lights = LightEnvironment::new();
        let instance = light_instance(Vec3::new(1.0, 0.0, 0.0));
        let id = lights
            .add_point_light(&instance, Vec3::repeat(1.0), 0.1, 1.0)
            .expect("valid");

        instance.set_transform(Mat4::new_translation(&Vec3::new(0.0, 4.0, 0.0)));
        lights.update_world_space();
        assert_relative_eq!(lights.point_lights()[0].position(), Vec3::new(0.0, 4.0, 0.0));

        assert!(lights.remove_point_light(id));
        assert!(!lights.remove_point_light(id));
        assert_eq!(instance.ref_count(), 1);
    }

    #[test]
    fn test_light_buffer_grows_never_shrinks() {
        let mut device = SoftwareDevice::new();
        let mut buffer = LightBuffer::new("point lights", 2);
        let elements = vec![GpuPointLight::zeroed(); 5];

        buffer.upload(&mut device, &elements).expect("upload");
        assert_eq!(buffer.capacity(), 8);
        buffer.upload(&mut device, &elements[..1]).expect("upload");
        assert_eq!(buffer.capacity(), 8);
        assert_eq!(buffer.len(), 1);

        buffer.upload::<GpuPointLight>(&mut device, &[]).expect("upload");
        assert!(!buffer.bind(&mut device, 1).expect("bind"));
        assert_eq!(device.buffer_count(), 1);
    }
}
