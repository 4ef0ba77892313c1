//! # Scene
//!
//! Owns everything a frame draws and everything the user manipulates between
//! frames: the [`MeshRegistry`], the [`LightEnvironment`], the fly camera, the
//! pointer [`Dragger`] and the dissolve transitions.
//!
//! ## Update Order
//!
//! 1. Camera movement from held keys
//! 2. Dragging: the pointer ray moves the held instance
//! 3. Dissolve sweep: advance each dissolving instance once, migrate the
//!    finished ones to the opaque shader
//!
//! The update always completes before the renderer reads the scene.

pub mod dragger;
pub mod mesh_registry;
pub mod scene_renderer;

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::events::{Event, EventDispatcher, EventHandler, EventType, MouseButton};
use crate::foundation::math::{Mat4, Transform, Vec3};
use crate::foundation::ray::Ray;
use crate::input::{CameraController, MouseState};
use crate::render::camera::Camera;
use crate::render::lighting::{radiance_from_irradiance, LightEnvironment, LightId};
use crate::render::mesh::{Mesh, MeshLibrary, SPHERE};
use crate::render::property::{Instance, InstanceRef, Material, MaterialRef, PropertyValue};
use crate::render::shader::{properties, Shader, ShaderLibrary, DISSOLUTION, EMISSIVE, PBR_STATIC};
use crate::render::RenderResult;
use crate::settings::CameraSettings;

pub use dragger::{DragState, Dragger};
pub use mesh_registry::{MeshRegistry, RegistryError, RegistryHit, SubmeshDrawKey};
pub use scene_renderer::{FrameStats, SceneRenderer};

/// Scalar and texture properties carried from a dissolve material to its
/// opaque counterpart unconditionally
const CARRIED_SCALARS: [&str; 5] = [
    properties::BASE_COLOR,
    properties::METALNESS,
    properties::ROUGHNESS,
    properties::HAS_METALNESS_MAP,
    properties::HAS_ROUGHNESS_MAP,
];
const CARRIED_TEXTURES: [&str; 2] = [properties::ALBEDO_MAP, properties::NORMAL_MAP];

/// Optional maps, carried only when the source declares it has them
const OPTIONAL_MAPS: [(&str, &str); 2] = [
    (properties::HAS_METALNESS_MAP, properties::METALNESS_MAP),
    (properties::HAS_ROUGHNESS_MAP, properties::ROUGHNESS_MAP),
];

/// Declarative scene: batched geometry, lights, camera and interaction state
pub struct Scene {
    registry: MeshRegistry,
    lights: LightEnvironment,
    camera: CameraController,
    mouse: MouseState,
    dragger: Dragger,
    opaque_shader: Rc<Shader>,
    light_mesh: Rc<Mesh>,
    emissive_material: MaterialRef,
    opaque_materials: HashMap<u64, MaterialRef>,
    light_instances: HashMap<LightId, InstanceRef>,
}

impl Scene {
    /// Empty scene viewed through `camera` on a `width` x `height` viewport.
    ///
    /// Resolves the opaque and emissive shaders and the light sphere mesh up
    /// front; a missing one is a configuration error.
    pub fn new(
        shaders: &ShaderLibrary,
        meshes: &MeshLibrary,
        camera: Camera,
        camera_settings: CameraSettings,
        width: u32,
        height: u32,
    ) -> RenderResult<Self> {
        let opaque_shader = Rc::clone(shaders.get(PBR_STATIC)?);
        let emissive_shader = Rc::clone(shaders.get(EMISSIVE)?);
        shaders.get(DISSOLUTION)?;
        let light_mesh = Rc::clone(meshes.get(SPHERE)?);

        Ok(Self {
            registry: MeshRegistry::new(),
            lights: LightEnvironment::new(),
            camera: CameraController::new(camera, camera_settings, width, height),
            mouse: MouseState::new(width, height),
            dragger: Dragger::new(),
            opaque_shader,
            light_mesh,
            emissive_material: MaterialRef::new(Material::new("Light", emissive_shader)),
            opaque_materials: HashMap::new(),
            light_instances: HashMap::new(),
        })
    }

    /// Batched geometry
    pub const fn registry(&self) -> &MeshRegistry {
        &self.registry
    }

    /// Mutable batched geometry
    pub fn registry_mut(&mut self) -> &mut MeshRegistry {
        &mut self.registry
    }

    /// Lights
    pub const fn lights(&self) -> &LightEnvironment {
        &self.lights
    }

    /// Mutable lights
    pub fn lights_mut(&mut self) -> &mut LightEnvironment {
        &mut self.lights
    }

    /// Active camera
    pub const fn camera(&self) -> &Camera {
        self.camera.camera()
    }

    /// Camera controller
    pub fn camera_controller_mut(&mut self) -> &mut CameraController {
        &mut self.camera
    }

    /// Pointer state
    pub const fn mouse(&self) -> &MouseState {
        &self.mouse
    }

    /// Pointer dragger
    pub const fn dragger(&self) -> &Dragger {
        &self.dragger
    }

    /// Register an instance on one submesh
    pub fn add_instance(
        &mut self,
        mesh: &Rc<Mesh>,
        submesh_index: usize,
        material: &MaterialRef,
        instance: &InstanceRef,
    ) -> RenderResult<()> {
        Ok(self.registry.add_submesh(mesh, submesh_index, material, instance)?)
    }

    /// Create and register an instance that dissolves in over `duration`
    /// seconds, then turns into a plain opaque instance
    pub fn add_dissolving_instance(
        &mut self,
        mesh: &Rc<Mesh>,
        submesh_index: usize,
        material: &MaterialRef,
        transform: Mat4,
        duration: f32,
    ) -> RenderResult<InstanceRef> {
        if material.borrow().shader().name != DISSOLUTION {
            log::warn!(
                "Dissolving instance uses material '{}' with shader '{}'",
                material.borrow().name(),
                material.borrow().shader().name
            );
        }

        let mut instance = Instance::with_transform(transform);
        instance.set(properties::ELAPSED_TIME, PropertyValue::Float(0.0));
        instance.set(properties::DISSOLUTION_DURATION, PropertyValue::Float(duration));
        let instance = InstanceRef::new(instance);
        self.add_instance(mesh, submesh_index, material, &instance)?;
        Ok(instance)
    }

    /// Add a point light drawn as an emissive sphere of `radius` at
    /// `position`
    pub fn add_point_light(
        &mut self,
        position: Vec3,
        irradiance: Vec3,
        radius: f32,
        distance: f32,
    ) -> RenderResult<(LightId, InstanceRef)> {
        let instance = Self::light_instance(position, irradiance, radius, distance)?;
        let id = self.lights.add_point_light(&instance, irradiance, radius, distance)?;
        self.register_light_instance(id, instance)
    }

    /// Add a spot light drawn as an emissive sphere of `radius` at
    /// `position`; `direction` is in the sphere's local space
    #[allow(clippy::too_many_arguments)]
    pub fn add_spot_light(
        &mut self,
        position: Vec3,
        irradiance: Vec3,
        radius: f32,
        distance: f32,
        direction: Vec3,
        inner_cutoff: f32,
        outer_cutoff: f32,
    ) -> RenderResult<(LightId, InstanceRef)> {
        let instance = Self::light_instance(position, irradiance, radius, distance)?;
        let id = self.lights.add_spot_light(
            &instance,
            irradiance,
            radius,
            distance,
            direction,
            inner_cutoff,
            outer_cutoff,
        )?;
        self.register_light_instance(id, instance)
    }

    fn light_instance(position: Vec3, irradiance: Vec3, radius: f32, distance: f32) -> RenderResult<InstanceRef> {
        let radiance = radiance_from_irradiance(irradiance, radius, distance)?;
        let transform = Transform::from_position_scale(position, radius);
        let mut instance = Instance::with_transform(transform.to_matrix());
        instance.set(properties::RADIANCE, PropertyValue::Vec3(radiance));
        Ok(InstanceRef::new(instance))
    }

    fn register_light_instance(&mut self, id: LightId, instance: InstanceRef) -> RenderResult<(LightId, InstanceRef)> {
        self.registry
            .add_submesh(&self.light_mesh, 0, &self.emissive_material, &instance)?;
        self.light_instances.insert(id, instance.clone());
        Ok((id, instance))
    }

    /// Remove a point or spot light and the sphere drawn for it
    pub fn remove_light(&mut self, id: LightId) -> RenderResult<bool> {
        let removed = self.lights.remove_point_light(id)
            || self.lights.remove_spot_light(id)
            || self.lights.remove_directional_light(id);
        if let Some(instance) = self.light_instances.remove(&id) {
            self.registry
                .remove_submesh(&self.light_mesh, 0, &self.emissive_material, &instance)?;
        }
        Ok(removed)
    }

    /// Closest geometry hit by a world-space ray
    pub fn pick(&self, ray: &Ray) -> Option<RegistryHit> {
        self.registry.intersect(ray)
    }

    /// Closest geometry under a pixel of the viewport
    pub fn pick_at_pixel(&self, x: f32, y: f32) -> Option<RegistryHit> {
        self.pick(&self.pixel_ray(x, y))
    }

    fn pixel_ray(&self, x: f32, y: f32) -> Ray {
        self.camera()
            .pixel_to_world_ray(x, y, self.mouse.window_width, self.mouse.window_height)
    }

    /// Advance the scene by `delta_time` seconds
    pub fn update(&mut self, delta_time: f32) -> RenderResult<()> {
        self.camera.update(delta_time);

        if self.dragger.is_dragging() {
            let ray = self.pixel_ray(self.mouse.screen_x, self.mouse.screen_y);
            self.dragger.drag(&ray);
        }

        self.update_dissolving(delta_time)?;
        Ok(())
    }

    /// Advance every dissolving instance once and migrate the finished ones.
    /// Returns the number of migrated entries.
    fn update_dissolving(&mut self, delta_time: f32) -> RenderResult<usize> {
        let entries: Vec<SubmeshDrawKey> = self.registry.iter_entries(DISSOLUTION).collect();
        if entries.is_empty() {
            return Ok(0);
        }

        let mut advanced = HashSet::new();
        let mut finished = Vec::new();
        for key in entries {
            let mut instance = key.instance.borrow_mut();
            let elapsed = instance.get_float(properties::ELAPSED_TIME).unwrap_or(0.0);
            let elapsed = if advanced.insert(key.instance.id()) {
                let advanced_time = elapsed + delta_time;
                instance.set(properties::ELAPSED_TIME, PropertyValue::Float(advanced_time));
                advanced_time
            } else {
                elapsed
            };

            let duration = instance.get_float(properties::DISSOLUTION_DURATION).unwrap_or(0.0);
            drop(instance);
            if elapsed >= duration {
                finished.push(key);
            }
        }

        // Removals wait until the sweep is over.
        let mut replacements: HashMap<u64, InstanceRef> = HashMap::new();
        for key in &finished {
            let material = self.opaque_material_for(&key.material);
            let replacement = replacements
                .entry(key.instance.id())
                .or_insert_with(|| InstanceRef::new(Instance::with_transform(key.instance.transform())))
                .clone();
            self.registry
                .add_submesh(&key.mesh, key.submesh_index, &material, &replacement)?;
            log::debug!(
                "Instance {} finished dissolving, replaced by {}",
                key.instance.id(),
                replacement.id()
            );
        }
        for key in &finished {
            self.registry.remove_key(key)?;
        }

        Ok(finished.len())
    }

    /// Opaque material mirroring a dissolve material, shared by everything
    /// migrated from it
    fn opaque_material_for(&mut self, dissolve: &MaterialRef) -> MaterialRef {
        let shader = &self.opaque_shader;
        self.opaque_materials
            .entry(dissolve.id())
            .or_insert_with(|| {
                let source = dissolve.borrow();
                let mut material = Material::new(format!("{} (opaque)", source.name()), Rc::clone(shader));

                for name in CARRIED_SCALARS {
                    if let Some(value) = source.properties().get(name) {
                        material.set(name, *value);
                    }
                }
                for name in CARRIED_TEXTURES {
                    if let Some(texture) = source.texture(name) {
                        material.set_texture(name, texture);
                    }
                }
                for (flag, map) in OPTIONAL_MAPS {
                    let declared = source.properties().get_float(flag).is_some_and(|value| value > 0.5);
                    if let (true, Some(texture)) = (declared, source.texture(map)) {
                        material.set_texture(map, texture);
                    }
                }

                MaterialRef::new(material)
            })
            .clone()
    }

    fn on_mouse_pressed(&mut self, event: &Event) -> bool {
        match event.get_mouse_button() {
            Some(MouseButton::Left) => {
                self.mouse.left_down = true;
                let Some(hit) = self.pick_at_pixel(self.mouse.screen_x, self.mouse.screen_y) else {
                    return false;
                };
                let view_direction = self.camera().forward();
                self.dragger.begin(hit.instance, hit.point, view_direction);
                true
            }
            Some(MouseButton::Right) => {
                self.mouse.right_down = true;
                false
            }
            _ => false,
        }
    }

    fn on_mouse_released(&mut self, event: &Event) -> bool {
        match event.get_mouse_button() {
            Some(MouseButton::Left) => {
                self.mouse.left_down = false;
                let was_dragging = self.dragger.is_dragging();
                self.dragger.end();
                was_dragging
            }
            Some(MouseButton::Right) => {
                self.mouse.right_down = false;
                false
            }
            _ => false,
        }
    }

    /// Destroy the GPU buffers owned by the scene
    pub fn release(&mut self, device: &mut dyn crate::gpu::GraphicsDevice) {
        self.registry.release(device);
    }
}

impl EventHandler for Scene {
    fn on_event(&mut self, event: &Event) -> bool {
        if let Some((x, y)) = event.get_position() {
            self.mouse.update_position(x, y);
        }

        let mut dispatcher = EventDispatcher::new(event);
        dispatcher.dispatch(EventType::WindowResized, |e| {
            if let Some((width, height)) = e.get_size() {
                self.mouse.update_window_size(width, height);
            }
            false
        });
        dispatcher.dispatch(EventType::MouseButtonPressed, |e| self.on_mouse_pressed(e));
        dispatcher.dispatch(EventType::MouseButtonReleased, |e| self.on_mouse_released(e));

        dispatcher.consumed() || self.camera.on_event(event)
    }
}
