//! # Mesh Registry
//!
//! Groups submesh-draws so that everything sharing a shader, a mesh, a
//! submesh range and a material is drawn with one instanced call:
//!
//! ```text
//! ShaderBatch ─ mesh ─▶ SubmeshBatch ─ submesh index ─▶ MaterialBatch ─ material ─▶ InstanceBatch
//! ```
//!
//! Every level is an ordered map, so removing one entry never disturbs the
//! position of any other. Empty levels are pruned on removal; the GPU buffer
//! of a pruned [`InstanceBatch`] is destroyed by the next
//! [`MeshRegistry::update_instance_buffers`].

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::foundation::math::{Point3, Vec3};
use crate::foundation::ray::Ray;
use crate::gpu::{BufferDesc, BufferHandle, BufferKind, GraphicsDevice};
use crate::render::mesh::Mesh;
use crate::render::property::{InstanceRef, MaterialRef};
use crate::render::shader::Shader;
use crate::render::RenderResult;

/// Structural registry violations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The exact submesh-draw key is already registered
    #[error("Duplicate submesh draw: mesh '{mesh}' submesh {submesh_index}, material '{material}', instance {instance}")]
    Duplicate {
        /// Mesh name
        mesh: String,
        /// Submesh index
        submesh_index: usize,
        /// Material name
        material: String,
        /// Instance id
        instance: u64,
    },

    /// No entry exists for the key
    #[error("Submesh draw not found: mesh '{mesh}' submesh {submesh_index}, material '{material}', instance {instance}")]
    NotFound {
        /// Mesh name
        mesh: String,
        /// Submesh index
        submesh_index: usize,
        /// Material name
        material: String,
        /// Instance id
        instance: u64,
    },

    /// The mesh has no submesh at this index
    #[error("Mesh '{mesh}' has {count} submeshes, index {submesh_index} is out of range")]
    SubmeshOutOfRange {
        /// Mesh name
        mesh: String,
        /// Requested index
        submesh_index: usize,
        /// Submeshes in the mesh
        count: usize,
    },
}

/// One submesh-draw: `{mesh, submesh index, material, instance}`
#[derive(Debug, Clone)]
pub struct SubmeshDrawKey {
    /// Mesh
    pub mesh: Rc<Mesh>,
    /// Submesh within the mesh
    pub submesh_index: usize,
    /// Material
    pub material: MaterialRef,
    /// Instance
    pub instance: InstanceRef,
}

impl PartialEq for SubmeshDrawKey {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.mesh, &other.mesh)
            && self.submesh_index == other.submesh_index
            && self.material == other.material
            && self.instance == other.instance
    }
}

impl Eq for SubmeshDrawKey {}

/// Ordered instances sharing every other part of the key, mirrored into one
/// GPU instance buffer
#[derive(Debug, Default)]
pub struct InstanceBatch {
    instances: Vec<InstanceRef>,
    buffer: Option<BufferHandle>,
    capacity: usize,
    uploaded: Vec<(u64, u64)>,
}

impl InstanceBatch {
    /// Instances in draw order
    pub fn instances(&self) -> &[InstanceRef] {
        &self.instances
    }

    /// Number of instances
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the batch holds no instances
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// GPU instance buffer, once uploaded
    pub const fn buffer(&self) -> Option<BufferHandle> {
        self.buffer
    }

    /// Whether the GPU buffer no longer mirrors the instance sequence
    pub fn is_stale(&self) -> bool {
        self.buffer.is_none() || self.signature() != self.uploaded
    }

    fn signature(&self) -> Vec<(u64, u64)> {
        self.instances
            .iter()
            .map(|instance| (instance.id(), instance.borrow().revision()))
            .collect()
    }

    fn upload(&mut self, device: &mut dyn GraphicsDevice, shader: &Shader, label: String) -> RenderResult<()> {
        let stride = shader.instance_stride();
        let mut bytes = Vec::with_capacity(stride * self.instances.len());
        for instance in &self.instances {
            instance
                .borrow()
                .properties()
                .pack(&shader.instance_layout, &shader.name, &mut bytes)?;
        }

        if self.buffer.is_none() || self.instances.len() > self.capacity {
            let mut capacity = self.capacity.max(1);
            while capacity < self.instances.len() {
                capacity *= 2;
            }
            if let Some(old) = self.buffer.take() {
                device.destroy_buffer(old);
                log::debug!("Growing instance buffer '{}': {} -> {}", label, self.capacity, capacity);
            }
            self.buffer = Some(device.create_buffer(&BufferDesc {
                kind: BufferKind::Instance,
                size: stride * capacity,
                stride,
                label,
            })?);
            self.capacity = capacity;
        }

        if let Some(buffer) = self.buffer {
            device.write_buffer(buffer, 0, &bytes)?;
        }
        self.uploaded = self.signature();
        Ok(())
    }
}

/// Instance batches of one submesh, keyed by material
#[derive(Debug, Default)]
pub struct MaterialBatch {
    materials: BTreeMap<MaterialRef, InstanceBatch>,
}

impl MaterialBatch {
    /// `(material, instances)` pairs in material creation order
    pub fn iter(&self) -> impl Iterator<Item = (&MaterialRef, &InstanceBatch)> {
        self.materials.iter()
    }
}

/// Material batches of one mesh, keyed by submesh index
#[derive(Debug)]
pub struct SubmeshBatch {
    mesh: Rc<Mesh>,
    submeshes: BTreeMap<usize, MaterialBatch>,
}

impl SubmeshBatch {
    /// Mesh shared by every submesh in the batch
    pub const fn mesh(&self) -> &Rc<Mesh> {
        &self.mesh
    }

    /// `(submesh index, material batch)` pairs in index order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &MaterialBatch)> {
        self.submeshes.iter().map(|(index, batch)| (*index, batch))
    }
}

/// Everything drawn with one shader
#[derive(Debug)]
pub struct ShaderBatch {
    shader: Rc<Shader>,
    meshes: BTreeMap<u64, SubmeshBatch>,
}

/// One instanced draw: a submesh under a material with its instances
#[derive(Debug, Clone, Copy)]
pub struct BatchDraw<'a> {
    /// Mesh
    pub mesh: &'a Rc<Mesh>,
    /// Submesh within the mesh
    pub submesh_index: usize,
    /// Material
    pub material: &'a MaterialRef,
    /// Instances and their GPU buffer
    pub instances: &'a InstanceBatch,
}

impl ShaderBatch {
    /// Shader of this batch
    pub const fn shader(&self) -> &Rc<Shader> {
        &self.shader
    }

    /// Mesh batches in mesh creation order
    pub fn iter(&self) -> impl Iterator<Item = &SubmeshBatch> {
        self.meshes.values()
    }

    /// Every instanced draw under this shader
    pub fn draws(&self) -> impl Iterator<Item = BatchDraw<'_>> {
        self.meshes.values().flat_map(|submeshes| {
            submeshes.iter().flat_map(move |(submesh_index, materials)| {
                materials.iter().map(move |(material, instances)| BatchDraw {
                    mesh: &submeshes.mesh,
                    submesh_index,
                    material,
                    instances,
                })
            })
        })
    }

    /// Instances under this shader
    pub fn instance_count(&self) -> usize {
        self.draws().map(|draw| draw.instances.len()).sum()
    }
}

/// Closest registry geometry along a ray
#[derive(Debug, Clone)]
pub struct RegistryHit {
    /// Mesh hit
    pub mesh: Rc<Mesh>,
    /// Submesh hit
    pub submesh_index: usize,
    /// Material of the entry hit
    pub material: MaterialRef,
    /// Instance hit
    pub instance: InstanceRef,
    /// World-space hit point
    pub point: Vec3,
    /// Ray parameter of the hit
    pub step: f32,
}

impl RegistryHit {
    /// Key of the entry hit
    pub fn key(&self) -> SubmeshDrawKey {
        SubmeshDrawKey {
            mesh: Rc::clone(&self.mesh),
            submesh_index: self.submesh_index,
            material: self.material.clone(),
            instance: self.instance.clone(),
        }
    }
}

/// Shader-grouped batches of every submesh-draw in a scene
#[derive(Debug, Default)]
pub struct MeshRegistry {
    shaders: BTreeMap<String, ShaderBatch>,
    retired_buffers: Vec<BufferHandle>,
}

impl MeshRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one submesh-draw. The shader comes from the material.
    pub fn add_submesh(
        &mut self,
        mesh: &Rc<Mesh>,
        submesh_index: usize,
        material: &MaterialRef,
        instance: &InstanceRef,
    ) -> Result<(), RegistryError> {
        if submesh_index >= mesh.submeshes.len() {
            let error = RegistryError::SubmeshOutOfRange {
                mesh: mesh.name.clone(),
                submesh_index,
                count: mesh.submeshes.len(),
            };
            log::error!("{}", error);
            return Err(error);
        }

        let shader = Rc::clone(material.borrow().shader());
        let shader_batch = self
            .shaders
            .entry(shader.name.clone())
            .or_insert_with(|| ShaderBatch {
                shader,
                meshes: BTreeMap::new(),
            });
        let instances = shader_batch
            .meshes
            .entry(mesh.id())
            .or_insert_with(|| SubmeshBatch {
                mesh: Rc::clone(mesh),
                submeshes: BTreeMap::new(),
            })
            .submeshes
            .entry(submesh_index)
            .or_default()
            .materials
            .entry(material.clone())
            .or_default();

        if instances.instances.contains(instance) {
            let error = RegistryError::Duplicate {
                mesh: mesh.name.clone(),
                submesh_index,
                material: material.borrow().name().to_string(),
                instance: instance.id(),
            };
            log::error!("{}", error);
            return Err(error);
        }

        instances.instances.push(instance.clone());
        log::debug!(
            "Registered instance {} on '{}' submesh {} with material '{}'",
            instance.id(),
            mesh.name,
            submesh_index,
            material.borrow().name()
        );
        Ok(())
    }

    /// Remove one submesh-draw, pruning levels left empty
    pub fn remove_submesh(
        &mut self,
        mesh: &Rc<Mesh>,
        submesh_index: usize,
        material: &MaterialRef,
        instance: &InstanceRef,
    ) -> Result<(), RegistryError> {
        let shader_name = material.borrow().shader().name.clone();
        let removed = self.remove_entry(&shader_name, mesh.id(), submesh_index, material, instance);
        if removed {
            log::debug!(
                "Removed instance {} from '{}' submesh {}",
                instance.id(),
                mesh.name,
                submesh_index
            );
            return Ok(());
        }

        let error = RegistryError::NotFound {
            mesh: mesh.name.clone(),
            submesh_index,
            material: material.borrow().name().to_string(),
            instance: instance.id(),
        };
        log::warn!("{}", error);
        Err(error)
    }

    /// Remove the entry named by `key`
    pub fn remove_key(&mut self, key: &SubmeshDrawKey) -> Result<(), RegistryError> {
        self.remove_submesh(&key.mesh, key.submesh_index, &key.material, &key.instance)
    }

    fn remove_entry(
        &mut self,
        shader_name: &str,
        mesh_id: u64,
        submesh_index: usize,
        material: &MaterialRef,
        instance: &InstanceRef,
    ) -> bool {
        let Some(shader_batch) = self.shaders.get_mut(shader_name) else {
            return false;
        };
        let Some(submesh_batch) = shader_batch.meshes.get_mut(&mesh_id) else {
            return false;
        };
        let Some(material_batch) = submesh_batch.submeshes.get_mut(&submesh_index) else {
            return false;
        };
        let Some(instance_batch) = material_batch.materials.get_mut(material) else {
            return false;
        };
        let Some(position) = instance_batch.instances.iter().position(|i| i == instance) else {
            return false;
        };

        instance_batch.instances.remove(position);
        if instance_batch.instances.is_empty() {
            if let Some(batch) = material_batch.materials.remove(material) {
                self.retired_buffers.extend(batch.buffer);
            }
        }
        if material_batch.materials.is_empty() {
            submesh_batch.submeshes.remove(&submesh_index);
        }
        if submesh_batch.submeshes.is_empty() {
            shader_batch.meshes.remove(&mesh_id);
        }
        if shader_batch.meshes.is_empty() {
            self.shaders.remove(shader_name);
        }
        true
    }

    /// Re-upload every stale instance buffer. Call once per frame after all
    /// additions, removals and migrations. Returns the number of uploads.
    pub fn update_instance_buffers(&mut self, device: &mut dyn GraphicsDevice) -> RenderResult<usize> {
        for buffer in self.retired_buffers.drain(..) {
            device.destroy_buffer(buffer);
        }

        let mut uploads = 0;
        for (shader_name, shader_batch) in &mut self.shaders {
            let shader = Rc::clone(&shader_batch.shader);
            for submesh_batch in shader_batch.meshes.values_mut() {
                let mesh_name = &submesh_batch.mesh.name;
                for (submesh_index, material_batch) in &mut submesh_batch.submeshes {
                    for (material, instances) in &mut material_batch.materials {
                        if !instances.is_stale() {
                            continue;
                        }
                        let label = format!(
                            "{}/{}[{}]/{}",
                            shader_name,
                            mesh_name,
                            submesh_index,
                            material.borrow().name()
                        );
                        instances.upload(device, &shader, label)?;
                        uploads += 1;
                    }
                }
            }
        }

        if uploads > 0 {
            log::trace!("Uploaded {} instance buffers", uploads);
        }
        Ok(uploads)
    }

    /// Batches drawn with `shader_name`, if any are registered
    pub fn get_mesh_batch(&self, shader_name: &str) -> Option<&ShaderBatch> {
        self.shaders.get(shader_name)
    }

    /// Names of shaders with at least one entry
    pub fn shader_names(&self) -> impl Iterator<Item = &str> {
        self.shaders.keys().map(String::as_str)
    }

    /// Registered submesh-draws across all shaders
    pub fn instance_count(&self) -> usize {
        self.shaders.values().map(ShaderBatch::instance_count).sum()
    }

    /// Number of instance batches (instanced draws per frame)
    pub fn batch_count(&self) -> usize {
        self.shaders.values().map(|shader| shader.draws().count()).sum()
    }

    /// Whether the exact key is registered
    pub fn contains(&self, key: &SubmeshDrawKey) -> bool {
        let shader_name = key.material.borrow().shader().name.clone();
        self.shaders
            .get(&shader_name)
            .and_then(|shader| shader.meshes.get(&key.mesh.id()))
            .and_then(|submeshes| submeshes.submeshes.get(&key.submesh_index))
            .and_then(|materials| materials.materials.get(&key.material))
            .is_some_and(|instances| instances.instances.contains(&key.instance))
    }

    /// Keys of every entry under `shader_name`, in batch order
    pub fn iter_entries(&self, shader_name: &str) -> impl Iterator<Item = SubmeshDrawKey> + '_ {
        self.shaders.get(shader_name).into_iter().flat_map(|shader| {
            shader.draws().flat_map(|draw| {
                draw.instances.instances.iter().map(move |instance| SubmeshDrawKey {
                    mesh: Rc::clone(draw.mesh),
                    submesh_index: draw.submesh_index,
                    material: draw.material.clone(),
                    instance: instance.clone(),
                })
            })
        })
    }

    /// Closest entry hit by `ray`, testing every submesh triangle in world
    /// space under every instance transform
    pub fn intersect(&self, ray: &Ray) -> Option<RegistryHit> {
        let mut closest: Option<RegistryHit> = None;

        for draw in self.shaders.values().flat_map(ShaderBatch::draws) {
            for instance in draw.instances.instances() {
                let transform = instance.transform();
                let world = |v: Vec3| transform.transform_point(&Point3::from(v)).coords;

                for [v0, v1, v2] in draw.mesh.triangles(draw.submesh_index) {
                    let Some((step, _, _)) = ray.intersect_triangle(world(v0), world(v1), world(v2)) else {
                        continue;
                    };
                    if closest.as_ref().is_some_and(|hit| hit.step <= step) {
                        continue;
                    }
                    closest = Some(RegistryHit {
                        mesh: Rc::clone(draw.mesh),
                        submesh_index: draw.submesh_index,
                        material: draw.material.clone(),
                        instance: instance.clone(),
                        point: ray.point_at(step),
                        step,
                    });
                }
            }
        }

        closest
    }

    /// Destroy every instance buffer
    pub fn release(&mut self, device: &mut dyn GraphicsDevice) {
        for buffer in self.retired_buffers.drain(..) {
            device.destroy_buffer(buffer);
        }
        for shader in self.shaders.values_mut() {
            for submeshes in shader.meshes.values_mut() {
                for materials in submeshes.submeshes.values_mut() {
                    for instances in materials.materials.values_mut() {
                        if let Some(buffer) = instances.buffer.take() {
                            device.destroy_buffer(buffer);
                        }
                        instances.capacity = 0;
                        instances.uploaded.clear();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4;
    use crate::gpu::software::{DeviceCommand, SoftwareDevice};
    use crate::render::mesh::MeshLibrary;
    use crate::render::property::{Instance, Material};
    use crate::render::shader::{ShaderLibrary, EMISSIVE, PBR_STATIC};
    use crate::render::shader::properties::RADIANCE;
    use crate::render::PropertyValue;
    use approx::assert_relative_eq;

    struct Fixture {
        device: SoftwareDevice,
        shaders: ShaderLibrary,
        cube: Rc<Mesh>,
    }

    fn fixture() -> Fixture {
        let mut device = SoftwareDevice::new();
        let mut meshes = MeshLibrary::new();
        let cube = meshes.add(&mut device, Mesh::cube("Cube")).expect("cube");
        Fixture {
            device,
            shaders: ShaderLibrary::with_builtin_shaders(),
            cube,
        }
    }

    fn material(shaders: &ShaderLibrary, shader: &str) -> MaterialRef {
        MaterialRef::new(Material::new(shader, Rc::clone(shaders.get(shader).expect("shader"))))
    }

    fn instance_at(position: Vec3) -> InstanceRef {
        InstanceRef::new(Instance::with_transform(Mat4::new_translation(&position)))
    }

    #[test]
    fn test_add_then_remove_restores_state() {
        let f = fixture();
        let mut registry = MeshRegistry::new();
        let material = material(&f.shaders, PBR_STATIC);
        let kept = instance_at(Vec3::zeros());
        registry.add_submesh(&f.cube, 0, &material, &kept).expect("add");

        let transient = instance_at(Vec3::x());
        registry.add_submesh(&f.cube, 0, &material, &transient).expect("add");
        assert_eq!(registry.instance_count(), 2);

        registry.remove_submesh(&f.cube, 0, &material, &transient).expect("remove");
        assert_eq!(registry.instance_count(), 1);
        assert_eq!(registry.batch_count(), 1);
        let entries: Vec<_> = registry.iter_entries(PBR_STATIC).collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].instance, kept);

        assert!(matches!(
            registry.remove_submesh(&f.cube, 0, &material, &transient),
            Err(RegistryError::NotFound { .. })
        ));
        assert_eq!(registry.instance_count(), 1);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let f = fixture();
        let mut registry = MeshRegistry::new();
        let material = material(&f.shaders, PBR_STATIC);
        let instance = instance_at(Vec3::zeros());

        registry.add_submesh(&f.cube, 0, &material, &instance).expect("add");
        let second = registry.add_submesh(&f.cube, 0, &material, &instance);
        assert!(matches!(second, Err(RegistryError::Duplicate { .. })));
        assert_eq!(registry.instance_count(), 1);

        let out_of_range = registry.add_submesh(&f.cube, 3, &material, &instance);
        assert!(matches!(out_of_range, Err(RegistryError::SubmeshOutOfRange { count: 1, .. })));
    }

    #[test]
    fn test_empty_levels_pruned() {
        let f = fixture();
        let mut registry = MeshRegistry::new();
        let material = material(&f.shaders, PBR_STATIC);
        let instance = instance_at(Vec3::zeros());

        registry.add_submesh(&f.cube, 0, &material, &instance).expect("add");
        registry.remove_submesh(&f.cube, 0, &material, &instance).expect("remove");

        assert!(registry.get_mesh_batch(PBR_STATIC).is_none());
        assert_eq!(registry.shader_names().count(), 0);
        assert_eq!(registry.batch_count(), 0);
    }

    #[test]
    fn test_instance_buffers_follow_membership_and_revisions() {
        let mut f = fixture();
        let mut registry = MeshRegistry::new();
        let material = material(&f.shaders, PBR_STATIC);
        let a = instance_at(Vec3::new(1.0, 2.0, 3.0));
        registry.add_submesh(&f.cube, 0, &material, &a).expect("add");

        assert_eq!(registry.update_instance_buffers(&mut f.device).expect("update"), 1);
        assert_eq!(registry.update_instance_buffers(&mut f.device).expect("update"), 0);

        a.set_transform(Mat4::new_translation(&Vec3::new(4.0, 5.0, 6.0)));
        assert_eq!(registry.update_instance_buffers(&mut f.device).expect("update"), 1);

        let batch = registry.get_mesh_batch(PBR_STATIC).expect("batch");
        let draw = batch.draws().next().expect("draw");
        let bytes = f.device.read_buffer(draw.instances.buffer().expect("buffer")).expect("bytes");
        let floats: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        // Column-major: translation in the last column.
        assert_relative_eq!(floats[12], 4.0);
        assert_relative_eq!(floats[13], 5.0);
        assert_relative_eq!(floats[14], 6.0);
    }

    #[test]
    fn test_instance_buffer_grows_by_doubling_and_retires_on_prune() {
        let mut f = fixture();
        let mut registry = MeshRegistry::new();
        let material = material(&f.shaders, PBR_STATIC);
        let instances: Vec<_> = (0..3).map(|i| instance_at(Vec3::new(i as f32, 0.0, 0.0))).collect();

        registry.add_submesh(&f.cube, 0, &material, &instances[0]).expect("add");
        registry.update_instance_buffers(&mut f.device).expect("update");
        let buffers_with_one = f.device.buffer_count();

        registry.add_submesh(&f.cube, 0, &material, &instances[1]).expect("add");
        registry.add_submesh(&f.cube, 0, &material, &instances[2]).expect("add");
        registry.update_instance_buffers(&mut f.device).expect("update");
        let draw_buffer = registry
            .get_mesh_batch(PBR_STATIC)
            .and_then(|batch| batch.draws().next())
            .and_then(|draw| draw.instances.buffer())
            .expect("buffer");
        let stride = f.shaders.get(PBR_STATIC).expect("shader").instance_stride();
        assert_eq!(GraphicsDevice::buffer_size(&f.device, draw_buffer).expect("size"), stride * 4);
        assert_eq!(f.device.buffer_count(), buffers_with_one);

        for instance in &instances {
            registry.remove_submesh(&f.cube, 0, &material, instance).expect("remove");
        }
        registry.update_instance_buffers(&mut f.device).expect("update");
        assert_eq!(f.device.buffer_count(), buffers_with_one - 1);
    }

    #[test]
    fn test_missing_instance_property_is_reported() {
        let mut f = fixture();
        let mut registry = MeshRegistry::new();
        let emissive = material(&f.shaders, EMISSIVE);
        let instance = instance_at(Vec3::zeros());
        registry.add_submesh(&f.cube, 0, &emissive, &instance).expect("add");

        let result = registry.update_instance_buffers(&mut f.device);
        assert!(matches!(result, Err(crate::render::RenderError::MissingProperty { .. })));

        instance.borrow_mut().set(RADIANCE, PropertyValue::Vec3(Vec3::new(1.0, 1.0, 1.0)));
        assert_eq!(registry.update_instance_buffers(&mut f.device).expect("update"), 1);
        assert!(f
            .device
            .commands()
            .iter()
            .any(|command| matches!(command, DeviceCommand::WriteBuffer { .. })));
    }

    #[test]
    fn test_intersect_returns_closest_instance() {
        let f = fixture();
        let mut registry = MeshRegistry::new();
        let material = material(&f.shaders, PBR_STATIC);
        let near = instance_at(Vec3::new(0.0, 0.0, 5.0));
        let far = instance_at(Vec3::new(0.0, 0.0, 10.0));
        registry.add_submesh(&f.cube, 0, &material, &far).expect("add");
        registry.add_submesh(&f.cube, 0, &material, &near).expect("add");

        let ray = Ray::new(Vec3::new(0.2, 0.1, 0.0), Vec3::z());
        let hit = registry.intersect(&ray).expect("hit");
        assert_eq!(hit.instance, near);
        assert_relative_eq!(hit.step, 4.0, epsilon = 1e-5);
        assert_relative_eq!(hit.point, Vec3::new(0.2, 0.1, 4.0), epsilon = 1e-5);
        assert!(registry.contains(&hit.key()));

        let miss = Ray::new(Vec3::new(3.0, 0.0, 0.0), Vec3::z());
        assert!(registry.intersect(&miss).is_none());
    }
}
