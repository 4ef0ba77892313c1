//! # Property Bags
//!
//! Instances and materials carry per-shader data as named, typed values
//! instead of per-shader structs. Layouts declared by a [`Shader`] decide
//! which names are packed into GPU buffers and in what order.
//!
//! Instances and materials are shared between the mesh registry, the light
//! environment and the dissolve sweep, so both are handed around through
//! reference-counted handles whose equality and ordering are by identity.

use std::cell::{Ref, RefCell, RefMut};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use crate::foundation::math::{Mat4, Vec3, Vec4};
use crate::gpu::TextureHandle;
use crate::render::shader::{PropertyKind, Shader};
use crate::render::{RenderError, RenderResult};

/// Name of the instance transform property
pub const TRANSFORM: &str = "Transform";

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for instances, materials and meshes
pub(crate) fn next_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, AtomicOrdering::Relaxed)
}

/// A typed property value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropertyValue {
    /// Scalar
    Float(f32),
    /// 3-component vector
    Vec3(Vec3),
    /// 4-component vector
    Vec4(Vec4),
    /// 4x4 matrix
    Mat4(Mat4),
    /// Sampled texture
    Texture(TextureHandle),
}

impl PropertyValue {
    /// Kind of this value
    pub const fn kind(&self) -> PropertyKind {
        match self {
            Self::Float(_) => PropertyKind::Float,
            Self::Vec3(_) => PropertyKind::Vec3,
            Self::Vec4(_) => PropertyKind::Vec4,
            Self::Mat4(_) => PropertyKind::Mat4,
            Self::Texture(_) => PropertyKind::Texture,
        }
    }

    /// Zero value of a kind, `None` for textures
    pub fn zero(kind: PropertyKind) -> Option<Self> {
        match kind {
            PropertyKind::Float => Some(Self::Float(0.0)),
            PropertyKind::Vec3 => Some(Self::Vec3(Vec3::zeros())),
            PropertyKind::Vec4 => Some(Self::Vec4(Vec4::zeros())),
            PropertyKind::Mat4 => Some(Self::Mat4(Mat4::identity())),
            PropertyKind::Texture => None,
        }
    }

    /// Append the GPU representation (vec3 padded to vec4, matrices column-major)
    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Self::Float(value) => out.extend_from_slice(bytemuck::bytes_of(value)),
            Self::Vec3(value) => {
                out.extend_from_slice(bytemuck::cast_slice(value.as_slice()));
                out.extend_from_slice(bytemuck::bytes_of(&0.0_f32));
            }
            Self::Vec4(value) => out.extend_from_slice(bytemuck::cast_slice(value.as_slice())),
            Self::Mat4(value) => out.extend_from_slice(bytemuck::cast_slice(value.as_slice())),
            Self::Texture(_) => {}
        }
    }
}

/// Named property storage with deterministic iteration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    values: BTreeMap<String, PropertyValue>,
}

impl PropertyBag {
    /// Empty bag
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace a value
    pub fn set(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.values.insert(name.into(), value);
    }

    /// Raw lookup
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.values.get(name)
    }

    /// Whether `name` is present
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Remove a value
    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        self.values.remove(name)
    }

    /// Scalar lookup
    pub fn get_float(&self, name: &str) -> Option<f32> {
        match self.get(name) {
            Some(PropertyValue::Float(value)) => Some(*value),
            _ => None,
        }
    }

    /// Vector lookup
    pub fn get_vec3(&self, name: &str) -> Option<Vec3> {
        match self.get(name) {
            Some(PropertyValue::Vec3(value)) => Some(*value),
            _ => None,
        }
    }

    /// Vector lookup
    pub fn get_vec4(&self, name: &str) -> Option<Vec4> {
        match self.get(name) {
            Some(PropertyValue::Vec4(value)) => Some(*value),
            _ => None,
        }
    }

    /// Matrix lookup
    pub fn get_mat4(&self, name: &str) -> Option<Mat4> {
        match self.get(name) {
            Some(PropertyValue::Mat4(value)) => Some(*value),
            _ => None,
        }
    }

    /// Texture lookup
    pub fn get_texture(&self, name: &str) -> Option<TextureHandle> {
        match self.get(name) {
            Some(PropertyValue::Texture(value)) => Some(*value),
            _ => None,
        }
    }

    /// All entries in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the bag is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Append the values named by `layout` in layout order.
    ///
    /// Texture entries take no space. Every other entry must be present with
    /// the declared kind.
    pub fn pack(&self, layout: &[(String, PropertyKind)], shader: &str, out: &mut Vec<u8>) -> RenderResult<()> {
        for (name, kind) in layout {
            if *kind == PropertyKind::Texture {
                continue;
            }
            match self.get(name) {
                Some(value) if value.kind() == *kind => value.write_to(out),
                _ => {
                    return Err(RenderError::MissingProperty {
                        property: name.clone(),
                        shader: shader.to_string(),
                    })
                }
            }
        }
        Ok(())
    }
}

/// Per-draw data: one transform plus whatever its shader's instance layout needs.
/// Not `Clone`: a copy would share the original's identity.
#[derive(Debug)]
pub struct Instance {
    id: u64,
    properties: PropertyBag,
    revision: u64,
}

impl Instance {
    /// Instance with an identity transform
    pub fn new() -> Self {
        Self::with_transform(Mat4::identity())
    }

    /// Instance with the given transform
    pub fn with_transform(transform: Mat4) -> Self {
        let mut properties = PropertyBag::new();
        properties.set(TRANSFORM, PropertyValue::Mat4(transform));
        Self {
            id: next_object_id(),
            properties,
            revision: 0,
        }
    }

    /// Identity of this instance
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Bumped on every mutation
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Properties
    pub const fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    /// Set a property
    pub fn set(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.properties.set(name, value);
        self.revision += 1;
    }

    /// World transform, identity if unset
    pub fn transform(&self) -> Mat4 {
        self.properties.get_mat4(TRANSFORM).unwrap_or_else(Mat4::identity)
    }

    /// Replace the world transform
    pub fn set_transform(&mut self, transform: Mat4) {
        self.set(TRANSFORM, PropertyValue::Mat4(transform));
    }

    /// Scalar property
    pub fn get_float(&self, name: &str) -> Option<f32> {
        self.properties.get_float(name)
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

/// Surface description bound to one shader, shared by many instances
#[derive(Debug)]
pub struct Material {
    id: u64,
    name: String,
    shader: Rc<Shader>,
    properties: PropertyBag,
    revision: u64,
}

impl Material {
    /// Material with every non-texture property of the shader's material
    /// layout set to zero
    pub fn new(name: impl Into<String>, shader: Rc<Shader>) -> Self {
        let mut properties = PropertyBag::new();
        for (property, kind) in &shader.material_layout {
            if let Some(zero) = PropertyValue::zero(*kind) {
                properties.set(property.clone(), zero);
            }
        }
        Self {
            id: next_object_id(),
            name: name.into(),
            shader,
            properties,
            revision: 0,
        }
    }

    /// Identity of this material
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Debug name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bound shader
    pub fn shader(&self) -> &Rc<Shader> {
        &self.shader
    }

    /// Bumped on every mutation
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Properties
    pub const fn properties(&self) -> &PropertyBag {
        &self.properties
    }

    /// Set a property
    pub fn set(&mut self, name: impl Into<String>, value: PropertyValue) {
        self.properties.set(name, value);
        self.revision += 1;
    }

    /// Bind a texture under `name`
    pub fn set_texture(&mut self, name: impl Into<String>, texture: TextureHandle) {
        self.set(name, PropertyValue::Texture(texture));
    }

    /// Texture bound under `name`
    pub fn texture(&self, name: &str) -> Option<TextureHandle> {
        self.properties.get_texture(name)
    }

    /// Bound textures in name order
    pub fn textures(&self) -> impl Iterator<Item = (&str, TextureHandle)> {
        self.properties.iter().filter_map(|(name, value)| match value {
            PropertyValue::Texture(texture) => Some((name, *texture)),
            _ => None,
        })
    }

    /// Constant block of this material per its shader's layout
    pub fn pack_constants(&self) -> RenderResult<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.shader.material_size());
        self.properties
            .pack(&self.shader.material_layout, &self.shader.name, &mut bytes)?;
        Ok(bytes)
    }
}

macro_rules! shared_handle {
    ($(#[$meta:meta])* $name:ident => $inner:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            id: u64,
            inner: Rc<RefCell<$inner>>,
        }

        impl $name {
            /// Share a new object
            pub fn new(inner: $inner) -> Self {
                Self {
                    id: inner.id(),
                    inner: Rc::new(RefCell::new(inner)),
                }
            }

            /// Identity of the shared object
            pub const fn id(&self) -> u64 {
                self.id
            }

            /// Immutable access
            pub fn borrow(&self) -> Ref<'_, $inner> {
                self.inner.borrow()
            }

            /// Mutable access
            pub fn borrow_mut(&self) -> RefMut<'_, $inner> {
                self.inner.borrow_mut()
            }

            /// Number of live references
            pub fn ref_count(&self) -> usize {
                Rc::strong_count(&self.inner)
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                Rc::ptr_eq(&self.inner, &other.inner)
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id().hash(state);
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                self.id().cmp(&other.id())
            }
        }
    };
}

shared_handle!(
    /// Shared handle to an [`Instance`]; equality is identity
    InstanceRef => Instance
);

shared_handle!(
    /// Shared handle to a [`Material`]; equality is identity
    MaterialRef => Material
);

impl InstanceRef {
    /// World transform of the shared instance
    pub fn transform(&self) -> Mat4 {
        self.borrow().transform()
    }

    /// Replace the world transform of the shared instance
    pub fn set_transform(&self, transform: Mat4) {
        self.borrow_mut().set_transform(transform);
    }
}

impl From<Instance> for InstanceRef {
    fn from(instance: Instance) -> Self {
        Self::new(instance)
    }
}

impl From<Material> for MaterialRef {
    fn from(material: Material) -> Self {
        Self::new(material)
    }
}
