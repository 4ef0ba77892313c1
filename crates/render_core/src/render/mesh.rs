//! Meshes, procedural builders and the name-keyed mesh library

use std::collections::HashMap;
use std::rc::Rc;

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{constants::{PI, TAU}, Vec3};
use crate::gpu::{BufferDesc, BufferHandle, BufferKind, GraphicsDevice};
use crate::render::property::next_object_id;
use crate::render::{RenderError, RenderResult};

/// Name of the built-in unit sphere
pub const SPHERE: &str = "Sphere";
/// Name of the built-in unit cube
pub const CUBE: &str = "Cube";

/// Interleaved vertex as uploaded to the GPU
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Model-space position
    pub position: [f32; 3],
    /// Model-space normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub uv: [f32; 2],
}

/// A contiguous index range drawn with one material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submesh {
    /// First index
    pub index_offset: u32,
    /// Number of indices
    pub index_count: u32,
    /// Added to every index of this range
    pub vertex_offset: i32,
}

/// GPU buffers of an uploaded mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshBuffers {
    /// Vertex buffer
    pub vertices: BufferHandle,
    /// Index buffer
    pub indices: BufferHandle,
}

/// Indexed triangle mesh split into submeshes
#[derive(Debug)]
pub struct Mesh {
    id: u64,
    /// Library name
    pub name: String,
    /// Vertices
    pub vertices: Vec<Vertex>,
    /// Triangle list indices
    pub indices: Vec<u32>,
    /// Submesh ranges
    pub submeshes: Vec<Submesh>,
    buffers: Option<MeshBuffers>,
}

impl Mesh {
    /// Mesh with a single submesh covering every index
    pub fn new(name: impl Into<String>, vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let submesh = Submesh {
            index_offset: 0,
            index_count: indices.len() as u32,
            vertex_offset: 0,
        };
        Self {
            id: next_object_id(),
            name: name.into(),
            vertices,
            indices,
            submeshes: vec![submesh],
            buffers: None,
        }
    }

    /// Identity of this mesh
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// GPU buffers, once uploaded through [`MeshLibrary::add`]
    pub const fn buffers(&self) -> Option<MeshBuffers> {
        self.buffers
    }

    /// Model-space triangles of a submesh
    pub fn triangles(&self, submesh_index: usize) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        let range = self.submeshes.get(submesh_index).map_or(0..0, |submesh| {
            let start = submesh.index_offset as usize;
            start..start + submesh.index_count as usize
        });
        let offset = self
            .submeshes
            .get(submesh_index)
            .map_or(0, |submesh| submesh.vertex_offset);

        self.indices
            .get(range)
            .unwrap_or(&[])
            .chunks_exact(3)
            .filter_map(move |triangle| {
                let corner = |index: u32| {
                    let index = usize::try_from(i64::from(index) + i64::from(offset)).ok()?;
                    self.vertices.get(index).map(|v| Vec3::from(v.position))
                };
                Some([corner(triangle[0])?, corner(triangle[1])?, corner(triangle[2])?])
            })
    }

    /// Unit-radius UV sphere centred on the origin
    pub fn uv_sphere(name: impl Into<String>, segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut vertices = Vec::with_capacity(((segments + 1) * (rings + 1)) as usize);

        for ring in 0..=rings {
            let v = ring as f32 / rings as f32;
            let theta = v * PI;
            for segment in 0..=segments {
                let u = segment as f32 / segments as f32;
                let phi = u * TAU;
                let normal = [theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin()];
                vertices.push(Vertex {
                    position: normal,
                    normal,
                    uv: [u, v],
                });
            }
        }

        let mut indices = Vec::with_capacity((segments * rings * 6) as usize);
        for ring in 0..rings {
            for segment in 0..segments {
                let a = ring * (segments + 1) + segment;
                let b = a + segments + 1;
                indices.extend_from_slice(&[a, b, a + 1, a + 1, b, b + 1]);
            }
        }

        Self::new(name, vertices, indices)
    }

    /// Axis-aligned cube with half-extent 1 and per-face normals
    pub fn cube(name: impl Into<String>) -> Self {
        const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, right, up) in FACES {
            let (n, r, u) = (Vec3::from(normal), Vec3::from(right), Vec3::from(up));
            let base = vertices.len() as u32;
            for (x, y) in [(-1.0_f32, -1.0_f32), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let position = n + r * x + u * y;
                vertices.push(Vertex {
                    position: position.into(),
                    normal,
                    uv: [(x + 1.0) * 0.5, (1.0 - y) * 0.5],
                });
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::new(name, vertices, indices)
    }
}

/// Name-keyed mesh registry owning uploaded meshes
#[derive(Debug, Default)]
pub struct MeshLibrary {
    meshes: HashMap<String, Rc<Mesh>>,
}

impl MeshLibrary {
    /// Empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Library with the built-in sphere (used for light sources) and cube
    pub fn with_builtin_meshes(device: &mut dyn GraphicsDevice) -> RenderResult<Self> {
        let mut library = Self::new();
        library.add(device, Mesh::uv_sphere(SPHERE, 32, 16))?;
        library.add(device, Mesh::cube(CUBE))?;
        Ok(library)
    }

    /// Upload a mesh and register it under its name
    pub fn add(&mut self, device: &mut dyn GraphicsDevice, mut mesh: Mesh) -> RenderResult<Rc<Mesh>> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&mesh.indices);

        let vertices = device.create_buffer(&BufferDesc {
            kind: BufferKind::Vertex,
            size: vertex_bytes.len().max(1),
            stride: std::mem::size_of::<Vertex>(),
            label: format!("{} vertices", mesh.name),
        })?;
        device.write_buffer(vertices, 0, vertex_bytes)?;

        let indices = device.create_buffer(&BufferDesc {
            kind: BufferKind::Index,
            size: index_bytes.len().max(1),
            stride: std::mem::size_of::<u32>(),
            label: format!("{} indices", mesh.name),
        })?;
        device.write_buffer(indices, 0, index_bytes)?;

        mesh.buffers = Some(MeshBuffers { vertices, indices });
        log::debug!(
            "Uploaded mesh '{}' ({} vertices, {} submeshes)",
            mesh.name,
            mesh.vertices.len(),
            mesh.submeshes.len()
        );

        let mesh = Rc::new(mesh);
        self.meshes.insert(mesh.name.clone(), Rc::clone(&mesh));
        Ok(mesh)
    }

    /// Look up a mesh; unknown names are a configuration error
    pub fn get(&self, name: &str) -> RenderResult<&Rc<Mesh>> {
        self.meshes.get(name).ok_or_else(|| {
            log::error!("Mesh '{}' not found", name);
            RenderError::MeshNotFound(name.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::SoftwareDevice;
    use approx::assert_relative_eq;

    #[test]
    fn test_sphere_vertices_on_unit_sphere() {
        let sphere = Mesh::uv_sphere("s", 16, 8);
        for vertex in &sphere.vertices {
            assert_relative_eq!(Vec3::from(vertex.position).magnitude(), 1.0, epsilon = 1e-5);
        }
        assert_eq!(sphere.triangles(0).count(), 16 * 8 * 2);
    }

    #[test]
    fn test_cube_layout() {
        let cube = Mesh::cube("c");
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert_eq!(cube.triangles(0).count(), 12);
        assert_eq!(cube.triangles(1).count(), 0);
    }

    #[test]
    fn test_library_uploads_and_resolves() {
        let mut device = SoftwareDevice::new();
        let library = MeshLibrary::with_builtin_meshes(&mut device).expect("builtin meshes");
        let sphere = library.get(SPHERE).expect("sphere");
        assert!(sphere.buffers().is_some());
        assert_eq!(device.buffer_count(), 4);
        assert!(matches!(library.get("Teapot"), Err(RenderError::MeshNotFound(_))));
    }
}
