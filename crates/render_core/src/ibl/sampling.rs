//! Sampling math shared by the IBL precomputation shaders.
//!
//! Cube faces use the conventional layer order +X, -X, +Y, -Y, +Z, -Z with
//! `(u, v)` in `[0, 1]` measured from the top-left texel of each face.

use crate::foundation::math::{constants::TAU, Vec3};

/// Number of cube faces
pub const CUBE_FACES: u32 = 6;

/// World direction through `(u, v)` on a cube face
pub fn cube_face_direction(face: u32, u: f32, v: f32) -> Vec3 {
    let a = 2.0 * u - 1.0;
    let b = 2.0 * v - 1.0;
    let direction = match face {
        0 => Vec3::new(1.0, -b, -a),
        1 => Vec3::new(-1.0, -b, a),
        2 => Vec3::new(a, 1.0, b),
        3 => Vec3::new(a, -1.0, -b),
        4 => Vec3::new(a, -b, 1.0),
        _ => Vec3::new(-a, -b, -1.0),
    };
    direction.normalize()
}

/// Cube face and `(u, v)` a direction lands on. Inverse of [`cube_face_direction`].
pub fn direction_to_cube_uv(direction: &Vec3) -> (u32, f32, f32) {
    let (x, y, z) = (direction.x, direction.y, direction.z);
    let (ax, ay, az) = (x.abs(), y.abs(), z.abs());

    let (face, major, sc, tc) = if ax >= ay && ax >= az {
        if x > 0.0 {
            (0, ax, -z, -y)
        } else {
            (1, ax, z, -y)
        }
    } else if ay >= az {
        if y > 0.0 {
            (2, ay, x, z)
        } else {
            (3, ay, x, -z)
        }
    } else if z > 0.0 {
        (4, az, x, -y)
    } else {
        (5, az, -x, -y)
    };

    let major = major.max(f32::MIN_POSITIVE);
    (face, 0.5 * (sc / major + 1.0), 0.5 * (tc / major + 1.0))
}

/// Mip levels of a full chain for `size`: `floor(log2(size)) + 1`
pub fn mip_count(size: u32) -> u32 {
    if size == 0 {
        0
    } else {
        u32::BITS - size.leading_zeros()
    }
}

/// Roughness a prefiltered mip represents: linear sweep from 0 to 1
pub fn roughness_for_mip(mip: u32, mip_count: u32) -> f32 {
    if mip_count <= 1 {
        0.0
    } else {
        mip as f32 / (mip_count - 1) as f32
    }
}

/// Van der Corput radical inverse in base 2
fn radical_inverse(bits: u32) -> f32 {
    bits.reverse_bits() as f32 * 2.328_306_4e-10
}

/// Point `i` of an `n`-point Hammersley set in `[0, 1)^2`
pub fn hammersley(i: u32, n: u32) -> (f32, f32) {
    (i as f32 / n as f32, radical_inverse(i))
}

/// Orthonormal tangent frame around `normal`
fn tangent_frame(normal: &Vec3) -> (Vec3, Vec3) {
    let up = if normal.z.abs() < 0.999 {
        Vec3::new(0.0, 0.0, 1.0)
    } else {
        Vec3::new(1.0, 0.0, 0.0)
    };
    let tangent = up.cross(normal).normalize();
    let bitangent = normal.cross(&tangent);
    (tangent, bitangent)
}

/// Cosine-weighted hemisphere direction around `normal`
pub fn cosine_sample_hemisphere(xi: (f32, f32), normal: &Vec3) -> Vec3 {
    let phi = TAU * xi.0;
    let cos_theta = (1.0 - xi.1).sqrt();
    let sin_theta = xi.1.sqrt();
    let (tangent, bitangent) = tangent_frame(normal);
    (tangent * (phi.cos() * sin_theta) + bitangent * (phi.sin() * sin_theta) + normal * cos_theta)
        .normalize()
}

/// GGX-distributed half vector around `normal`
pub fn importance_sample_ggx(xi: (f32, f32), normal: &Vec3, roughness: f32) -> Vec3 {
    let a = roughness * roughness;
    let phi = TAU * xi.0;
    let cos_theta = ((1.0 - xi.1) / (1.0 + (a * a - 1.0) * xi.1)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let (tangent, bitangent) = tangent_frame(normal);
    (tangent * (phi.cos() * sin_theta) + bitangent * (phi.sin() * sin_theta) + normal * cos_theta)
        .normalize()
}

/// Diffuse irradiance around `normal`, normalized so a constant environment
/// `L` integrates to `L`. The cosine-weighted pdf cancels the cosine term.
pub fn convolve_irradiance(normal: &Vec3, sample_count: u32, radiance: impl Fn(&Vec3) -> Vec3) -> Vec3 {
    let count = sample_count.max(1);
    let mut sum = Vec3::zeros();
    for i in 0..count {
        let direction = cosine_sample_hemisphere(hammersley(i, count), normal);
        sum += radiance(&direction);
    }
    sum / count as f32
}

/// Split-sum prefiltered radiance for `roughness` with N = V = R.
pub fn prefilter_radiance(
    normal: &Vec3,
    roughness: f32,
    sample_count: u32,
    radiance: impl Fn(&Vec3) -> Vec3,
) -> Vec3 {
    if roughness <= 0.0 {
        return radiance(normal);
    }

    let count = sample_count.max(1);
    let mut sum = Vec3::zeros();
    let mut weight = 0.0;
    for i in 0..count {
        let half = importance_sample_ggx(hammersley(i, count), normal, roughness);
        let light = half * (2.0 * normal.dot(&half)) - normal;
        let n_dot_l = normal.dot(&light);
        if n_dot_l > 0.0 {
            sum += radiance(&light) * n_dot_l;
            weight += n_dot_l;
        }
    }

    if weight > 0.0 {
        sum / weight
    } else {
        radiance(normal)
    }
}
