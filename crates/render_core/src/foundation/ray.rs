//! Rays and planes for picking and dragging

use crate::foundation::math::{Mat4, Point3, Vec3};

/// Smallest determinant / parameter treated as non-zero in intersection tests
pub const EPSILON: f32 = 1e-7;

/// A ray for ray casting and picking
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    /// The origin point of the ray in world space
    pub origin: Vec3,
    /// The direction of the ray (normalized on construction)
    pub direction: Vec3,
}

impl Ray {
    /// Creates a new ray with the given origin and direction
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
        }
    }

    /// Get a point along the ray at parameter t
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Transform the ray by an affine matrix. The direction is re-normalized,
    /// so parameters along the result are not comparable under scaling.
    pub fn transform(&self, matrix: &Mat4) -> Self {
        let origin = matrix.transform_point(&Point3::from(self.origin)).coords;
        let direction = matrix.transform_vector(&self.direction);
        Self::new(origin, direction)
    }

    /// Double-sided Möller–Trumbore intersection.
    ///
    /// Returns `(t, u, v)` where `t` is the ray parameter and `u`, `v` are
    /// barycentric coordinates, or `None` for misses and hits behind the origin.
    pub fn intersect_triangle(&self, v0: Vec3, v1: Vec3, v2: Vec3) -> Option<(f32, f32, f32)> {
        let edge1 = v1 - v0;
        let edge2 = v2 - v0;

        let h = self.direction.cross(&edge2);
        let det = edge1.dot(&h);
        if det.abs() < EPSILON {
            return None;
        }

        let inv_det = 1.0 / det;
        let s = self.origin - v0;

        let u = inv_det * s.dot(&h);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(&edge1);
        let v = inv_det * self.direction.dot(&q);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = inv_det * edge2.dot(&q);
        (t > EPSILON).then_some((t, u, v))
    }
}

/// An infinite plane `normal · p + distance = 0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit normal
    pub normal: Vec3,
    /// Signed offset from the origin
    pub distance: f32,
}

impl Plane {
    /// Plane through `point` facing `normal`
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize();
        Self {
            normal,
            distance: -normal.dot(&point),
        }
    }

    /// Signed distance from point to plane (positive = in front)
    pub fn distance_to_point(&self, point: Vec3) -> f32 {
        self.normal.dot(&point) + self.distance
    }

    /// Ray parameter where the ray crosses the plane, in either direction.
    pub fn intersect_ray(&self, ray: &Ray) -> Option<f32> {
        let denom = self.normal.dot(&ray.direction);
        if denom.abs() < EPSILON {
            return None;
        }
        Some(-self.distance_to_point(ray.origin) / denom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ray_creation_normalizes_direction() {
        let ray = Ray::new(Vec3::zeros(), Vec3::new(3.0, 4.0, 0.0));
        assert_relative_eq!(ray.direction.magnitude(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_triangle_hit_front_and_back() {
        let (v0, v1, v2) = (
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        );
        let front = Ray::new(Vec3::new(0.0, 0.0, 2.0), Vec3::new(0.0, 0.0, -1.0));
        let back = Ray::new(Vec3::new(0.0, 0.0, -3.0), Vec3::new(0.0, 0.0, 1.0));

        let (t, _, _) = front.intersect_triangle(v0, v1, v2).expect("front hit");
        assert_relative_eq!(t, 2.0, epsilon = 1e-6);
        let (t, _, _) = back.intersect_triangle(v0, v1, v2).expect("back hit");
        assert_relative_eq!(t, 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_triangle_behind_origin_is_missed() {
        let ray = Ray::new(Vec3::new(0.0, 0.0, 2.0), Vec3::new(0.0, 0.0, 1.0));
        let hit = ray.intersect_triangle(
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        );
        assert!(hit.is_none());
    }

    #[test]
    fn test_plane_intersection() {
        let plane = Plane::from_point_normal(Vec3::new(0.0, 0.0, -4.0), Vec3::new(0.0, 0.0, 1.0));
        let ray = Ray::new(Vec3::zeros(), Vec3::new(0.0, 0.0, -1.0));
        assert_relative_eq!(plane.intersect_ray(&ray).expect("crosses"), 4.0, epsilon = 1e-6);
    }
}
