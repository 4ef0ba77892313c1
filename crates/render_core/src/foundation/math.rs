//! Math utilities and types
//!
//! Provides the nalgebra-backed math types used by the camera, light and
//! batching code, plus the reversed-Z projection helpers.

pub use nalgebra::{Matrix3, Matrix4, Quaternion, Unit, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a transform with position and uniform scale
    pub fn from_position_scale(position: Vec3, scale: f32) -> Self {
        Self {
            position,
            scale: Vec3::new(scale, scale, scale),
            ..Default::default()
        }
    }

    /// Convert to a transformation matrix (T * R * S)
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }
}

/// Translation component of an affine matrix
pub fn translation_of(matrix: &Mat4) -> Vec3 {
    Vec3::new(matrix.m14, matrix.m24, matrix.m34)
}

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// 2 * Pi
    pub const TAU: f32 = 2.0 * PI;

    /// Pi / 2
    pub const HALF_PI: f32 = PI * 0.5;

    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = PI / 180.0;
}

/// Math utility functions
pub mod utils {
    use super::constants;

    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees * constants::DEG_TO_RAD
    }
}

/// Extension trait for Mat4 with camera-related constructors
pub trait Mat4Ext {
    /// Right-handed look-at view matrix (camera looks down -Z in view space)
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4;

    /// Reversed-Z perspective projection with an infinite far plane.
    ///
    /// A view-space point at `z = -near` lands on depth 1.0 and depth tends to
    /// 0.0 as `z` goes to minus infinity, so depth tests must use `Greater`.
    fn perspective_reversed_infinite(fov_y: f32, aspect: f32, near: f32) -> Mat4;
}

impl Mat4Ext for Mat4 {
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
        let forward = (target - eye).normalize();
        let right = forward.cross(&up).normalize();
        let camera_up = right.cross(&forward);

        let translation = Mat4::new_translation(&(-eye));

        let rotation = Mat4::new(
            right.x, right.y, right.z, 0.0,
            camera_up.x, camera_up.y, camera_up.z, 0.0,
            -forward.x, -forward.y, -forward.z, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );

        rotation * translation
    }

    fn perspective_reversed_infinite(fov_y: f32, aspect: f32, near: f32) -> Mat4 {
        let focal = 1.0 / (fov_y * 0.5).tan();

        // clip.z = near, clip.w = -z_view  =>  depth = near / -z_view
        Mat4::new(
            focal / aspect, 0.0, 0.0, 0.0,
            0.0, focal, 0.0, 0.0,
            0.0, 0.0, 0.0, near,
            0.0, 0.0, -1.0, 0.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transform_matrix_applies_scale_rotation_translation() {
        let transform = Transform {
            position: Vec3::new(1.0, -2.0, 3.0),
            rotation: Quat::from_axis_angle(&Vec3::y_axis(), constants::HALF_PI),
            scale: Vec3::new(2.0, 2.0, 2.0),
        };
        let moved = transform.to_matrix().transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(moved.coords, Vec3::new(1.0, -2.0, 1.0), epsilon = 1e-5);

        let light = Transform::from_position_scale(Vec3::new(0.0, 4.0, 0.0), 0.5).to_matrix();
        assert_relative_eq!(translation_of(&light), Vec3::new(0.0, 4.0, 0.0));
        assert_relative_eq!(light.m11, 0.5);
    }

    #[test]
    fn test_transform_serializes_to_ron() {
        let transform = Transform::from_position_scale(Vec3::new(1.0, 2.0, 3.0), 0.25);
        let text = ron::to_string(&transform).expect("serialize");
        let back: Transform = ron::from_str(&text).expect("deserialize");
        assert_relative_eq!(back.position, transform.position);
        assert_relative_eq!(back.scale, transform.scale);
    }

    #[test]
    fn test_reversed_z_depth_range() {
        let near = 0.1;
        let projection = Mat4::perspective_reversed_infinite(constants::HALF_PI, 1.0, near);

        let at_near = projection * Vec4::new(0.0, 0.0, -near, 1.0);
        assert_relative_eq!(at_near.z / at_near.w, 1.0, epsilon = 1e-6);

        let far_away = projection * Vec4::new(0.0, 0.0, -1.0e7, 1.0);
        let depth = far_away.z / far_away.w;
        assert!(depth > 0.0 && depth < 1.0e-6, "depth {depth} should approach zero");
    }

    #[test]
    fn test_look_at_maps_target_onto_negative_z() {
        let view = Mat4::look_at(
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::zeros(),
            Vec3::new(0.0, 1.0, 0.0),
        );
        let target_in_view = view.transform_point(&Point3::origin());
        assert_relative_eq!(target_in_view.coords, Vec3::new(0.0, 0.0, -5.0), epsilon = 1e-6);
    }
}
