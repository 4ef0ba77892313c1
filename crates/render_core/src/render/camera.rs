//! # Camera and Frustum Math
//!
//! Perspective camera with a reversed-Z, infinite-far projection: the near
//! plane maps to depth 1.0 and infinity to 0.0, so geometry depth tests use
//! "greater" and the sky is drawn at the 0.0 boundary.
//!
//! ## Coordinate System
//! Right-handed, Y-up world; the camera looks down -Z in view space. NDC has
//! +X to the right and +Y up. Pixel coordinates have their origin at the
//! top-left of the viewport with +Y down.
//!
//! Frustum-corner reconstruction produces world-space directions at unit
//! view depth. The translation-free variants feed shading that only needs a
//! direction (environment lookups); the ray variants add the camera position
//! for picking.

use crate::foundation::math::{utils, Mat4, Mat4Ext, Vec3, Vec4};
use crate::foundation::ray::Ray;
use crate::settings::CameraSettings;

/// 3D perspective camera
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,

    /// Point the camera is looking at in world space
    pub target: Vec3,

    /// Up vector for camera orientation (typically [0, 1, 0])
    pub up: Vec3,

    /// Vertical field of view in radians
    pub fov: f32,

    /// Aspect ratio (width / height)
    pub aspect: f32,

    /// Distance to the near plane; there is no far plane
    pub near: f32,
}

impl Camera {
    /// Create a perspective camera looking at the origin
    pub fn perspective(position: Vec3, fov_degrees: f32, aspect: f32, near: f32) -> Self {
        Self {
            position,
            target: Vec3::zeros(),
            up: Vec3::new(0.0, 1.0, 0.0),
            fov: utils::deg_to_rad(fov_degrees),
            aspect,
            near,
        }
    }

    /// Create a camera from configuration
    pub fn from_settings(settings: &CameraSettings, position: Vec3, aspect: f32) -> Self {
        Self::perspective(position, settings.fov_degrees, aspect, settings.near)
    }

    /// Move the camera without changing where it looks
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        log::trace!("Camera position updated to: {:?}", position);
    }

    /// Point the camera at `target` with a custom up vector
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        self.target = target;
        self.up = up;
        log::trace!("Camera look_at updated - target: {:?}, up: {:?}", target, up);
    }

    /// Update the aspect ratio for viewport changes
    pub fn set_aspect_ratio(&mut self, aspect: f32) {
        if (self.aspect - aspect).abs() > 0.01 {
            log::info!("Camera aspect ratio changed: {:.3} -> {:.3}", self.aspect, aspect);
        }
        self.aspect = aspect;
    }

    /// Unit viewing direction
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position)
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(|| Vec3::new(0.0, 0.0, -1.0))
    }

    /// Unit right vector
    pub fn right(&self) -> Vec3 {
        self.forward()
            .cross(&self.up)
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(Vec3::x)
    }

    /// World-to-view transform
    pub fn get_view_matrix(&self) -> Mat4 {
        Mat4::look_at(self.position, self.target, self.up)
    }

    /// Reversed-Z infinite perspective projection
    pub fn get_projection_matrix(&self) -> Mat4 {
        Mat4::perspective_reversed_infinite(self.fov, self.aspect, self.near)
    }

    /// Projection * view
    pub fn get_view_projection_matrix(&self) -> Mat4 {
        self.get_projection_matrix() * self.get_view_matrix()
    }

    /// World-space direction through an NDC point at unit view depth, without
    /// the camera translation
    pub fn ndc_to_direction(&self, ndc_x: f32, ndc_y: f32) -> Vec3 {
        let inverse_projection = self
            .get_projection_matrix()
            .try_inverse()
            .unwrap_or_else(Mat4::identity);
        let near_point = inverse_projection * Vec4::new(ndc_x, ndc_y, 1.0, 1.0);
        let view_point = near_point.xyz() / near_point.w;
        let view_direction = view_point / -view_point.z;

        let inverse_view = self.get_view_matrix().try_inverse().unwrap_or_else(Mat4::identity);
        inverse_view.transform_vector(&view_direction)
    }

    /// World-space picking ray through an NDC point
    pub fn ndc_to_world_ray(&self, ndc_x: f32, ndc_y: f32) -> Ray {
        Ray::new(self.position, self.ndc_to_direction(ndc_x, ndc_y))
    }

    /// World-space direction through a pixel, without the camera translation
    pub fn pixel_to_direction(&self, x: f32, y: f32, width: u32, height: u32) -> Vec3 {
        let (ndc_x, ndc_y) = pixel_to_ndc(x, y, width, height);
        self.ndc_to_direction(ndc_x, ndc_y)
    }

    /// World-space picking ray through a pixel
    pub fn pixel_to_world_ray(&self, x: f32, y: f32, width: u32, height: u32) -> Ray {
        let (ndc_x, ndc_y) = pixel_to_ndc(x, y, width, height);
        self.ndc_to_world_ray(ndc_x, ndc_y)
    }

    /// Directions through the top-left, top-right and bottom-left frustum
    /// corners, as consumed by per-pixel ray reconstruction in shaders
    pub fn frustum_corners(&self) -> [Vec3; 3] {
        [
            self.ndc_to_direction(-1.0, 1.0),
            self.ndc_to_direction(1.0, 1.0),
            self.ndc_to_direction(-1.0, -1.0),
        ]
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective(Vec3::new(0.0, 3.0, 3.0), 60.0, 16.0 / 9.0, 0.1)
    }
}

/// Pixel coordinates (top-left origin) to NDC (+Y up)
pub fn pixel_to_ndc(x: f32, y: f32, width: u32, height: u32) -> (f32, f32) {
    let width = width.max(1) as f32;
    let height = height.max(1) as f32;
    (2.0 * x / width - 1.0, 1.0 - 2.0 * y / height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> Camera {
        let mut camera = Camera::perspective(Vec3::new(0.0, 0.0, 0.0), 90.0, 2.0, 0.1);
        camera.look_at(Vec3::new(0.0, 0.0, -1.0), Vec3::y());
        camera
    }

    #[test]
    fn test_near_plane_maps_to_one_and_infinity_to_zero() {
        let camera = camera();
        let view_projection = camera.get_view_projection_matrix();

        let near = view_projection * Vec4::new(0.3, -0.2, -0.1, 1.0);
        assert_relative_eq!(near.z / near.w, 1.0, epsilon = 1e-5);

        let far = view_projection * Vec4::new(0.0, 0.0, -1.0e6, 1.0);
        assert!((far.z / far.w).abs() < 1e-6);
    }

    #[test]
    fn test_center_direction_is_forward() {
        let camera = camera();
        assert_relative_eq!(camera.ndc_to_direction(0.0, 0.0), Vec3::new(0.0, 0.0, -1.0), epsilon = 1e-5);
    }

    #[test]
    fn test_corner_directions_match_fov_and_aspect() {
        let camera = camera();
        let [top_left, top_right, bottom_left] = camera.frustum_corners();
        // 90 degree vertical fov: tan(45) = 1, horizontal scaled by aspect 2.
        assert_relative_eq!(top_left, Vec3::new(-2.0, 1.0, -1.0), epsilon = 1e-4);
        assert_relative_eq!(top_right, Vec3::new(2.0, 1.0, -1.0), epsilon = 1e-4);
        assert_relative_eq!(bottom_left, Vec3::new(-2.0, -1.0, -1.0), epsilon = 1e-4);
    }

    #[test]
    fn test_pixel_ray_includes_translation() {
        let mut camera = camera();
        camera.set_position(Vec3::new(1.0, 2.0, 3.0));
        camera.look_at(Vec3::new(1.0, 2.0, 2.0), Vec3::y());

        let ray = camera.pixel_to_world_ray(50.0, 25.0, 100, 50);
        assert_relative_eq!(ray.origin, Vec3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(ray.direction, Vec3::new(0.0, 0.0, -1.0), epsilon = 1e-5);

        let direction = camera.pixel_to_direction(0.0, 0.0, 100, 50);
        assert_relative_eq!(direction, Vec3::new(-2.0, 1.0, -1.0), epsilon = 1e-4);
    }
}
