//! Fly-camera controller: WASD/QE movement and right-drag rotation

use std::collections::HashSet;

use crate::events::{Event, EventDispatcher, EventHandler, EventType, Key, MouseButton};
use crate::foundation::math::{Quat, Unit, Vec3};
use crate::render::camera::Camera;
use crate::settings::CameraSettings;

/// Limit on |forward.y| so pitching never flips the camera over the pole
const MAX_PITCH_SINE: f32 = 0.99;

/// Drives a [`Camera`] from input events
#[derive(Debug, Clone)]
pub struct CameraController {
    camera: Camera,
    settings: CameraSettings,
    held_keys: HashSet<Key>,
    rotating: bool,
    last_cursor: Option<(f32, f32)>,
    viewport: (u32, u32),
}

impl CameraController {
    /// Controller for `camera` with a `width` x `height` viewport
    pub fn new(camera: Camera, settings: CameraSettings, width: u32, height: u32) -> Self {
        let mut controller = Self {
            camera,
            settings,
            held_keys: HashSet::new(),
            rotating: false,
            last_cursor: None,
            viewport: (width, height),
        };
        controller.resize(width, height);
        controller
    }

    /// Controlled camera
    pub const fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Mutable access to the controlled camera
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Viewport size in pixels
    pub const fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    /// Whether a right-drag rotation is in progress
    pub const fn is_rotating(&self) -> bool {
        self.rotating
    }

    /// Apply held movement keys for `delta_time` seconds
    pub fn update(&mut self, delta_time: f32) {
        let axis = |positive: Key, negative: Key| {
            f32::from(u8::from(self.held_keys.contains(&positive))) - f32::from(u8::from(self.held_keys.contains(&negative)))
        };
        let forward = axis(Key::W, Key::S);
        let right = axis(Key::D, Key::A);
        let up = axis(Key::E, Key::Q);

        let direction = self.camera.forward() * forward + self.camera.right() * right + self.camera.up * up;
        let Some(direction) = direction.try_normalize(f32::EPSILON) else {
            return;
        };

        let offset = direction * self.settings.move_speed * delta_time;
        self.camera.position += offset;
        self.camera.target += offset;
        log::trace!("Camera moved by {:?}", offset);
    }

    /// Rotate by a cursor delta in pixels (yaw about world up, pitch about
    /// the camera's right axis)
    pub fn rotate(&mut self, dx: f32, dy: f32) {
        let speed = self.settings.rotation_speed;
        let up = Unit::new_normalize(self.camera.up);
        let yaw = Quat::from_axis_angle(&up, -dx * speed);
        let mut forward = yaw * self.camera.forward();

        let right = Unit::new_normalize(forward.cross(&self.camera.up));
        let pitched = Quat::from_axis_angle(&right, -dy * speed) * forward;
        if pitched.dot(&up).abs() < MAX_PITCH_SINE {
            forward = pitched;
        }

        let distance = (self.camera.target - self.camera.position).magnitude().max(1.0);
        self.camera.target = self.camera.position + forward * distance;
    }

    /// Update aspect ratio for a new viewport
    pub fn resize(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
        if width > 0 && height > 0 {
            self.camera.set_aspect_ratio(width as f32 / height as f32);
        }
    }

    fn on_key(&mut self, event: &Event, pressed: bool) -> bool {
        match event.get_key() {
            Some(key @ (Key::W | Key::A | Key::S | Key::D | Key::Q | Key::E)) => {
                if pressed {
                    self.held_keys.insert(key);
                } else {
                    self.held_keys.remove(&key);
                }
                true
            }
            _ => false,
        }
    }
}

impl EventHandler for CameraController {
    fn on_event(&mut self, event: &Event) -> bool {
        let mut dispatcher = EventDispatcher::new(event);

        dispatcher.dispatch(EventType::WindowResized, |e| {
            if let Some((width, height)) = e.get_size() {
                self.resize(width, height);
            }
            // Others (the scene, the renderer) also track the viewport.
            false
        });
        dispatcher.dispatch(EventType::KeyPressed, |e| self.on_key(e, true));
        dispatcher.dispatch(EventType::KeyReleased, |e| self.on_key(e, false));
        dispatcher.dispatch(EventType::MouseButtonPressed, |e| {
            if e.get_mouse_button() != Some(MouseButton::Right) {
                return false;
            }
            self.rotating = true;
            self.last_cursor = e.get_position();
            true
        });
        dispatcher.dispatch(EventType::MouseButtonReleased, |e| {
            if e.get_mouse_button() != Some(MouseButton::Right) {
                return false;
            }
            self.rotating = false;
            self.last_cursor = None;
            true
        });
        dispatcher.dispatch(EventType::MouseMoved, |e| {
            let Some(position) = e.get_position() else {
                return false;
            };
            if !self.rotating {
                return false;
            }
            if let Some((last_x, last_y)) = self.last_cursor.replace(position) {
                self.rotate(position.0 - last_x, position.1 - last_y);
            }
            true
        })
    }
}
