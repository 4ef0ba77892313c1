//! Pointer dragging of picked instances
//!
//! The held instance moves on a camera-facing plane through the point where
//! it was picked, keeping the offset between that point and its origin.

use crate::foundation::math::{translation_of, Vec3};
use crate::foundation::ray::{Plane, Ray};
use crate::render::property::InstanceRef;

/// Dragger state
#[derive(Debug, Clone, Default)]
pub enum DragState {
    /// Nothing held
    #[default]
    Idle,
    /// An instance is held
    Dragging {
        /// Held instance
        instance: InstanceRef,
        /// Plane the grab point moves on
        plane: Plane,
        /// Instance origin minus grab point
        offset: Vec3,
    },
}

/// Moves one instance at a time along a camera-facing plane
#[derive(Debug, Clone, Default)]
pub struct Dragger {
    state: DragState,
}

impl Dragger {
    /// Idle dragger
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub const fn state(&self) -> &DragState {
        &self.state
    }

    /// Whether an instance is held
    pub const fn is_dragging(&self) -> bool {
        matches!(self.state, DragState::Dragging { .. })
    }

    /// Instance being dragged
    pub const fn held(&self) -> Option<&InstanceRef> {
        match &self.state {
            DragState::Dragging { instance, .. } => Some(instance),
            DragState::Idle => None,
        }
    }

    /// Grab `instance` at world-space `grab_point`, facing `view_direction`
    pub fn begin(&mut self, instance: InstanceRef, grab_point: Vec3, view_direction: Vec3) {
        let offset = translation_of(&instance.transform()) - grab_point;
        log::debug!("Drag started on instance {} at {:?}", instance.id(), grab_point);
        self.state = DragState::Dragging {
            instance,
            plane: Plane::from_point_normal(grab_point, view_direction),
            offset,
        };
    }

    /// Move the held instance to where `ray` crosses the drag plane.
    /// Returns whether the instance moved.
    pub fn drag(&mut self, ray: &Ray) -> bool {
        let DragState::Dragging { instance, plane, offset } = &self.state else {
            return false;
        };
        let Some(step) = plane.intersect_ray(ray).filter(|step| *step > 0.0) else {
            return false;
        };

        let position = ray.point_at(step) + offset;
        let mut transform = instance.transform();
        transform.m14 = position.x;
        transform.m24 = position.y;
        transform.m34 = position.z;
        instance.set_transform(transform);
        log::trace!("Dragged instance {} to {:?}", instance.id(), position);
        true
    }

    /// Release the held instance, if any
    pub fn end(&mut self) {
        if let DragState::Dragging { instance, .. } = &self.state {
            log::debug!("Drag ended on instance {}", instance.id());
        }
        self.state = DragState::Idle;
    }
}
