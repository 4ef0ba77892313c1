//! Mouse state for picking operations
//!
//! Tracks the cursor in pixel space and converts it to Normalized Device
//! Coordinates (NDC) for ray casting.

use crate::render::camera::pixel_to_ndc;

/// Mouse state for picking operations
#[derive(Debug, Clone, PartialEq)]
pub struct MouseState {
    /// Current screen-space X position (pixels)
    pub screen_x: f32,
    /// Current screen-space Y position (pixels)
    pub screen_y: f32,
    /// Viewport width in pixels
    pub window_width: u32,
    /// Viewport height in pixels
    pub window_height: u32,
    /// Whether the left button is held
    pub left_down: bool,
    /// Whether the right button is held
    pub right_down: bool,
}

impl MouseState {
    /// Create a new mouse state for a viewport
    pub fn new(window_width: u32, window_height: u32) -> Self {
        Self {
            screen_x: 0.0,
            screen_y: 0.0,
            window_width,
            window_height,
            left_down: false,
            right_down: false,
        }
    }

    /// Convert the cursor to NDC.
    ///
    /// NDC range: [-1, 1] where X: -1 = left, +1 = right and
    /// Y: -1 = bottom, +1 = top.
    pub fn screen_to_ndc(&self) -> (f32, f32) {
        pixel_to_ndc(self.screen_x, self.screen_y, self.window_width, self.window_height)
    }

    /// Update mouse position from window events
    pub fn update_position(&mut self, x: f32, y: f32) {
        self.screen_x = x;
        self.screen_y = y;
    }

    /// Update viewport size (for NDC conversion)
    pub fn update_window_size(&mut self, width: u32, height: u32) {
        self.window_width = width;
        self.window_height = height;
    }
}

impl Default for MouseState {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_to_ndc_center() {
        let mut mouse = MouseState::new(1920, 1080);
        mouse.update_position(960.0, 540.0);

        let (ndc_x, ndc_y) = mouse.screen_to_ndc();
        assert!(ndc_x.abs() < 0.001);
        assert!(ndc_y.abs() < 0.001);
    }

    #[test]
    fn test_screen_to_ndc_corners() {
        let mouse = MouseState::new(1920, 1080);

        let (ndc_x, ndc_y) = mouse.screen_to_ndc();
        assert!((ndc_x - (-1.0)).abs() < 0.001); // Left edge
        assert!((ndc_y - 1.0).abs() < 0.001); // Top edge
    }
}
