//! Input handling: camera control and mouse state for picking

pub mod camera_controller;
pub mod picking;

pub use camera_controller::CameraController;
pub use picking::MouseState;
