//! Input events delivered to the scene and the camera controller
//!
//! Key principles:
//! - Key-value arguments (no order dependency)
//! - Handler returns bool (true = consumed, stops forwarding)
//! - Dispatch by event type: a handler only sees the types it asks for

use std::collections::HashMap;

/// Event type identification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Window (and viewport) size changed
    WindowResized,
    /// Mouse cursor moved
    MouseMoved,
    /// Mouse button was pressed
    MouseButtonPressed,
    /// Mouse button was released
    MouseButtonReleased,
    /// Key was pressed
    KeyPressed,
    /// Key was released
    KeyReleased,
}

/// Mouse buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    /// Primary button (picking and dragging)
    Left,
    /// Secondary button (camera rotation)
    Right,
    /// Middle button
    Middle,
}

/// Keys the engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// Move forward
    W,
    /// Move left
    A,
    /// Move backward
    S,
    /// Move right
    D,
    /// Move down
    Q,
    /// Move up
    E,
    /// Any other key, by platform code
    Other(u32),
}

/// Variant for type-safe event arguments
/// Uses key-value pairs to avoid order dependency problems
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventArg {
    /// Width and height in pixels
    Size(u32, u32),
    /// Cursor position in pixels, origin top-left
    Position(f32, f32),
    /// Mouse button
    MouseButton(MouseButton),
    /// Keyboard key
    Key(Key),
}

/// Event with type ID and key-value arguments
#[derive(Debug, Clone)]
pub struct Event {
    /// Type of event
    pub event_type: EventType,
    /// Timestamp when event was created (seconds)
    pub timestamp: f64,
    args: HashMap<&'static str, EventArg>,
}

impl Event {
    /// Create a new event with the given type and timestamp
    pub fn new(event_type: EventType, timestamp: f64) -> Self {
        Self {
            event_type,
            timestamp,
            args: HashMap::new(),
        }
    }

    /// Add an argument to the event (builder pattern)
    pub fn with_arg(mut self, key: &'static str, value: EventArg) -> Self {
        self.args.insert(key, value);
        self
    }

    /// Get an argument by key
    pub fn get_arg(&self, key: &str) -> Option<&EventArg> {
        self.args.get(key)
    }

    /// Window resize to `width` x `height`
    pub fn window_resized(width: u32, height: u32) -> Self {
        Self::new(EventType::WindowResized, 0.0).with_arg("size", EventArg::Size(width, height))
    }

    /// Cursor moved to `(x, y)`
    pub fn mouse_moved(x: f32, y: f32) -> Self {
        Self::new(EventType::MouseMoved, 0.0).with_arg("position", EventArg::Position(x, y))
    }

    /// `button` pressed with the cursor at `(x, y)`
    pub fn mouse_pressed(button: MouseButton, x: f32, y: f32) -> Self {
        Self::new(EventType::MouseButtonPressed, 0.0)
            .with_arg("button", EventArg::MouseButton(button))
            .with_arg("position", EventArg::Position(x, y))
    }

    /// `button` released with the cursor at `(x, y)`
    pub fn mouse_released(button: MouseButton, x: f32, y: f32) -> Self {
        Self::new(EventType::MouseButtonReleased, 0.0)
            .with_arg("button", EventArg::MouseButton(button))
            .with_arg("position", EventArg::Position(x, y))
    }

    /// `key` pressed
    pub fn key_pressed(key: Key) -> Self {
        Self::new(EventType::KeyPressed, 0.0).with_arg("key", EventArg::Key(key))
    }

    /// `key` released
    pub fn key_released(key: Key) -> Self {
        Self::new(EventType::KeyReleased, 0.0).with_arg("key", EventArg::Key(key))
    }

    /// Get size argument if present
    pub fn get_size(&self) -> Option<(u32, u32)> {
        if let Some(EventArg::Size(width, height)) = self.get_arg("size") {
            Some((*width, *height))
        } else {
            None
        }
    }

    /// Get position argument if present
    pub fn get_position(&self) -> Option<(f32, f32)> {
        if let Some(EventArg::Position(x, y)) = self.get_arg("position") {
            Some((*x, *y))
        } else {
            None
        }
    }

    /// Get mouse button argument if present
    pub fn get_mouse_button(&self) -> Option<MouseButton> {
        if let Some(EventArg::MouseButton(button)) = self.get_arg("button") {
            Some(*button)
        } else {
            None
        }
    }

    /// Get key argument if present
    pub fn get_key(&self) -> Option<Key> {
        if let Some(EventArg::Key(key)) = self.get_arg("key") {
            Some(*key)
        } else {
            None
        }
    }
}

/// Event handler trait
/// Returns true if event was consumed (stops forwarding)
/// Returns false to allow forwarding to other handlers
pub trait EventHandler {
    /// Handle an event, return true if consumed
    fn on_event(&mut self, event: &Event) -> bool;
}

/// Routes one event to handlers by type
pub struct EventDispatcher<'a> {
    event: &'a Event,
    consumed: bool,
}

impl<'a> EventDispatcher<'a> {
    /// Dispatcher for `event`
    pub const fn new(event: &'a Event) -> Self {
        Self { event, consumed: false }
    }

    /// Call `handler` if the event has type `event_type` and nothing has
    /// consumed it yet. Returns whether the event is now consumed.
    pub fn dispatch(&mut self, event_type: EventType, handler: impl FnOnce(&Event) -> bool) -> bool {
        if !self.consumed && self.event.event_type == event_type {
            self.consumed = handler(self.event);
        }
        self.consumed
    }

    /// Whether a handler consumed the event
    pub const fn consumed(&self) -> bool {
        self.consumed
    }
}
