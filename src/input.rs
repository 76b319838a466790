//! Pointer input for simulation interaction.
//!
//! Two layers are kept apart:
//!
//! - [`PointerInput`] mirrors the raw device state fed from window events
//!   (which buttons are held, where the cursor is).
//! - [`PointerLatch`] is what the kernels see. It is sampled once per outer
//!   step and applies the edge-debounce rule: while a button is held and the
//!   latched state already says "pressed", the latch is frozen, so polling
//!   jitter between frames cannot re-trigger an interaction. A fresh press is
//!   only accepted when nothing vetoes it (pointer over UI, a sensor being
//!   dragged, a settings view open).
//!
//! ```ignore
//! let mut raw = PointerInput::new();
//! raw.handle_event(&event);                  // from the window loop
//! let veto = ui.hovered() || sensors.dragging();
//! scheduler.set_pointer(raw.sample(bounds), veto);
//! ```

use glam::Vec2;
use winit::event::{ElementState, MouseButton as WinitMouseButton, WindowEvent};

/// Pointer buttons the simulation reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    /// Attracts particles and drags rigid bodies.
    Left,
    /// Repels particles and rigid bodies.
    Right,
}

impl MouseButton {
    fn from_winit(btn: WinitMouseButton) -> Option<Self> {
        match btn {
            WinitMouseButton::Left => Some(MouseButton::Left),
            WinitMouseButton::Right => Some(MouseButton::Right),
            _ => None,
        }
    }
}

/// Pressed flags for the two interaction buttons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Buttons {
    pub left: bool,
    pub right: bool,
}

impl Buttons {
    pub const NONE: Buttons = Buttons { left: false, right: false };

    pub fn new(left: bool, right: bool) -> Self {
        Self { left, right }
    }

    pub fn any(self) -> bool {
        self.left || self.right
    }
}

/// One pointer sample in simulation space.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PointerSample {
    pub position: Vec2,
    pub buttons: Buttons,
}

/// Raw pointer state tracked from window events.
#[derive(Debug, Default)]
pub struct PointerInput {
    buttons: Buttons,
    /// Cursor position in normalized viewport coordinates (0..1, y up).
    viewport: Vec2,
    window_size: (u32, u32),
}

impl PointerInput {
    pub fn new() -> Self {
        Self {
            window_size: (800, 600),
            ..Default::default()
        }
    }

    pub fn set_window_size(&mut self, width: u32, height: u32) {
        self.window_size = (width, height);
    }

    /// Process a winit window event.
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::MouseInput { state, button, .. } => {
                let Some(btn) = MouseButton::from_winit(*button) else {
                    return;
                };
                let down = *state == ElementState::Pressed;
                match btn {
                    MouseButton::Left => self.buttons.left = down,
                    MouseButton::Right => self.buttons.right = down,
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                let (w, h) = self.window_size;
                if w > 0 && h > 0 {
                    self.viewport = Vec2::new(
                        position.x as f32 / w as f32,
                        1.0 - position.y as f32 / h as f32,
                    );
                }
            }
            WindowEvent::CursorLeft { .. } => {
                self.buttons = Buttons::NONE;
            }
            _ => {}
        }
    }

    /// Set the state directly, for headless drivers and tests.
    pub fn set(&mut self, viewport: Vec2, buttons: Buttons) {
        self.viewport = viewport;
        self.buttons = buttons;
    }

    /// Map the cursor into simulation space for a domain of `bounds` units.
    pub fn sample(&self, bounds: Vec2) -> PointerSample {
        PointerSample {
            position: self.viewport * bounds,
            buttons: self.buttons,
        }
    }
}

/// Debounced pointer state consumed by the interaction kernels.
#[derive(Debug, Default, Clone, Copy)]
pub struct PointerLatch {
    position: Vec2,
    pressed: Buttons,
}

impl PointerLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw sample. `veto` blocks new presses (pointer over UI etc.).
    ///
    /// If either button is held now and was already latched as held, the
    /// button state is left untouched. Only the position follows the cursor.
    pub fn update(&mut self, sample: PointerSample, veto: bool) {
        self.position = sample.position;

        let current = sample.buttons;
        let frozen = (current.left && self.pressed.left) || (current.right && self.pressed.right);
        if frozen {
            return;
        }
        self.pressed = if veto { Buttons::NONE } else { current };
    }

    pub fn position(&self) -> Vec2 {
        self.position
    }

    pub fn pressed(&self) -> Buttons {
        self.pressed
    }
}
