//! Pointer interaction controller: hit-testing and the drag state machine that
//! turns mouse/touch events into transform position updates.
//!
//! Mouse and single-finger touch share the same logic; the host feeds touch
//! events through [`first_touch`] and attaches move/up/cancel listeners at the
//! document level so a drag keeps tracking outside the surface bounds. The
//! controller itself is plain state; [`PointerController::reset`] must run on
//! teardown so no drag survives across sessions.

use serde::Serialize;

use super::geometry::{SurfaceSize, Transform, TransformUpdate};

/// Pointer position in client (CSS) or surface pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerPos {
    pub x: f64,
    pub y: f64,
}

impl PointerPos {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Pointer event stream, already unified across input devices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down(PointerPos),
    Move(PointerPos),
    Up,
    Cancel,
}

/// Pick the tracked touch point: the first one. No touch points, no event.
pub fn first_touch(touches: &[PointerPos]) -> Option<PointerPos> {
    touches.first().copied()
}

/// Interaction phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PointerPhase {
    Idle,
    Hovering,
    Dragging,
}

/// Cursor presentation signal for the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CursorAffordance {
    Default,
    Grab,
    Grabbing,
}

/// On-screen geometry of the surface, used to map client coordinates to
/// backing pixels. `css_width`/`css_height` are the rendered size.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceMetrics {
    pub backing: SurfaceSize,
    pub css_width: f64,
    pub css_height: f64,
}

impl SurfaceMetrics {
    /// Identity mapping: rendered size equals backing size.
    pub fn identity(backing: SurfaceSize) -> Self {
        Self {
            backing,
            css_width: backing.width as f64,
            css_height: backing.height as f64,
        }
    }

    /// Map a client position to surface pixels by scaling each axis with
    /// `backing / rendered`. A zero rendered size yields no valid position.
    pub fn map_to_surface(&self, client: PointerPos) -> Option<PointerPos> {
        if self.css_width <= 0.0 || self.css_height <= 0.0 {
            return None;
        }
        Some(PointerPos::new(
            client.x * self.backing.width as f64 / self.css_width,
            client.y * self.backing.height as f64 / self.css_height,
        ))
    }
}

/// Anchor captured at drag start; discarded when the drag ends.
#[derive(Debug, Clone, Copy)]
pub struct DragSession {
    pub start_pointer: PointerPos,
    pub start_transform: (i32, i32),
}

/// New transform position for the current pointer: the anchor position plus
/// the pointer delta, rounded to integers.
pub fn drag_position(session: &DragSession, pointer: PointerPos) -> (i32, i32) {
    (
        (session.start_transform.0 as f64 + (pointer.x - session.start_pointer.x)).round() as i32,
        (session.start_transform.1 as f64 + (pointer.y - session.start_pointer.y)).round() as i32,
    )
}

/// Boundary-inclusive containment over [x, x+width] x [y, y+height].
pub fn hit_test(transform: &Transform, pos: PointerPos) -> bool {
    pos.x >= transform.x as f64
        && pos.x <= (transform.x + transform.width) as f64
        && pos.y >= transform.y as f64
        && pos.y <= (transform.y + transform.height) as f64
}

/// What the host should do with an event: maybe apply a transform update,
/// maybe suppress default browser handling, and how to present the cursor.
#[derive(Debug, Clone, Copy, Default)]
pub struct PointerResponse {
    pub update: Option<TransformUpdate>,
    pub consume_default: bool,
}

pub struct PointerController {
    phase: PointerPhase,
    drag: Option<DragSession>,
}

impl Default for PointerController {
    fn default() -> Self {
        Self::new()
    }
}

impl PointerController {
    pub fn new() -> Self {
        Self {
            phase: PointerPhase::Idle,
            drag: None,
        }
    }

    pub fn phase(&self) -> PointerPhase {
        self.phase
    }

    pub fn cursor(&self) -> CursorAffordance {
        match self.phase {
            PointerPhase::Idle => CursorAffordance::Default,
            PointerPhase::Hovering => CursorAffordance::Grab,
            PointerPhase::Dragging => CursorAffordance::Grabbing,
        }
    }

    /// Process one pointer event against the current transform rectangle.
    /// `transform` is `None` while no foreground is placed; all events are
    /// then inert.
    pub fn handle(
        &mut self,
        event: PointerEvent,
        metrics: &SurfaceMetrics,
        transform: Option<&Transform>,
    ) -> PointerResponse {
        let Some(transform) = transform else {
            return PointerResponse::default();
        };

        match event {
            PointerEvent::Down(client) => {
                let Some(pos) = metrics.map_to_surface(client) else {
                    return PointerResponse::default();
                };
                if !hit_test(transform, pos) {
                    return PointerResponse::default();
                }
                self.phase = PointerPhase::Dragging;
                self.drag = Some(DragSession {
                    start_pointer: pos,
                    start_transform: (transform.x, transform.y),
                });
                PointerResponse {
                    update: None,
                    consume_default: true,
                }
            }
            PointerEvent::Move(client) => {
                let Some(pos) = metrics.map_to_surface(client) else {
                    // No valid position; drag state is kept but nothing moves
                    return PointerResponse::default();
                };
                match self.drag {
                    Some(session) => {
                        let (x, y) = drag_position(&session, pos);
                        PointerResponse {
                            update: Some(TransformUpdate::position(x, y)),
                            consume_default: true,
                        }
                    }
                    None => {
                        self.phase = if hit_test(transform, pos) {
                            PointerPhase::Hovering
                        } else {
                            PointerPhase::Idle
                        };
                        PointerResponse::default()
                    }
                }
            }
            PointerEvent::Up | PointerEvent::Cancel => {
                self.drag = None;
                self.phase = PointerPhase::Idle;
                PointerResponse::default()
            }
        }
    }

    /// Drop any in-flight drag. Run whenever the host detaches its listeners
    /// so state never leaks into the next session.
    pub fn reset(&mut self) {
        self.drag = None;
        self.phase = PointerPhase::Idle;
    }
}
