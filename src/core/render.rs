//! Render loop: per-frame two-layer composition onto the output surface.
//!
//! Composition order:
//! 1. Background stretched to cover the surface (placeholder fill when absent)
//! 2. Foreground keyed at intrinsic resolution, then scaled into its
//!    transform rectangle
//!
//! The loop is cooperative: the host drives `tick` once per display frame and
//! stops scheduling when a tick reports [`TickOutcome::Stopped`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::chroma::{key_out, ChromaKeySettings};
use super::frame::Rgb;
use super::geometry::{SurfaceSize, Transform};
use super::source::{LayerKind, LayerSource};
use super::surface::{PixelSurface, RenderSurface};

/// Surface fill when no background is loaded.
pub const PLACEHOLDER_COLOR: Rgb = Rgb { r: 17, g: 17, b: 17 };

/// Cancellation flag shared between the session and the running loop.
/// Cancelling is sticky; a new recording of the loop mints a fresh token.
#[derive(Debug, Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// What the host scheduler should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Schedule another tick for the next display frame.
    Rescheduled,
    /// The loop was cancelled; do not schedule again.
    Stopped,
}

/// Drives composition of both layers onto the output surface.
pub struct RenderLoop {
    cancel: CancelToken,
    /// Off-surface buffer the foreground is staged in for pixel readback.
    offscreen: PixelSurface,
    frames_drawn: u64,
}

impl RenderLoop {
    pub fn new() -> Self {
        Self {
            cancel: CancelToken::new(),
            offscreen: PixelSurface::new(SurfaceSize::new(0, 0)),
            frames_drawn: 0,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Total frames composited since the last restart.
    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    /// Mint a fresh token after a cancel so the loop can run again.
    pub fn restart(&mut self) {
        self.cancel = CancelToken::new();
        self.frames_drawn = 0;
    }

    /// Compose one frame. Layers may be absent or not yet loaded; whatever is
    /// present gets drawn. While recording, paused videos are resumed so the
    /// artifact never freezes on a stale frame.
    pub fn tick(
        &mut self,
        surface: &mut dyn RenderSurface,
        background: Option<&mut LayerSource>,
        foreground: Option<&mut LayerSource>,
        transform: Option<&Transform>,
        chroma: &ChromaKeySettings,
        recording: bool,
    ) -> TickOutcome {
        if self.cancel.is_cancelled() {
            return TickOutcome::Stopped;
        }

        let background = background.map(|s| {
            if recording {
                resume_if_paused(s);
            }
            &*s
        });
        let foreground = foreground.map(|s| {
            if recording {
                resume_if_paused(s);
            }
            &*s
        });

        match background {
            Some(bg) if bg.is_loaded() => match bg.current_frame() {
                Ok(frame) => surface.draw_stretched(&frame),
                Err(e) => {
                    log::warn!("Background frame unavailable: {e}");
                    surface.fill(PLACEHOLDER_COLOR);
                }
            },
            _ => surface.fill(PLACEHOLDER_COLOR),
        }

        if let (Some(fg), Some(t)) = (foreground, transform) {
            if fg.is_loaded() {
                self.draw_foreground(surface, fg, t, chroma);
            }
        }

        self.frames_drawn += 1;
        TickOutcome::Rescheduled
    }

    /// Key the foreground at its intrinsic resolution, then scale the result
    /// into the transform rectangle. A readback refusal downgrades to an
    /// unfiltered draw rather than dropping the layer.
    fn draw_foreground(
        &mut self,
        surface: &mut dyn RenderSurface,
        source: &LayerSource,
        transform: &Transform,
        chroma: &ChromaKeySettings,
    ) {
        let frame = match source.current_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Foreground frame unavailable: {e}");
                return;
            }
        };

        let intrinsic = SurfaceSize::new(frame.width, frame.height);
        if intrinsic.is_zero() {
            return;
        }
        if self.offscreen.size() != intrinsic {
            self.offscreen.set_size(intrinsic);
        }
        self.offscreen.draw_frame(
            &frame,
            0,
            0,
            intrinsic.width as i32,
            intrinsic.height as i32,
        );

        let keyed = match self.offscreen.read_back() {
            Ok(staged) => key_out(&staged, chroma),
            Err(e) => {
                log::warn!("Foreground readback failed, drawing unfiltered: {e}");
                frame
            }
        };

        surface.draw_frame(&keyed, transform.x, transform.y, transform.width, transform.height);
    }
}

impl Default for RenderLoop {
    fn default() -> Self {
        Self::new()
    }
}

fn resume_if_paused(source: &mut LayerSource) {
    if source.kind == LayerKind::Video && !source.handle().is_playing() {
        source.handle_mut().play();
    }
}
