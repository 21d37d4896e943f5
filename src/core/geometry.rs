//! Foreground placement model: the transform rectangle, its derivation from a
//! size percentage, and percent-based position mapping for slider controls.
//!
//! 100% size is defined as half the surface width. Nothing here clamps the
//! rectangle to the surface: off-surface placement is allowed and the host UI
//! is expected to bound slider input ranges.

use serde::{Deserialize, Serialize};

/// Output surface dimensions in pixels. Set from the background layer's
/// intrinsic dimensions and held fixed until a new background loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Placement rectangle for the foreground layer, in output-surface pixels.
///
/// `size` is the user-facing percentage; `width`/`height` are derived from it
/// and the foreground aspect ratio, so they stay aspect-correct at all times
/// except during a free drag (which only moves `x`/`y`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    /// Rendered size as a percentage; 100 means half the surface width.
    pub size: f64,
}

/// Partial update merged into a [`Transform`] by [`Transform::apply`].
/// A present `size` recomputes the rectangle dimensions; `x`/`y` merge directly.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransformUpdate {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub size: Option<f64>,
}

impl TransformUpdate {
    pub fn position(x: i32, y: i32) -> Self {
        Self { x: Some(x), y: Some(y), size: None }
    }

    pub fn size(size: f64) -> Self {
        Self { x: None, y: None, size: Some(size) }
    }
}

impl Transform {
    /// Derive the initial transform for a freshly loaded foreground:
    /// 100% size (half the surface width), aspect-correct height, centered.
    pub fn initial(surface: SurfaceSize, aspect_ratio: f64) -> Self {
        let (width, height) = derive_dimensions(surface, aspect_ratio, 100.0);
        Self {
            x: ((surface.width as f64 - width as f64) / 2.0).round() as i32,
            y: ((surface.height as f64 - height as f64) / 2.0).round() as i32,
            width,
            height,
            size: 100.0,
        }
    }

    /// Produce a new transform with `update` applied. Never fails; out-of-range
    /// sizes are honored and may yield degenerate rectangles. The result is a
    /// fresh value so per-frame readers never observe a half-applied update.
    pub fn apply(
        &self,
        update: &TransformUpdate,
        surface: SurfaceSize,
        aspect_ratio: f64,
    ) -> Self {
        let mut next = *self;
        if let Some(size) = update.size {
            let (width, height) = derive_dimensions(surface, aspect_ratio, size);
            next.width = width;
            next.height = height;
            next.size = size;
        }
        if let Some(x) = update.x {
            next.x = x;
        }
        if let Some(y) = update.y {
            next.y = y;
        }
        next
    }
}

/// Rectangle dimensions for a given size percentage: baseline width is 50% of
/// the surface width, scaled by `size/100`, height follows the aspect ratio.
/// A pure function of `size` for a fixed surface and aspect ratio.
fn derive_dimensions(surface: SurfaceSize, aspect_ratio: f64, size: f64) -> (i32, i32) {
    let width = surface.width as f64 * 0.5 * (size / 100.0);
    let height = if aspect_ratio.is_finite() && aspect_ratio != 0.0 {
        width / aspect_ratio
    } else {
        0.0
    };
    (width.round() as i32, height.round() as i32)
}

/// Map a pixel offset along one axis to a 0-100 position percentage.
/// When the layer is at least as large as the surface on that axis the layer
/// has no movable range and the percentage pins to 50.
pub fn offset_to_percent(offset: i32, surface_dim: u32, layer_dim: i32) -> f64 {
    let movable = surface_dim as f64 - layer_dim as f64;
    if movable <= 0.0 {
        return 50.0;
    }
    (offset as f64 / movable * 100.0).clamp(0.0, 100.0)
}

/// Map a position percentage back to a pixel offset. The percentage is NOT
/// clamped: values outside 0-100 entered directly place the layer off-surface
/// on purpose. With no movable range the layer centers with equal overflow
/// on both sides.
pub fn percent_to_offset(percent: f64, surface_dim: u32, layer_dim: i32) -> i32 {
    let movable = surface_dim as f64 - layer_dim as f64;
    if movable <= 0.0 {
        return (movable / 2.0).round() as i32;
    }
    (movable * percent / 100.0).round() as i32
}
