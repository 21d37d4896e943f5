//! Color-distance chroma keying: knock out the foreground's solid backdrop by
//! making every pixel near the key color fully transparent.
//!
//! Keying runs on the foreground at its intrinsic resolution, before the
//! compositor scales it to the transform rectangle, so the tolerance acts on
//! native pixels rather than interpolated ones. Keying is binary; there is no
//! partial transparency at the threshold.

use serde::{Deserialize, Serialize};

use super::frame::{FrameBuffer, Rgb};

/// Key color and distance threshold. Replaced wholesale on user input so the
/// render loop never reads a half-updated value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChromaKeySettings {
    pub color: Rgb,
    /// Euclidean RGB distance threshold on the 0-255 scale (range 0 to ~441).
    /// A pixel is keyed out iff its distance to `color` is strictly below this.
    pub tolerance: f64,
}

impl Default for ChromaKeySettings {
    fn default() -> Self {
        Self {
            color: Rgb::new(0, 255, 0),
            tolerance: 100.0,
        }
    }
}

/// Squared RGB distance between a pixel and the key color.
#[inline]
fn distance_squared(pixel: [u8; 4], key: Rgb) -> f64 {
    let dr = pixel[0] as f64 - key.r as f64;
    let dg = pixel[1] as f64 - key.g as f64;
    let db = pixel[2] as f64 - key.b as f64;
    dr * dr + dg * dg + db * db
}

/// Produce a copy of `frame` with the alpha of every matching pixel set to 0.
/// Non-matching pixels are unchanged, including their original alpha.
pub fn key_out(frame: &FrameBuffer, settings: &ChromaKeySettings) -> FrameBuffer {
    let mut out = frame.clone();
    if settings.tolerance <= 0.0 {
        return out;
    }
    let threshold = settings.tolerance * settings.tolerance;
    for pixel in out.data.chunks_exact_mut(4) {
        let px = [pixel[0], pixel[1], pixel[2], pixel[3]];
        // Strict inequality: distance == tolerance is NOT keyed
        if distance_squared(px, settings.color) < threshold {
            pixel[3] = 0;
        }
    }
    out
}
