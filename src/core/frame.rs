//! RGBA pixel buffer shared by the compositor, the chroma filter, and the encoder.

use serde::{Deserialize, Serialize};

/// 8-bit RGB color triple (no alpha).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// RGBA pixel buffer, row-major, 4 bytes per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Bytes per row (width * 4)
    pub stride: u32,
}

impl FrameBuffer {
    /// Create a fully transparent buffer.
    pub fn new(width: u32, height: u32) -> Self {
        let stride = width * 4;
        Self {
            data: vec![0u8; (stride * height) as usize],
            width,
            height,
            stride,
        }
    }

    /// Create a frame filled with an opaque solid color.
    pub fn solid(width: u32, height: u32, color: Rgb) -> Self {
        let stride = width * 4;
        let mut data = vec![0u8; (stride * height) as usize];
        for pixel in data.chunks_exact_mut(4) {
            pixel[0] = color.r;
            pixel[1] = color.g;
            pixel[2] = color.b;
            pixel[3] = 255;
        }
        Self { data, width, height, stride }
    }

    /// Get pixel at (x, y) as [R, G, B, A]
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = (y * self.stride + x * 4) as usize;
        if offset + 3 < self.data.len() {
            [
                self.data[offset],
                self.data[offset + 1],
                self.data[offset + 2],
                self.data[offset + 3],
            ]
        } else {
            [0, 0, 0, 0]
        }
    }

    /// Set pixel at (x, y) from [R, G, B, A]
    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, pixel: [u8; 4]) {
        let offset = (y * self.stride + x * 4) as usize;
        if offset + 3 < self.data.len() {
            self.data[offset] = pixel[0];
            self.data[offset + 1] = pixel[1];
            self.data[offset + 2] = pixel[2];
            self.data[offset + 3] = pixel[3];
        }
    }

    /// Alpha-composite `src` pixel over `dst` pixel (straight alpha)
    #[inline]
    pub fn composite_over(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
        let sa = src[3] as u32;
        let inv_sa = 255 - sa;
        [
            ((src[0] as u32 * sa + dst[0] as u32 * inv_sa) / 255) as u8,
            ((src[1] as u32 * sa + dst[1] as u32 * inv_sa) / 255) as u8,
            ((src[2] as u32 * sa + dst[2] as u32 * inv_sa) / 255) as u8,
            (sa + dst[3] as u32 * inv_sa / 255).min(255) as u8,
        ]
    }

    /// Fill the whole buffer with an opaque solid color.
    pub fn fill(&mut self, color: Rgb) {
        for pixel in self.data.chunks_exact_mut(4) {
            pixel[0] = color.r;
            pixel[1] = color.g;
            pixel[2] = color.b;
            pixel[3] = 255;
        }
    }

    /// Draw `src` alpha-composited into this buffer, scaled to the destination
    /// rectangle with nearest-neighbor sampling. The rectangle may extend
    /// outside the buffer; off-buffer pixels are skipped. Degenerate rectangles
    /// (zero or negative extent) draw nothing.
    pub fn draw_scaled(&mut self, src: &FrameBuffer, x: i32, y: i32, width: i32, height: i32) {
        if width <= 0 || height <= 0 || src.width == 0 || src.height == 0 {
            return;
        }

        let x_min = x.max(0);
        let y_min = y.max(0);
        let x_max = (x + width).min(self.width as i32);
        let y_max = (y + height).min(self.height as i32);

        for dy in y_min..y_max {
            // Source row for this destination row
            let sy = ((dy - y) as i64 * src.height as i64 / height as i64)
                .clamp(0, src.height as i64 - 1) as u32;
            for dx in x_min..x_max {
                let sx = ((dx - x) as i64 * src.width as i64 / width as i64)
                    .clamp(0, src.width as i64 - 1) as u32;
                let s = src.get_pixel(sx, sy);
                if s[3] == 0 {
                    continue;
                }
                let d = self.get_pixel(dx as u32, dy as u32);
                self.set_pixel(dx as u32, dy as u32, Self::composite_over(d, s));
            }
        }
    }

    /// Draw `src` stretched to cover this entire buffer.
    pub fn draw_stretched(&mut self, src: &FrameBuffer) {
        let (w, h) = (self.width as i32, self.height as i32);
        self.draw_scaled(src, 0, 0, w, h);
    }
}
