//! Output surface abstraction: the visible draw target plus the off-surface
//! buffer the chroma filter reads pixels back from. Readback is the one
//! fallible operation (hosts may refuse it for tainted cross-origin content).

use super::frame::{FrameBuffer, Rgb};
use super::geometry::SurfaceSize;

/// Surface error types
#[derive(Debug, thiserror::Error)]
pub enum SurfaceError {
    #[error("Pixel readback refused: {0}")]
    PixelReadback(String),
}

/// Draw target contract shared by the visible surface and off-surface buffers.
pub trait RenderSurface {
    fn size(&self) -> SurfaceSize;

    /// Resize the backing store. Resizing clears the content, so callers only
    /// invoke this on an actual size change.
    fn set_size(&mut self, size: SurfaceSize);

    /// Fill the whole surface with an opaque color.
    fn fill(&mut self, color: Rgb);

    /// Draw a frame alpha-composited into the given rectangle, scaling from
    /// the frame's resolution to the rectangle extent.
    fn draw_frame(&mut self, frame: &FrameBuffer, x: i32, y: i32, width: i32, height: i32);

    /// Draw a frame stretched to cover the entire surface.
    fn draw_stretched(&mut self, frame: &FrameBuffer) {
        let size = self.size();
        self.draw_frame(frame, 0, 0, size.width as i32, size.height as i32);
    }

    /// Read the surface pixels back as a frame.
    fn read_back(&self) -> Result<FrameBuffer, SurfaceError>;
}

/// In-memory surface backed by a [`FrameBuffer`].
pub struct PixelSurface {
    frame: FrameBuffer,
    tainted: bool,
}

impl PixelSurface {
    pub fn new(size: SurfaceSize) -> Self {
        Self {
            frame: FrameBuffer::new(size.width, size.height),
            tainted: false,
        }
    }

    /// Mark the surface as unreadable, mirroring a host's cross-origin taint.
    pub fn set_tainted(&mut self, tainted: bool) {
        self.tainted = tainted;
    }
}

impl RenderSurface for PixelSurface {
    fn size(&self) -> SurfaceSize {
        SurfaceSize::new(self.frame.width, self.frame.height)
    }

    fn set_size(&mut self, size: SurfaceSize) {
        self.frame = FrameBuffer::new(size.width, size.height);
    }

    fn fill(&mut self, color: Rgb) {
        self.frame.fill(color);
    }

    fn draw_frame(&mut self, frame: &FrameBuffer, x: i32, y: i32, width: i32, height: i32) {
        self.frame.draw_scaled(frame, x, y, width, height);
    }

    fn read_back(&self) -> Result<FrameBuffer, SurfaceError> {
        if self.tainted {
            return Err(SurfaceError::PixelReadback("surface is tainted".into()));
        }
        Ok(self.frame.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_size_clears_content() {
        let mut s = PixelSurface::new(SurfaceSize::new(2, 2));
        s.fill(Rgb::new(7, 7, 7));
        s.set_size(SurfaceSize::new(3, 3));
        assert_eq!(s.size(), SurfaceSize::new(3, 3));
        assert_eq!(s.read_back().unwrap().get_pixel(0, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn test_read_back_roundtrip() {
        let mut s = PixelSurface::new(SurfaceSize::new(2, 2));
        s.fill(Rgb::new(1, 2, 3));
        let frame = s.read_back().unwrap();
        assert_eq!(frame.get_pixel(1, 1), [1, 2, 3, 255]);
    }

    #[test]
    fn test_tainted_surface_refuses_readback() {
        let mut s = PixelSurface::new(SurfaceSize::new(2, 2));
        s.set_tainted(true);
        match s.read_back() {
            Err(SurfaceError::PixelReadback(_)) => {}
            other => panic!("Expected PixelReadback, got {:?}", other.map(|_| ())),
        }
        s.set_tainted(false);
        assert!(s.read_back().is_ok());
    }
}
