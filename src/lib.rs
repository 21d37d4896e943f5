pub mod core;

use base64::Engine;

use crate::core::chroma::ChromaKeySettings;
use crate::core::frame::Rgb;
use crate::core::geometry::{
    offset_to_percent, percent_to_offset, SurfaceSize, Transform, TransformUpdate,
};
use crate::core::pointer::{PointerController, PointerEvent, PointerResponse, SurfaceMetrics};
use crate::core::recorder::{DeliveredArtifact, RecordError, RecordingPipeline};
use crate::core::render::{RenderLoop, TickOutcome};
use crate::core::source::{LayerSource, MediaHandle, SourceError, SourceFile};
use crate::core::surface::{PixelSurface, RenderSurface, SurfaceError};

/// Surface size used until a background with known dimensions is loaded.
pub const DEFAULT_SURFACE_SIZE: SurfaceSize = SurfaceSize {
    width: 1280,
    height: 720,
};

/// Session error types
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("Recording error: {0}")]
    Record(#[from] RecordError),
    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceError),
    #[error("No foreground placed")]
    NoForeground,
}

/// Preview frame returned to the host for display.
/// Contains base64-encoded RGBA pixel data and dimensions.
#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameData {
    pub width: u32,
    pub height: u32,
    /// Base64-encoded RGBA pixel data (width * height * 4 bytes)
    pub rgba_base64: String,
}

/// One compositing session: two layers, their placement and keying settings,
/// the render loop, and at most one recording at a time.
///
/// The host owns the event sources (file pickers, pointer listeners, the
/// frame scheduler) and forwards everything here.
pub struct CompositorSession {
    surface: PixelSurface,
    surface_size: SurfaceSize,
    background: Option<LayerSource>,
    foreground: Option<LayerSource>,
    transform: Option<Transform>,
    chroma: ChromaKeySettings,
    pointer: PointerController,
    render_loop: RenderLoop,
    recording: RecordingPipeline,
}

impl CompositorSession {
    pub fn new() -> Self {
        Self::with_pipeline(RecordingPipeline::new())
    }

    pub fn with_pipeline(recording: RecordingPipeline) -> Self {
        Self {
            surface: PixelSurface::new(DEFAULT_SURFACE_SIZE),
            surface_size: DEFAULT_SURFACE_SIZE,
            background: None,
            foreground: None,
            transform: None,
            chroma: ChromaKeySettings::default(),
            pointer: PointerController::new(),
            render_loop: RenderLoop::new(),
            recording,
        }
    }

    pub fn surface_size(&self) -> SurfaceSize {
        self.surface_size
    }

    pub fn transform(&self) -> Option<Transform> {
        self.transform
    }

    pub fn chroma(&self) -> ChromaKeySettings {
        self.chroma
    }

    pub fn pointer(&self) -> &PointerController {
        &self.pointer
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_recording()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.render_loop.frames_drawn()
    }

    /// Load the background layer. The surface takes the background's intrinsic
    /// dimensions and any placed foreground re-centers against them. A rejected
    /// file leaves all state untouched.
    pub fn load_background(
        &mut self,
        file: &SourceFile,
        handle: Box<dyn MediaHandle>,
    ) -> Result<(), SessionError> {
        let source = LayerSource::new(file, handle)?;
        if let Some(mut old) = self.background.replace(source) {
            let _ = old.release();
        }

        // A background with the same dimensions keeps the user's placement;
        // only a dimension change resizes the surface and re-centers
        let size = self
            .background
            .as_ref()
            .and_then(|bg| bg.intrinsic_size())
            .filter(|s| !s.is_zero())
            .unwrap_or(DEFAULT_SURFACE_SIZE);
        if size != self.surface_size {
            self.surface_size = size;
            self.surface.set_size(size);
            self.reset_placement();
        }
        log::info!("Background loaded: {file:?}");
        Ok(())
    }

    /// Load the foreground layer and place it at the initial transform.
    pub fn load_foreground(
        &mut self,
        file: &SourceFile,
        handle: Box<dyn MediaHandle>,
    ) -> Result<(), SessionError> {
        let source = LayerSource::new(file, handle)?;
        if let Some(mut old) = self.foreground.replace(source) {
            let _ = old.release();
        }
        self.reset_placement();
        log::info!("Foreground loaded: {file:?}");
        Ok(())
    }

    /// Place the foreground at its initial transform for the current surface.
    fn reset_placement(&mut self) {
        self.transform = self
            .foreground
            .as_ref()
            .and_then(|fg| fg.aspect_ratio())
            .map(|aspect| Transform::initial(self.surface_size, aspect));
    }

    pub fn set_chroma_color(&mut self, color: Rgb) {
        // Whole-value replacement; the next tick reads the new settings
        self.chroma = ChromaKeySettings {
            color,
            tolerance: self.chroma.tolerance,
        };
    }

    pub fn set_chroma_tolerance(&mut self, tolerance: f64) {
        self.chroma = ChromaKeySettings {
            color: self.chroma.color,
            tolerance,
        };
    }

    /// Apply a transform update against the current foreground aspect ratio.
    fn apply_transform_update(&mut self, update: &TransformUpdate) {
        let Some(current) = self.transform else {
            return;
        };
        let aspect = self
            .foreground
            .as_ref()
            .and_then(|fg| fg.aspect_ratio())
            .unwrap_or_else(|| {
                if current.height != 0 {
                    current.width as f64 / current.height as f64
                } else {
                    1.0
                }
            });
        self.transform = Some(current.apply(update, self.surface_size, aspect));
    }

    /// Set the foreground size percentage (100 = half the surface width).
    pub fn set_size_percent(&mut self, size: f64) -> Result<(), SessionError> {
        if self.transform.is_none() {
            return Err(SessionError::NoForeground);
        }
        self.apply_transform_update(&TransformUpdate::size(size));
        Ok(())
    }

    /// Horizontal position as a 0-100 percentage of the movable range.
    pub fn x_percent(&self) -> Option<f64> {
        self.transform
            .map(|t| offset_to_percent(t.x, self.surface_size.width, t.width))
    }

    /// Vertical position as a 0-100 percentage of the movable range.
    pub fn y_percent(&self) -> Option<f64> {
        self.transform
            .map(|t| offset_to_percent(t.y, self.surface_size.height, t.height))
    }

    pub fn set_x_percent(&mut self, percent: f64) -> Result<(), SessionError> {
        let t = self.transform.ok_or(SessionError::NoForeground)?;
        let x = percent_to_offset(percent, self.surface_size.width, t.width);
        self.apply_transform_update(&TransformUpdate {
            x: Some(x),
            y: None,
            size: None,
        });
        Ok(())
    }

    pub fn set_y_percent(&mut self, percent: f64) -> Result<(), SessionError> {
        let t = self.transform.ok_or(SessionError::NoForeground)?;
        let y = percent_to_offset(percent, self.surface_size.height, t.height);
        self.apply_transform_update(&TransformUpdate {
            x: None,
            y: Some(y),
            size: None,
        });
        Ok(())
    }

    /// Feed one pointer event. Transform updates produced by a drag are
    /// applied before returning.
    pub fn pointer_event(&mut self, event: PointerEvent, metrics: &SurfaceMetrics) -> PointerResponse {
        let response = self.pointer.handle(event, metrics, self.transform.as_ref());
        if let Some(update) = response.update {
            self.apply_transform_update(&update);
        }
        response
    }

    /// Pointer event with an identity surface mapping (rendered size equals
    /// backing size).
    pub fn pointer_event_identity(&mut self, event: PointerEvent) -> PointerResponse {
        let metrics = SurfaceMetrics::identity(self.surface_size);
        self.pointer_event(event, &metrics)
    }

    /// Compose one frame. While recording, the composited surface is read
    /// back and fed to the encoder.
    pub fn tick(&mut self) -> Result<TickOutcome, SessionError> {
        let recording = self.recording.is_recording();
        let outcome = self.render_loop.tick(
            &mut self.surface,
            self.background.as_mut(),
            self.foreground.as_mut(),
            self.transform.as_ref(),
            &self.chroma,
            recording,
        );
        if outcome == TickOutcome::Rescheduled && recording {
            let frame = self.surface.read_back()?;
            self.recording.push_frame(&frame)?;
        }
        Ok(outcome)
    }

    pub fn start_recording(&mut self) -> Result<(), SessionError> {
        let mut sources: Vec<&mut LayerSource> = self
            .background
            .iter_mut()
            .chain(self.foreground.iter_mut())
            .collect();
        self.recording.start(self.surface_size, &mut sources)?;
        Ok(())
    }

    pub fn stop_recording(&mut self) -> Result<DeliveredArtifact, SessionError> {
        let mut sources: Vec<&mut LayerSource> = self
            .background
            .iter_mut()
            .chain(self.foreground.iter_mut())
            .collect();
        Ok(self.recording.stop(&mut sources)?)
    }

    /// Read the current surface back as base64 RGBA for host-side display.
    pub fn preview_frame_base64(&self) -> Result<FrameData, SessionError> {
        let frame = self.surface.read_back()?;
        let rgba_base64 = base64::engine::general_purpose::STANDARD.encode(&frame.data);
        Ok(FrameData {
            width: frame.width,
            height: frame.height,
            rgba_base64,
        })
    }

    /// End the session: stop any recording, cancel the loop, drop the drag
    /// state, and release both layers' resources.
    pub fn teardown(&mut self) {
        if self.recording.is_recording() {
            match self.stop_recording() {
                Ok(artifact) => log::info!("Recording flushed on teardown: {}", artifact.file_name),
                Err(e) => log::warn!("Recording could not be flushed on teardown: {e}"),
            }
        }
        self.render_loop.cancel_token().cancel();
        self.pointer.reset();
        if let Some(mut bg) = self.background.take() {
            let _ = bg.release();
        }
        if let Some(mut fg) = self.foreground.take() {
            let _ = fg.release();
        }
        self.transform = None;
        log::info!("Session torn down");
    }
}

impl Default for CompositorSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::encoder::StubEncoder;
    use crate::core::frame::FrameBuffer;
    use crate::core::pointer::PointerPos;
    use crate::core::recorder::MemorySink;
    use crate::core::source::{StillImageHandle, StubVideoHandle};

    fn test_session() -> CompositorSession {
        CompositorSession::with_pipeline(RecordingPipeline::with_parts(
            Box::new(StubEncoder::new()),
            Box::new(MemorySink::default()),
        ))
    }

    fn load_layers(session: &mut CompositorSession) {
        session
            .load_background(
                &SourceFile::new("bg.png", "image/png"),
                Box::new(StillImageHandle::new(FrameBuffer::solid(
                    800,
                    600,
                    Rgb::new(0, 0, 255),
                ))),
            )
            .unwrap();
        session
            .load_foreground(
                &SourceFile::new("fg.png", "image/png"),
                Box::new(StillImageHandle::new(FrameBuffer::solid(
                    400,
                    400,
                    Rgb::new(0, 255, 0),
                ))),
            )
            .unwrap();
    }

    #[test]
    fn test_load_layers_derives_surface_and_transform() {
        let mut session = test_session();
        load_layers(&mut session);

        assert_eq!(session.surface_size(), SurfaceSize::new(800, 600));
        let t = session.transform().unwrap();
        assert_eq!(t.x, 200);
        assert_eq!(t.width, 400);
        assert_eq!(t.height, 400);
        assert_eq!(t.size, 100.0);
        assert!((t.y - (600 - t.height) / 2).abs() <= 1);
    }

    #[test]
    fn test_unsupported_file_leaves_state_untouched() {
        let mut session = test_session();
        load_layers(&mut session);
        let before = session.transform();

        let result = session.load_foreground(
            &SourceFile::new("doc.pdf", "application/pdf"),
            Box::new(StillImageHandle::new(FrameBuffer::new(2, 2))),
        );
        assert!(matches!(result, Err(SessionError::Source(_))));
        assert_eq!(session.transform(), before);
    }

    #[test]
    fn test_same_size_background_swap_keeps_placement() {
        let mut session = test_session();
        load_layers(&mut session);
        session.set_x_percent(25.0).unwrap();
        let placed = session.transform().unwrap();

        // Swapping in a background with identical dimensions keeps placement
        session
            .load_background(
                &SourceFile::new("bg2.png", "image/png"),
                Box::new(StillImageHandle::new(FrameBuffer::solid(
                    800,
                    600,
                    Rgb::new(255, 0, 0),
                ))),
            )
            .unwrap();
        assert_eq!(session.transform().unwrap(), placed);

        // A dimension change resizes the surface and re-centers
        session
            .load_background(
                &SourceFile::new("bg3.png", "image/png"),
                Box::new(StillImageHandle::new(FrameBuffer::solid(
                    1000,
                    600,
                    Rgb::new(255, 0, 0),
                ))),
            )
            .unwrap();
        assert_eq!(session.surface_size(), SurfaceSize::new(1000, 600));
        let recentered = session.transform().unwrap();
        assert_eq!(recentered.width, 500);
        assert_eq!(recentered.x, 250);
    }

    #[test]
    fn test_pointer_drag_moves_foreground() {
        let mut session = test_session();
        load_layers(&mut session);
        let start = session.transform().unwrap();

        session.pointer_event_identity(PointerEvent::Down(PointerPos::new(
            start.x as f64 + 10.0,
            start.y as f64 + 10.0,
        )));
        session.pointer_event_identity(PointerEvent::Move(PointerPos::new(
            start.x as f64 + 40.0,
            start.y as f64 + 25.0,
        )));
        session.pointer_event_identity(PointerEvent::Up);

        let t = session.transform().unwrap();
        assert_eq!(t.x, start.x + 30);
        assert_eq!(t.y, start.y + 15);
        assert_eq!(t.width, start.width);
    }

    #[test]
    fn test_size_percent_rescales_keeping_position() {
        let mut session = test_session();
        load_layers(&mut session);
        let before = session.transform().unwrap();

        session.set_size_percent(50.0).unwrap();
        let t = session.transform().unwrap();
        assert_eq!(t.width, 200);
        assert_eq!(t.height, 200);
        assert_eq!(t.x, before.x);
        assert_eq!(t.y, before.y);
    }

    #[test]
    fn test_position_percent_round_trip() {
        let mut session = test_session();
        load_layers(&mut session);

        session.set_x_percent(25.0).unwrap();
        let t = session.transform().unwrap();
        // movable range = 800 - 400 = 400
        assert_eq!(t.x, 100);
        assert!((session.x_percent().unwrap() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_percent_setters_without_foreground_error() {
        let mut session = test_session();
        assert!(matches!(
            session.set_size_percent(50.0),
            Err(SessionError::NoForeground)
        ));
        assert!(session.x_percent().is_none());
    }

    #[test]
    fn test_tick_composites_keyed_foreground() {
        let mut session = test_session();
        load_layers(&mut session);

        // Foreground is solid key-green; it keys out entirely
        session.tick().unwrap();
        let preview = session.preview_frame_base64().unwrap();
        assert_eq!(preview.width, 800);
        assert_eq!(preview.height, 600);

        let rgba = base64::engine::general_purpose::STANDARD
            .decode(preview.rgba_base64)
            .unwrap();
        assert_eq!(rgba.len(), 800 * 600 * 4);
        // Center pixel shows the blue background through the keyed foreground
        let center = (300 * 800 + 400) * 4;
        assert_eq!(&rgba[center..center + 4], &[0, 0, 255, 255]);
    }

    #[test]
    fn test_record_session_delivers_artifact() {
        let mut session = test_session();
        session
            .load_background(
                &SourceFile::new("bg.png", "image/png"),
                Box::new(StillImageHandle::new(FrameBuffer::solid(
                    64,
                    48,
                    Rgb::new(1, 2, 3),
                ))),
            )
            .unwrap();
        session
            .load_foreground(
                &SourceFile::new("fg.mp4", "video/mp4"),
                Box::new(StubVideoHandle::new(FrameBuffer::solid(
                    32,
                    32,
                    Rgb::new(9, 9, 9),
                ))),
            )
            .unwrap();

        session.start_recording().unwrap();
        assert!(session.is_recording());
        session.tick().unwrap();
        session.tick().unwrap();

        let artifact = session.stop_recording().unwrap();
        assert!(!session.is_recording());
        assert!(artifact.byte_count > 0);
        assert!(artifact.file_name.starts_with("composite."));
    }

    #[test]
    fn test_teardown_stops_loop_and_releases_layers() {
        let mut session = test_session();
        load_layers(&mut session);
        session.tick().unwrap();
        let drawn = session.frames_drawn();

        session.teardown();
        assert!(session.transform().is_none());

        // Cancelled loop draws no further frames
        assert_eq!(session.tick().unwrap(), TickOutcome::Stopped);
        assert_eq!(session.frames_drawn(), drawn);
    }
}
