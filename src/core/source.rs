//! Media layer sources: tagged image/video variants over a decoded media
//! handle, plus the object-URL-style resource discipline (acquired on load,
//! released exactly once on replacement or teardown).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::frame::FrameBuffer;
use super::geometry::SurfaceSize;

/// A user-selected file with its declared MIME type. Decoding happens in the
/// host; the crate only validates the type and tracks the decoded handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: String,
    pub mime: String,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>) -> Self {
        Self { name: name.into(), mime: mime.into() }
    }
}

/// Layer source error types
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("Source not loaded yet")]
    NotLoaded,
    #[error("Resource already released")]
    AlreadyReleased,
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Accepted upload types: `image/*` and `video/*` only.
pub fn is_accepted_mime(mime: &str) -> bool {
    mime.starts_with("image/") || mime.starts_with("video/")
}

/// Handle to ambient host state backing a source (object URL analog).
/// Released at most once; a second release is a defect and returns an error.
/// Dropping an unreleased handle releases it, covering session teardown.
#[derive(Debug)]
pub struct ResourceHandle {
    url: String,
    released: bool,
}

impl ResourceHandle {
    pub fn acquire(name: &str) -> Self {
        let url = format!("blob:keycast/{}#{name}", Uuid::new_v4());
        log::debug!("Acquired resource {url}");
        Self { url, released: false }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn release(&mut self) -> Result<(), SourceError> {
        if self.released {
            return Err(SourceError::AlreadyReleased);
        }
        self.released = true;
        log::debug!("Released resource {}", self.url);
        Ok(())
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            log::debug!("Released resource {} on drop", self.url);
        }
    }
}

/// Media kind tag; intrinsic-dimension and playback operations dispatch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LayerKind {
    Image,
    Video,
}

/// Decoded media element abstraction. The host wraps its decoder (or media
/// element) in this trait; the crate ships an image handle and a stub video
/// handle for development and tests.
pub trait MediaHandle {
    /// Decoded pixel dimensions; `None` until the media reports them.
    fn intrinsic_size(&self) -> Option<SurfaceSize>;

    /// Render the current frame at intrinsic resolution.
    fn current_frame(&self) -> Result<FrameBuffer, SourceError>;

    /// Whether playback is running. Images always report `true`.
    fn is_playing(&self) -> bool;

    fn play(&mut self);
    fn pause(&mut self);

    /// Seek back to the start position.
    fn seek_start(&mut self);

    fn set_looping(&mut self, looping: bool);

    fn set_muted(&mut self, muted: bool);
    fn is_muted(&self) -> bool;

    /// Whether the audio side is decodable enough to route into a graph.
    fn audio_ready(&self) -> bool;
}

/// One media layer: kind tag, decoded handle, and the backing resource.
pub struct LayerSource {
    pub kind: LayerKind,
    handle: Box<dyn MediaHandle>,
    resource: ResourceHandle,
}

impl LayerSource {
    /// Validate the file's MIME type and wrap the decoded handle.
    /// Rejected types produce no state change anywhere.
    pub fn new(file: &SourceFile, handle: Box<dyn MediaHandle>) -> Result<Self, SourceError> {
        let kind = if file.mime.starts_with("image/") {
            LayerKind::Image
        } else if file.mime.starts_with("video/") {
            LayerKind::Video
        } else {
            return Err(SourceError::UnsupportedFileType(file.mime.clone()));
        };

        Ok(Self {
            kind,
            handle,
            resource: ResourceHandle::acquire(&file.name),
        })
    }

    pub fn intrinsic_size(&self) -> Option<SurfaceSize> {
        self.handle.intrinsic_size()
    }

    /// Intrinsic width/height ratio, once loaded with nonzero dimensions.
    pub fn aspect_ratio(&self) -> Option<f64> {
        let size = self.handle.intrinsic_size()?;
        if size.is_zero() {
            return None;
        }
        Some(size.width as f64 / size.height as f64)
    }

    pub fn is_loaded(&self) -> bool {
        self.handle
            .intrinsic_size()
            .map(|s| !s.is_zero())
            .unwrap_or(false)
    }

    pub fn current_frame(&self) -> Result<FrameBuffer, SourceError> {
        self.handle.current_frame()
    }

    pub fn resource_url(&self) -> &str {
        self.resource.url()
    }

    pub fn handle_mut(&mut self) -> &mut dyn MediaHandle {
        self.handle.as_mut()
    }

    pub fn handle(&self) -> &dyn MediaHandle {
        self.handle.as_ref()
    }

    /// Release the backing resource ahead of drop (replacement path).
    pub fn release(&mut self) -> Result<(), SourceError> {
        self.resource.release()
    }
}

/// Still image handle over a decoded RGBA frame.
pub struct StillImageHandle {
    frame: FrameBuffer,
}

impl StillImageHandle {
    pub fn new(frame: FrameBuffer) -> Self {
        Self { frame }
    }
}

impl MediaHandle for StillImageHandle {
    fn intrinsic_size(&self) -> Option<SurfaceSize> {
        Some(SurfaceSize::new(self.frame.width, self.frame.height))
    }

    fn current_frame(&self) -> Result<FrameBuffer, SourceError> {
        Ok(self.frame.clone())
    }

    fn is_playing(&self) -> bool {
        true
    }

    fn play(&mut self) {}
    fn pause(&mut self) {}
    fn seek_start(&mut self) {}
    fn set_looping(&mut self, _looping: bool) {}
    fn set_muted(&mut self, _muted: bool) {}

    fn is_muted(&self) -> bool {
        true
    }

    fn audio_ready(&self) -> bool {
        false
    }
}

/// Stub video handle for development/testing: a fixed frame plus play state.
pub struct StubVideoHandle {
    frame: FrameBuffer,
    playing: bool,
    muted: bool,
    looping: bool,
    position: f64,
    audio_ready: bool,
}

impl StubVideoHandle {
    pub fn new(frame: FrameBuffer) -> Self {
        Self {
            frame,
            playing: false,
            muted: true,
            looping: false,
            position: 0.0,
            audio_ready: true,
        }
    }

    /// Simulate a source whose audio cannot be routed yet.
    pub fn without_audio(mut self) -> Self {
        self.audio_ready = false;
        self
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    /// Advance the simulated playhead (tests only need a monotonic position).
    pub fn advance(&mut self, seconds: f64) {
        if self.playing {
            self.position += seconds;
        }
    }
}

impl MediaHandle for StubVideoHandle {
    fn intrinsic_size(&self) -> Option<SurfaceSize> {
        Some(SurfaceSize::new(self.frame.width, self.frame.height))
    }

    fn current_frame(&self) -> Result<FrameBuffer, SourceError> {
        Ok(self.frame.clone())
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn pause(&mut self) {
        self.playing = false;
    }

    fn seek_start(&mut self) {
        self.position = 0.0;
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    fn is_muted(&self) -> bool {
        self.muted
    }

    fn audio_ready(&self) -> bool {
        self.audio_ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::Rgb;

    #[test]
    fn test_accepted_mime_types() {
        assert!(is_accepted_mime("image/png"));
        assert!(is_accepted_mime("image/jpeg"));
        assert!(is_accepted_mime("video/mp4"));
        assert!(is_accepted_mime("video/webm"));
        assert!(!is_accepted_mime("application/pdf"));
        assert!(!is_accepted_mime("text/plain"));
        assert!(!is_accepted_mime("audio/mpeg"));
    }

    #[test]
    fn test_unsupported_mime_rejected() {
        let file = SourceFile::new("doc.pdf", "application/pdf");
        let handle = Box::new(StillImageHandle::new(FrameBuffer::new(2, 2)));
        match LayerSource::new(&file, handle) {
            Err(SourceError::UnsupportedFileType(mime)) => assert_eq!(mime, "application/pdf"),
            other => panic!("Expected UnsupportedFileType, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_kind_inferred_from_mime() {
        let img = LayerSource::new(
            &SourceFile::new("a.png", "image/png"),
            Box::new(StillImageHandle::new(FrameBuffer::new(2, 2))),
        )
        .unwrap();
        assert_eq!(img.kind, LayerKind::Image);

        let vid = LayerSource::new(
            &SourceFile::new("b.mp4", "video/mp4"),
            Box::new(StubVideoHandle::new(FrameBuffer::new(2, 2))),
        )
        .unwrap();
        assert_eq!(vid.kind, LayerKind::Video);
    }

    #[test]
    fn test_aspect_ratio() {
        let src = LayerSource::new(
            &SourceFile::new("a.png", "image/png"),
            Box::new(StillImageHandle::new(FrameBuffer::new(640, 480))),
        )
        .unwrap();
        assert!((src.aspect_ratio().unwrap() - 4.0 / 3.0).abs() < 1e-9);
        assert!(src.is_loaded());
    }

    #[test]
    fn test_zero_sized_source_not_loaded() {
        let src = LayerSource::new(
            &SourceFile::new("a.png", "image/png"),
            Box::new(StillImageHandle::new(FrameBuffer::new(0, 0))),
        )
        .unwrap();
        assert!(!src.is_loaded());
        assert!(src.aspect_ratio().is_none());
    }

    #[test]
    fn test_resource_released_at_most_once() {
        let mut handle = ResourceHandle::acquire("clip.mp4");
        assert!(!handle.is_released());
        handle.release().unwrap();
        assert!(handle.is_released());
        match handle.release() {
            Err(SourceError::AlreadyReleased) => {}
            other => panic!("Expected AlreadyReleased, got {other:?}"),
        }
    }

    #[test]
    fn test_resource_urls_are_unique() {
        let a = ResourceHandle::acquire("x");
        let b = ResourceHandle::acquire("x");
        assert_ne!(a.url(), b.url());
    }

    #[test]
    fn test_stub_video_playback_state() {
        let mut v = StubVideoHandle::new(FrameBuffer::solid(2, 2, Rgb::new(1, 2, 3)));
        assert!(!v.is_playing());
        v.play();
        v.advance(1.5);
        assert!((v.position() - 1.5).abs() < 1e-9);
        v.seek_start();
        assert_eq!(v.position(), 0.0);
        v.pause();
        assert!(!v.is_playing());
    }
}
