//! Recording pipeline: capture the composited surface into a container file
//! with routed source audio, and deliver the artifact on stop.
//! State machine: Idle → Recording → Idle
//!
//! Chunks from the encoder are buffered in arrival order and concatenated
//! into one artifact when recording stops.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::audio::{AudioGraph, MixerGraph};
use super::encoder::{
    candidate_containers, create_encoder, ContainerFormat, PlatformFamily, StreamEncoder,
};
use super::frame::FrameBuffer;
use super::geometry::SurfaceSize;
use super::source::{LayerKind, LayerSource};

/// Recording capture rate in frames per second.
pub const RECORDING_FRAME_RATE: u32 = 30;

/// Base name of the delivered artifact; the container extension is appended.
pub const ARTIFACT_BASENAME: &str = "composite";

/// Recording session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordingState {
    Idle,
    Recording,
}

/// Recording pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Invalid state transition: cannot {action} while {state:?}")]
    InvalidState { state: RecordingState, action: String },
    #[error("No supported container format on this platform")]
    NoSupportedContainer,
    #[error("Surface has zero size")]
    EmptySurface,
    #[error("Encoder error: {0}")]
    Encoder(#[from] super::encoder::EncoderError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A finished recording delivered through the sink.
#[derive(Debug, Clone)]
pub struct DeliveredArtifact {
    pub file_name: String,
    pub container: ContainerFormat,
    pub byte_count: usize,
    pub path: PathBuf,
}

/// Destination for finished recordings. The default sink writes into the
/// user's download directory; tests capture the bytes in memory.
pub trait ArtifactSink {
    fn deliver(&mut self, file_name: &str, data: &[u8]) -> Result<PathBuf, RecordError>;
}

/// Writes artifacts into the platform download directory.
pub struct DownloadDirSink;

impl ArtifactSink for DownloadDirSink {
    fn deliver(&mut self, file_name: &str, data: &[u8]) -> Result<PathBuf, RecordError> {
        let dir = dirs::download_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(file_name);
        std::fs::write(&path, data)?;
        log::info!("Delivered {} ({} bytes)", path.display(), data.len());
        Ok(path)
    }
}

/// Captures delivered artifacts in memory.
#[derive(Default)]
pub struct MemorySink {
    pub delivered: Vec<(String, Vec<u8>)>,
}

impl ArtifactSink for MemorySink {
    fn deliver(&mut self, file_name: &str, data: &[u8]) -> Result<PathBuf, RecordError> {
        self.delivered.push((file_name.to_string(), data.to_vec()));
        Ok(PathBuf::from(file_name))
    }
}

/// Per-recording state: chosen container, buffered chunks, the audio graph,
/// and which sources were unmuted for the session (re-muted at stop).
struct RecordingSession {
    container: ContainerFormat,
    chunks: Vec<Vec<u8>>,
    graph: MixerGraph,
    unmuted: Vec<usize>,
}

/// Orchestrates one recording at a time over the composited output.
pub struct RecordingPipeline {
    state: RecordingState,
    encoder: Box<dyn StreamEncoder>,
    sink: Box<dyn ArtifactSink>,
    session: Option<RecordingSession>,
}

impl RecordingPipeline {
    pub fn new() -> Self {
        Self::with_parts(create_encoder(), Box::new(DownloadDirSink))
    }

    pub fn with_parts(encoder: Box<dyn StreamEncoder>, sink: Box<dyn ArtifactSink>) -> Self {
        Self {
            state: RecordingState::Idle,
            encoder,
            sink,
            session: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }

    pub fn frames_encoded(&self) -> u64 {
        self.encoder.frames_encoded()
    }

    /// Container chosen for the running session, if any.
    pub fn container(&self) -> Option<ContainerFormat> {
        self.session.as_ref().map(|s| s.container)
    }

    /// Start recording the surface. Video sources are unmuted and routed into
    /// the audio graph (sources whose audio cannot connect are skipped with a
    /// warning), rewound, set to loop, and started.
    pub fn start(
        &mut self,
        surface_size: SurfaceSize,
        sources: &mut [&mut LayerSource],
    ) -> Result<(), RecordError> {
        if self.state != RecordingState::Idle {
            return Err(RecordError::InvalidState {
                state: self.state,
                action: "start".into(),
            });
        }
        if surface_size.is_zero() {
            return Err(RecordError::EmptySurface);
        }

        // Pick the first container this backend can actually produce
        let container = candidate_containers(PlatformFamily::detect())
            .into_iter()
            .find(|c| self.encoder.supports(*c))
            .ok_or(RecordError::NoSupportedContainer)?;

        // Route audio: unmute each video source so its audio reaches the
        // graph; a connect failure re-mutes that source and skips it
        let mut graph = MixerGraph::new();
        let mut unmuted = Vec::new();
        for (i, source) in sources.iter_mut().enumerate() {
            if source.kind != LayerKind::Video {
                continue;
            }
            let was_muted = source.handle().is_muted();
            source.handle_mut().set_muted(false);
            match graph.connect_source(source) {
                Ok(()) => {
                    if was_muted {
                        unmuted.push(i);
                    }
                }
                Err(e) => {
                    log::warn!("Skipping audio for {}: {e}", source.resource_url());
                    if was_muted {
                        source.handle_mut().set_muted(true);
                    }
                }
            }
        }
        log::info!(
            "Recording audio graph: {} of {} sources connected",
            graph.connected_count(),
            sources.len()
        );

        // Start the encoder before touching playback, so an aborted start
        // only has mute state to undo
        if let Err(e) = self.encoder.start(
            container,
            surface_size.width,
            surface_size.height,
            RECORDING_FRAME_RATE,
        ) {
            for &i in &unmuted {
                if let Some(source) = sources.get_mut(i) {
                    source.handle_mut().set_muted(true);
                }
            }
            graph.close();
            return Err(e.into());
        }

        // Restart playback from the top so the artifact begins at frame zero
        for source in sources.iter_mut() {
            if source.kind == LayerKind::Video {
                let handle = source.handle_mut();
                handle.seek_start();
                handle.set_looping(true);
                handle.play();
            }
        }

        self.session = Some(RecordingSession {
            container,
            chunks: Vec::new(),
            graph,
            unmuted,
        });
        self.state = RecordingState::Recording;

        log::info!(
            "Recording started: {}x{} @ {} fps, container {:?}",
            surface_size.width,
            surface_size.height,
            RECORDING_FRAME_RATE,
            container
        );
        Ok(())
    }

    /// Feed one composited frame to the encoder. An encoder failure here is
    /// fatal to the session: the session is torn down and the error returned.
    pub fn push_frame(&mut self, frame: &FrameBuffer) -> Result<(), RecordError> {
        let session = match self.session.as_mut() {
            Some(s) if self.state == RecordingState::Recording => s,
            _ => {
                return Err(RecordError::InvalidState {
                    state: self.state,
                    action: "push frame".into(),
                })
            }
        };

        match self.encoder.encode_frame(frame) {
            Ok(chunks) => {
                session.chunks.extend(chunks);
                Ok(())
            }
            Err(e) => {
                log::error!("Encoder failed mid-recording: {e}");
                if let Some(mut session) = self.session.take() {
                    session.graph.close();
                }
                let _ = self.encoder.finish();
                self.state = RecordingState::Idle;
                Err(e.into())
            }
        }
    }

    /// Stop recording, deliver the artifact, and restore source mute state.
    /// `sources` must be the same slice (same order) passed to [`start`].
    ///
    /// [`start`]: RecordingPipeline::start
    pub fn stop(
        &mut self,
        sources: &mut [&mut LayerSource],
    ) -> Result<DeliveredArtifact, RecordError> {
        if self.state != RecordingState::Recording {
            return Err(RecordError::InvalidState {
                state: self.state,
                action: "stop".into(),
            });
        }
        let mut session = self.session.take().ok_or(RecordError::InvalidState {
            state: self.state,
            action: "stop".into(),
        })?;
        self.state = RecordingState::Idle;

        let artifact = match self.encoder.finish() {
            Ok(final_chunks) => {
                session.chunks.extend(final_chunks);

                let total: usize = session.chunks.iter().map(Vec::len).sum();
                let mut data = Vec::with_capacity(total);
                for chunk in &session.chunks {
                    data.extend_from_slice(chunk);
                }

                let file_name =
                    format!("{ARTIFACT_BASENAME}.{}", session.container.extension());
                self.sink
                    .deliver(&file_name, &data)
                    .map(|path| DeliveredArtifact {
                        file_name,
                        container: session.container,
                        byte_count: data.len(),
                        path,
                    })
            }
            Err(e) => Err(e.into()),
        };

        // Mute restoration and graph release happen even when finalize or
        // delivery failed
        for &i in &session.unmuted {
            if let Some(source) = sources.get_mut(i) {
                source.handle_mut().set_muted(true);
            }
        }
        session.graph.close();

        match &artifact {
            Ok(a) => log::info!(
                "Recording stopped: {} frames, {} bytes -> {}",
                self.encoder.frames_encoded(),
                a.byte_count,
                a.path.display()
            ),
            Err(e) => log::warn!("Recording stop failed after cleanup: {e}"),
        }
        artifact
    }
}

impl Default for RecordingPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::encoder::{EncoderError, StreamEncoder, StubEncoder};
    use crate::core::source::{SourceFile, StubVideoHandle};

    /// Stub wrapper that fails at a chosen lifecycle step.
    struct FlakyEncoder {
        inner: StubEncoder,
        fail_start: bool,
        fail_finish: bool,
    }

    impl FlakyEncoder {
        fn failing_start() -> Self {
            Self { inner: StubEncoder::new(), fail_start: true, fail_finish: false }
        }

        fn failing_finish() -> Self {
            Self { inner: StubEncoder::new(), fail_start: false, fail_finish: true }
        }
    }

    impl StreamEncoder for FlakyEncoder {
        fn supports(&self, container: ContainerFormat) -> bool {
            self.inner.supports(container)
        }

        fn start(
            &mut self,
            container: ContainerFormat,
            width: u32,
            height: u32,
            frame_rate: u32,
        ) -> Result<(), EncoderError> {
            if self.fail_start {
                return Err(EncoderError::Backend("start refused".into()));
            }
            self.inner.start(container, width, height, frame_rate)
        }

        fn encode_frame(&mut self, frame: &FrameBuffer) -> Result<Vec<Vec<u8>>, EncoderError> {
            self.inner.encode_frame(frame)
        }

        fn finish(&mut self) -> Result<Vec<Vec<u8>>, EncoderError> {
            if self.fail_finish {
                return Err(EncoderError::Backend("finish refused".into()));
            }
            self.inner.finish()
        }

        fn is_encoding(&self) -> bool {
            self.inner.is_encoding()
        }

        fn frames_encoded(&self) -> u64 {
            self.inner.frames_encoded()
        }
    }

    fn video_source() -> LayerSource {
        LayerSource::new(
            &SourceFile::new("clip.mp4", "video/mp4"),
            Box::new(StubVideoHandle::new(FrameBuffer::new(4, 4))),
        )
        .unwrap()
    }

    fn pipeline() -> RecordingPipeline {
        RecordingPipeline::with_parts(Box::new(StubEncoder::new()), Box::new(MemorySink::default()))
    }

    #[test]
    fn test_record_and_deliver() {
        let mut p = pipeline();
        let mut fg = video_source();

        p.start(SurfaceSize::new(8, 8), &mut [&mut fg]).unwrap();
        assert!(p.is_recording());

        let frame = FrameBuffer::new(8, 8);
        p.push_frame(&frame).unwrap();
        p.push_frame(&frame).unwrap();

        let artifact = p.stop(&mut [&mut fg]).unwrap();
        assert_eq!(p.state(), RecordingState::Idle);
        assert!(artifact.byte_count > 0);
        assert!(artifact.file_name.starts_with("composite."));
    }

    #[test]
    fn test_container_matches_artifact_extension() {
        let mut p = pipeline();
        let mut fg = video_source();
        p.start(SurfaceSize::new(8, 8), &mut [&mut fg]).unwrap();
        let container = p.container().unwrap();
        let artifact = p.stop(&mut [&mut fg]).unwrap();
        assert_eq!(artifact.container, container);
        assert!(artifact.file_name.ends_with(container.extension()));
    }

    #[test]
    fn test_fallback_to_second_candidate() {
        // Backend only supports the second candidate in the probe order
        let order = candidate_containers(PlatformFamily::detect());
        let encoder = StubEncoder::with_supported(vec![order[1]]);
        let mut p = RecordingPipeline::with_parts(Box::new(encoder), Box::new(MemorySink::default()));

        let mut fg = video_source();
        p.start(SurfaceSize::new(8, 8), &mut [&mut fg]).unwrap();
        assert_eq!(p.container(), Some(order[1]));
    }

    #[test]
    fn test_no_supported_container() {
        let encoder = StubEncoder::with_supported(vec![]);
        let mut p = RecordingPipeline::with_parts(Box::new(encoder), Box::new(MemorySink::default()));
        let mut fg = video_source();
        assert!(matches!(
            p.start(SurfaceSize::new(8, 8), &mut [&mut fg]),
            Err(RecordError::NoSupportedContainer)
        ));
        assert_eq!(p.state(), RecordingState::Idle);
    }

    #[test]
    fn test_double_start_errors() {
        let mut p = pipeline();
        let mut fg = video_source();
        p.start(SurfaceSize::new(8, 8), &mut [&mut fg]).unwrap();
        assert!(matches!(
            p.start(SurfaceSize::new(8, 8), &mut [&mut fg]),
            Err(RecordError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_stop_when_idle_errors() {
        let mut p = pipeline();
        let mut fg = video_source();
        assert!(p.stop(&mut [&mut fg]).is_err());
    }

    #[test]
    fn test_zero_surface_refused() {
        let mut p = pipeline();
        let mut fg = video_source();
        assert!(matches!(
            p.start(SurfaceSize::new(0, 0), &mut [&mut fg]),
            Err(RecordError::EmptySurface)
        ));
    }

    #[test]
    fn test_sources_rewound_looped_and_playing() {
        let mut p = pipeline();
        let mut fg = video_source();

        p.start(SurfaceSize::new(8, 8), &mut [&mut fg]).unwrap();
        assert!(fg.handle().is_playing());
        assert!(!fg.handle().is_muted());

        p.stop(&mut [&mut fg]).unwrap();
        // Sources unmuted for the session are muted again afterwards
        assert!(fg.handle().is_muted());
    }

    #[test]
    fn test_aborted_start_restores_mute_and_playback_state() {
        let mut p = RecordingPipeline::with_parts(
            Box::new(FlakyEncoder::failing_start()),
            Box::new(MemorySink::default()),
        );
        let mut fg = video_source();
        assert!(fg.handle().is_muted());

        let result = p.start(SurfaceSize::new(8, 8), &mut [&mut fg]);
        assert!(matches!(result, Err(RecordError::Encoder(_))));
        assert_eq!(p.state(), RecordingState::Idle);

        // The source unmuted for routing is muted again and was never started
        assert!(fg.handle().is_muted());
        assert!(!fg.handle().is_playing());
    }

    #[test]
    fn test_failed_finish_still_remutes_sources() {
        let mut p = RecordingPipeline::with_parts(
            Box::new(FlakyEncoder::failing_finish()),
            Box::new(MemorySink::default()),
        );
        let mut fg = video_source();

        p.start(SurfaceSize::new(8, 8), &mut [&mut fg]).unwrap();
        assert!(!fg.handle().is_muted());
        p.push_frame(&FrameBuffer::new(8, 8)).unwrap();

        let result = p.stop(&mut [&mut fg]);
        assert!(matches!(result, Err(RecordError::Encoder(_))));
        assert_eq!(p.state(), RecordingState::Idle);
        assert!(fg.handle().is_muted());
    }

    #[test]
    fn test_audio_skip_does_not_block_recording() {
        let mut p = pipeline();
        let mut fg = LayerSource::new(
            &SourceFile::new("clip.mp4", "video/mp4"),
            Box::new(StubVideoHandle::new(FrameBuffer::new(4, 4)).without_audio()),
        )
        .unwrap();

        p.start(SurfaceSize::new(8, 8), &mut [&mut fg]).unwrap();
        assert!(p.is_recording());
        // Unroutable audio stays muted
        assert!(fg.handle().is_muted());
        p.stop(&mut [&mut fg]).unwrap();
    }
}
