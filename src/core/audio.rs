//! Audio graph construction for recording: route each source's audio into a
//! combined sink without emitting it to speakers. A source that cannot be
//! connected is skipped; recording proceeds video-only for that source.

use uuid::Uuid;

use super::source::{LayerKind, LayerSource};

/// Audio routing error types
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("Audio connect failed: {0}")]
    ConnectFailed(String),
    #[error("Audio graph closed")]
    GraphClosed,
}

/// Identifier of the combined sink's output track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTrack(pub Uuid);

/// Audio processing graph abstraction. The host backs this with its real audio
/// stack; the crate ships [`MixerGraph`] as the default in-process graph.
pub trait AudioGraph {
    /// Try to route one source's audio into the sink. Fails for sources whose
    /// audio is not decodable yet; the caller skips those.
    fn connect_source(&mut self, source: &LayerSource) -> Result<(), AudioError>;

    /// Number of successfully connected sources.
    fn connected_count(&self) -> usize;

    /// The combined sink track to add to the output stream.
    fn sink_track(&self) -> AudioTrack;

    /// Release all graph nodes. Further connects fail.
    fn close(&mut self);
}

/// In-process mixing graph: a sink node plus one connection per routed source.
pub struct MixerGraph {
    sink: AudioTrack,
    connections: Vec<Uuid>,
    closed: bool,
}

impl Default for MixerGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl MixerGraph {
    pub fn new() -> Self {
        Self {
            sink: AudioTrack(Uuid::new_v4()),
            connections: Vec::new(),
            closed: false,
        }
    }
}

impl AudioGraph for MixerGraph {
    fn connect_source(&mut self, source: &LayerSource) -> Result<(), AudioError> {
        if self.closed {
            return Err(AudioError::GraphClosed);
        }
        if source.kind != LayerKind::Video {
            return Err(AudioError::ConnectFailed("source carries no audio".into()));
        }
        if !source.handle().audio_ready() {
            return Err(AudioError::ConnectFailed(format!(
                "audio not decodable yet for {}",
                source.resource_url()
            )));
        }
        self.connections.push(Uuid::new_v4());
        Ok(())
    }

    fn connected_count(&self) -> usize {
        self.connections.len()
    }

    fn sink_track(&self) -> AudioTrack {
        self.sink
    }

    fn close(&mut self) {
        self.connections.clear();
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::FrameBuffer;
    use crate::core::source::{SourceFile, StillImageHandle, StubVideoHandle};

    fn video_source() -> LayerSource {
        LayerSource::new(
            &SourceFile::new("clip.mp4", "video/mp4"),
            Box::new(StubVideoHandle::new(FrameBuffer::new(2, 2))),
        )
        .unwrap()
    }

    #[test]
    fn test_connect_ready_video_source() {
        let mut graph = MixerGraph::new();
        graph.connect_source(&video_source()).unwrap();
        assert_eq!(graph.connected_count(), 1);
    }

    #[test]
    fn test_unready_audio_is_refused() {
        let source = LayerSource::new(
            &SourceFile::new("clip.mp4", "video/mp4"),
            Box::new(StubVideoHandle::new(FrameBuffer::new(2, 2)).without_audio()),
        )
        .unwrap();
        let mut graph = MixerGraph::new();
        assert!(matches!(
            graph.connect_source(&source),
            Err(AudioError::ConnectFailed(_))
        ));
        assert_eq!(graph.connected_count(), 0);
    }

    #[test]
    fn test_image_source_has_no_audio() {
        let source = LayerSource::new(
            &SourceFile::new("a.png", "image/png"),
            Box::new(StillImageHandle::new(FrameBuffer::new(2, 2))),
        )
        .unwrap();
        let mut graph = MixerGraph::new();
        assert!(graph.connect_source(&source).is_err());
    }

    #[test]
    fn test_closed_graph_refuses_connects() {
        let mut graph = MixerGraph::new();
        graph.close();
        assert!(matches!(
            graph.connect_source(&video_source()),
            Err(AudioError::GraphClosed)
        ));
        assert_eq!(graph.connected_count(), 0);
    }
}
