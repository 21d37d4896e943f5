//! Stream encoding abstraction for recording: container capability probing
//! plus a chunked encoder trait. The stub backend keeps development and tests
//! hermetic; the FFmpeg backend is available behind the `ffmpeg` feature.

use serde::{Deserialize, Serialize};

use super::frame::FrameBuffer;

/// Output container formats, in the order the pipeline probes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContainerFormat {
    Webm,
    Mp4,
}

impl ContainerFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Webm => "webm",
            ContainerFormat::Mp4 => "mp4",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            ContainerFormat::Webm => "video/webm",
            ContainerFormat::Mp4 => "video/mp4",
        }
    }
}

/// Platform family, used only to pick the container probe order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFamily {
    Apple,
    Generic,
}

impl PlatformFamily {
    pub fn detect() -> Self {
        if cfg!(any(target_os = "macos", target_os = "ios")) {
            PlatformFamily::Apple
        } else {
            PlatformFamily::Generic
        }
    }
}

/// Container candidates in preference order for a platform family. Apple
/// platforms prefer MP4; everything else prefers WebM.
pub fn candidate_containers(family: PlatformFamily) -> [ContainerFormat; 2] {
    match family {
        PlatformFamily::Apple => [ContainerFormat::Mp4, ContainerFormat::Webm],
        PlatformFamily::Generic => [ContainerFormat::Webm, ContainerFormat::Mp4],
    }
}

/// Encoder error types
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("Encoder already started")]
    AlreadyStarted,
    #[error("Encoder not started")]
    NotStarted,
    #[error("Unsupported container: {0:?}")]
    Unsupported(ContainerFormat),
    #[error("Encoder backend error: {0}")]
    Backend(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunked stream encoder. Chunks come back in arrival order; the recording
/// pipeline buffers them and concatenates at stop time.
pub trait StreamEncoder {
    /// Whether this backend can produce the given container.
    fn supports(&self, container: ContainerFormat) -> bool;

    fn start(
        &mut self,
        container: ContainerFormat,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> Result<(), EncoderError>;

    /// Encode one composited frame; returns any chunks ready so far.
    fn encode_frame(&mut self, frame: &FrameBuffer) -> Result<Vec<Vec<u8>>, EncoderError>;

    /// Flush and return the final chunks.
    fn finish(&mut self) -> Result<Vec<Vec<u8>>, EncoderError>;

    fn is_encoding(&self) -> bool;

    fn frames_encoded(&self) -> u64;
}

/// Stub encoder: records frame metadata as opaque chunks. Supports whatever
/// containers it is constructed with, which lets tests exercise the probe
/// fallback without a real codec.
pub struct StubEncoder {
    supported: Vec<ContainerFormat>,
    encoding: bool,
    frames: u64,
}

impl StubEncoder {
    pub fn new() -> Self {
        Self::with_supported(vec![ContainerFormat::Webm, ContainerFormat::Mp4])
    }

    pub fn with_supported(supported: Vec<ContainerFormat>) -> Self {
        Self {
            supported,
            encoding: false,
            frames: 0,
        }
    }
}

impl Default for StubEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamEncoder for StubEncoder {
    fn supports(&self, container: ContainerFormat) -> bool {
        self.supported.contains(&container)
    }

    fn start(
        &mut self,
        container: ContainerFormat,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> Result<(), EncoderError> {
        if self.encoding {
            return Err(EncoderError::AlreadyStarted);
        }
        if !self.supports(container) {
            return Err(EncoderError::Unsupported(container));
        }
        log::info!(
            "Stub encoder started: {}x{} @ {} fps, container {:?}",
            width,
            height,
            frame_rate,
            container
        );
        self.encoding = true;
        self.frames = 0;
        Ok(())
    }

    fn encode_frame(&mut self, frame: &FrameBuffer) -> Result<Vec<Vec<u8>>, EncoderError> {
        if !self.encoding {
            return Err(EncoderError::NotStarted);
        }
        let mut chunk = Vec::with_capacity(16);
        chunk.extend_from_slice(&self.frames.to_le_bytes());
        chunk.extend_from_slice(&(frame.data.len() as u64).to_le_bytes());
        self.frames += 1;
        Ok(vec![chunk])
    }

    fn finish(&mut self) -> Result<Vec<Vec<u8>>, EncoderError> {
        if !self.encoding {
            return Err(EncoderError::NotStarted);
        }
        self.encoding = false;
        log::info!("Stub encoder finished after {} frames", self.frames);
        Ok(Vec::new())
    }

    fn is_encoding(&self) -> bool {
        self.encoding
    }

    fn frames_encoded(&self) -> u64 {
        self.frames
    }
}

/// MP4/H.264 backend via the ffmpeg-next bindings. Output spools to a temp
/// file and comes back as a single chunk at finish time.
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg_encoder {
    use std::fs;
    use std::path::PathBuf;

    use ffmpeg_next as ffmpeg;
    use ffmpeg::codec;
    use ffmpeg::format;
    use ffmpeg::software::scaling;
    use ffmpeg::util::frame::video::Video as FfmpegFrame;
    use uuid::Uuid;

    use super::{ContainerFormat, EncoderError, StreamEncoder};
    use crate::core::frame::FrameBuffer;

    pub struct FfmpegEncoder {
        spool_path: Option<PathBuf>,
        output_ctx: Option<format::context::Output>,
        encoder: Option<codec::encoder::video::Encoder>,
        scaler: Option<scaling::Context>,
        stream_index: usize,
        time_base: ffmpeg::Rational,
        frame_count: u64,
    }

    impl FfmpegEncoder {
        pub fn new() -> Result<Self, EncoderError> {
            ffmpeg::init().map_err(|e| EncoderError::Backend(format!("FFmpeg init: {e}")))?;

            Ok(Self {
                spool_path: None,
                output_ctx: None,
                encoder: None,
                scaler: None,
                stream_index: 0,
                time_base: ffmpeg::Rational::new(1, 30),
                frame_count: 0,
            })
        }
    }

    impl StreamEncoder for FfmpegEncoder {
        fn supports(&self, container: ContainerFormat) -> bool {
            container == ContainerFormat::Mp4
        }

        fn start(
            &mut self,
            container: ContainerFormat,
            width: u32,
            height: u32,
            frame_rate: u32,
        ) -> Result<(), EncoderError> {
            if self.output_ctx.is_some() {
                return Err(EncoderError::AlreadyStarted);
            }
            if !self.supports(container) {
                return Err(EncoderError::Unsupported(container));
            }

            let spool = std::env::temp_dir().join(format!("keycast_spool_{}.mp4", Uuid::new_v4()));
            let mut output_ctx = format::output(&spool)
                .map_err(|e| EncoderError::Backend(format!("Open output: {e}")))?;

            let codec = codec::encoder::find(codec::Id::H264)
                .ok_or_else(|| EncoderError::Backend("H264 codec not found".into()))?;

            // Check global header flag before add_stream borrows output_ctx
            let needs_global_header =
                output_ctx.format().flags().contains(format::Flags::GLOBAL_HEADER);

            let mut stream = output_ctx
                .add_stream(codec)
                .map_err(|e| EncoderError::Backend(format!("Add stream: {e}")))?;
            self.stream_index = stream.index();

            let time_base = ffmpeg::Rational::new(1, frame_rate as i32);
            self.time_base = time_base;

            let mut encoder_ctx = codec::context::Context::new_with_codec(codec)
                .encoder()
                .video()
                .map_err(|e| EncoderError::Backend(format!("Encoder context: {e}")))?;

            encoder_ctx.set_width(width);
            encoder_ctx.set_height(height);
            encoder_ctx.set_format(ffmpeg::format::Pixel::YUV420P);
            encoder_ctx.set_time_base(time_base);
            encoder_ctx.set_frame_rate(Some(ffmpeg::Rational::new(frame_rate as i32, 1)));

            if needs_global_header {
                encoder_ctx.set_flags(codec::Flags::GLOBAL_HEADER);
            }

            // Live recording: ultrafast keeps encode cost below the frame budget
            let mut opts = ffmpeg::Dictionary::new();
            opts.set("preset", "ultrafast");
            opts.set("crf", "23");

            let encoder = encoder_ctx
                .open_as_with(codec, opts)
                .map_err(|e| EncoderError::Backend(format!("Open encoder: {e}")))?;

            stream.set_parameters(&encoder);

            output_ctx
                .write_header()
                .map_err(|e| EncoderError::Backend(format!("Write header: {e}")))?;

            // RGBA -> YUV420P scaler
            let scaler = scaling::Context::get(
                ffmpeg::format::Pixel::RGBA,
                width,
                height,
                ffmpeg::format::Pixel::YUV420P,
                width,
                height,
                scaling::Flags::FAST_BILINEAR,
            )
            .map_err(|e| EncoderError::Backend(format!("Scaler init: {e}")))?;

            self.spool_path = Some(spool);
            self.output_ctx = Some(output_ctx);
            self.encoder = Some(encoder);
            self.scaler = Some(scaler);
            self.frame_count = 0;

            Ok(())
        }

        fn encode_frame(&mut self, frame: &FrameBuffer) -> Result<Vec<Vec<u8>>, EncoderError> {
            let encoder = self.encoder.as_mut().ok_or(EncoderError::NotStarted)?;
            let scaler = self.scaler.as_mut().ok_or(EncoderError::NotStarted)?;
            let output_ctx = self.output_ctx.as_mut().ok_or(EncoderError::NotStarted)?;

            let mut rgba_frame =
                FfmpegFrame::new(ffmpeg::format::Pixel::RGBA, frame.width, frame.height);
            let dst_stride = rgba_frame.stride(0);
            let row = frame.width as usize * 4;
            for y in 0..frame.height as usize {
                let src = &frame.data[y * row..y * row + row];
                rgba_frame.data_mut(0)[y * dst_stride..y * dst_stride + row].copy_from_slice(src);
            }

            let mut yuv_frame = FfmpegFrame::empty();
            scaler
                .run(&rgba_frame, &mut yuv_frame)
                .map_err(|e| EncoderError::Backend(format!("Scale frame: {e}")))?;
            yuv_frame.set_pts(Some(self.frame_count as i64));

            encoder
                .send_frame(&yuv_frame)
                .map_err(|e| EncoderError::Backend(format!("Send frame: {e}")))?;

            let mut packet = ffmpeg::Packet::empty();
            while encoder.receive_packet(&mut packet).is_ok() {
                packet.set_stream(self.stream_index);
                packet.rescale_ts(
                    self.time_base,
                    output_ctx.stream(self.stream_index).unwrap().time_base(),
                );
                packet
                    .write_interleaved(output_ctx)
                    .map_err(|e| EncoderError::Backend(format!("Write packet: {e}")))?;
            }

            self.frame_count += 1;
            Ok(Vec::new())
        }

        fn finish(&mut self) -> Result<Vec<Vec<u8>>, EncoderError> {
            let mut encoder = self.encoder.take().ok_or(EncoderError::NotStarted)?;
            let mut output_ctx = self.output_ctx.take().ok_or(EncoderError::NotStarted)?;
            self.scaler = None;

            encoder
                .send_eof()
                .map_err(|e| EncoderError::Backend(format!("Send EOF: {e}")))?;

            let mut packet = ffmpeg::Packet::empty();
            while encoder.receive_packet(&mut packet).is_ok() {
                packet.set_stream(self.stream_index);
                packet.rescale_ts(
                    self.time_base,
                    output_ctx.stream(self.stream_index).unwrap().time_base(),
                );
                packet
                    .write_interleaved(&mut output_ctx)
                    .map_err(|e| EncoderError::Backend(format!("Write packet: {e}")))?;
            }

            output_ctx
                .write_trailer()
                .map_err(|e| EncoderError::Backend(format!("Write trailer: {e}")))?;
            drop(output_ctx);

            let spool = self.spool_path.take().ok_or(EncoderError::NotStarted)?;
            let bytes = fs::read(&spool)?;
            let _ = fs::remove_file(&spool);
            Ok(vec![bytes])
        }

        fn is_encoding(&self) -> bool {
            self.output_ctx.is_some()
        }

        fn frames_encoded(&self) -> u64 {
            self.frame_count
        }
    }
}

/// Create the stream encoder.
/// Returns the FFmpeg encoder when the `ffmpeg` feature is enabled,
/// otherwise falls back to the stub encoder.
pub fn create_encoder() -> Box<dyn StreamEncoder> {
    #[cfg(feature = "ffmpeg")]
    {
        match ffmpeg_encoder::FfmpegEncoder::new() {
            Ok(enc) => return Box::new(enc),
            Err(e) => {
                log::warn!("FFmpeg encoder init failed, falling back to stub: {e}");
            }
        }
    }

    Box::new(StubEncoder::new())
}
