//! FFmpeg-backed demuxer and decoders.
//!
//! The container is read straight out of the in-memory [`MediaSource`]
//! through a custom AVIO context, so nothing ever touches the filesystem.
//! Video is decoded with frame threading and converted to planar YUV 4:2:0
//! with swscale when the decoder produces anything else. Audio is resampled
//! to interleaved f32 stereo at the stream's own rate with swresample.
//!
//! Requires the `ffmpeg` feature and the FFmpeg development libraries:
//!
//! - **macOS**: `brew install ffmpeg`
//! - **Linux**: `apt install libavcodec-dev libavformat-dev libavutil-dev libswscale-dev libswresample-dev`

use std::ffi::{c_int, c_void};
use std::io::SeekFrom;
use std::ptr;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;

use crate::audio_path::{AudioDecoder, AudioFrameRef, AudioSink};
use crate::demux::{Demuxer, MediaBackend};
use crate::error::{DecodeError, PipelineError};
use crate::source::{MediaSource, ReadOutcome};
use crate::stream::{
    AudioStreamDescriptor, CompressedPacket, ProbedStreams, Rational, StreamKind,
    VideoStreamDescriptor,
};
use crate::video_path::{PictureRef, PictureSink, PixelFormat, PlaneRef, VideoDecoder};

/// `whence` flag asking the seek callback for the total stream size.
const AVSEEK_SIZE: c_int = 0x10000;
/// `whence` flag FFmpeg may OR into a regular seek.
const AVSEEK_FORCE: c_int = 0x20000;

/// Tunables for [`FfmpegBackend`].
#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    /// Size of the AVIO read buffer in bytes
    pub avio_buffer_size: usize,
    /// Decoder threads for the video stream (frame threading)
    pub video_decoder_threads: usize,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            avio_buffer_size: 4096,
            video_decoder_threads: 16,
        }
    }
}

impl FfmpegConfig {
    /// Single-threaded decoding, for constrained environments.
    pub fn single_threaded() -> Self {
        Self {
            video_decoder_threads: 1,
            ..Self::default()
        }
    }
}

/// [`MediaBackend`] built on FFmpeg.
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend {
    config: FfmpegConfig,
}

impl FfmpegBackend {
    /// Creates a backend with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with custom settings.
    pub fn with_config(config: FfmpegConfig) -> Self {
        Self { config }
    }
}

impl MediaBackend for FfmpegBackend {
    fn open(&self, source: MediaSource) -> Result<Box<dyn Demuxer>, PipelineError> {
        // ffmpeg::init() is safe to call multiple times
        ffmpeg::init()
            .map_err(|e| PipelineError::SourceUnreadable(format!("FFmpeg init failed: {e}")))?;
        let demuxer = FfmpegDemuxer::open(source, &self.config)?;
        Ok(Box::new(demuxer))
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

// ============================================================================
// Custom AVIO over MediaSource
// ============================================================================

unsafe extern "C" fn read_packet(opaque: *mut c_void, buf: *mut u8, buf_size: c_int) -> c_int {
    if opaque.is_null() || buf.is_null() || buf_size <= 0 {
        return ffi::AVERROR_EOF;
    }
    // SAFETY: opaque is the MediaSource owned by AvioSource, alive for as long
    // as the AVIO context; buf is an FFmpeg-owned buffer of buf_size bytes.
    let source = unsafe { &mut *(opaque as *mut MediaSource) };
    let dst = unsafe { std::slice::from_raw_parts_mut(buf, buf_size as usize) };
    match source.read(dst) {
        ReadOutcome::Read(n) => n as c_int,
        ReadOutcome::EndOfStream => ffi::AVERROR_EOF,
    }
}

unsafe extern "C" fn seek_packet(opaque: *mut c_void, offset: i64, whence: c_int) -> i64 {
    if opaque.is_null() {
        return -1;
    }
    // SAFETY: see read_packet
    let source = unsafe { &mut *(opaque as *mut MediaSource) };
    if whence & AVSEEK_SIZE != 0 {
        return source.size() as i64;
    }
    let pos = match whence & !AVSEEK_FORCE {
        0 if offset >= 0 => SeekFrom::Start(offset as u64),
        1 => SeekFrom::Current(offset),
        2 => SeekFrom::End(offset),
        _ => return -1,
    };
    source.seek(pos).map_or(-1, |p| p as i64)
}

/// Owns the AVIO context and the source it reads from.
struct AvioSource {
    avio: *mut ffi::AVIOContext,
    source: *mut MediaSource,
}

impl AvioSource {
    fn new(source: MediaSource, buffer_size: usize) -> Result<Self, PipelineError> {
        let buffer_size = buffer_size.max(512);
        let source = Box::into_raw(Box::new(source));

        // SAFETY: the buffer is handed to avio_alloc_context, which takes
        // ownership on success. On failure both allocations are released here.
        unsafe {
            let buffer = ffi::av_malloc(buffer_size) as *mut u8;
            if buffer.is_null() {
                drop(Box::from_raw(source));
                return Err(PipelineError::SourceUnreadable(
                    "av_malloc failed for AVIO buffer".to_string(),
                ));
            }

            let avio = ffi::avio_alloc_context(
                buffer,
                buffer_size as c_int,
                0,
                source as *mut c_void,
                Some(read_packet),
                None,
                Some(seek_packet),
            );
            if avio.is_null() {
                ffi::av_free(buffer as *mut c_void);
                drop(Box::from_raw(source));
                return Err(PipelineError::SourceUnreadable(
                    "avio_alloc_context failed".to_string(),
                ));
            }

            Ok(Self { avio, source })
        }
    }
}

impl Drop for AvioSource {
    fn drop(&mut self) {
        // SAFETY: the format context using this AVIO context has already been
        // closed (FfmpegDemuxer drops its Input first). FFmpeg may have
        // replaced the buffer, so free whatever it points at now.
        unsafe {
            if !self.avio.is_null() {
                ffi::av_freep(ptr::addr_of_mut!((*self.avio).buffer) as *mut c_void);
                ffi::avio_context_free(&mut self.avio);
            }
            if !self.source.is_null() {
                drop(Box::from_raw(self.source));
                self.source = ptr::null_mut();
            }
        }
    }
}

fn rational(r: ffmpeg::Rational) -> Rational {
    Rational::new(r.0, r.1)
}

fn duration_ticks(d: i64) -> Option<i64> {
    (d > 0).then_some(d)
}

fn codec_name(params: &ffmpeg::codec::Parameters) -> String {
    params.id().name().to_string()
}

// ============================================================================
// Demuxer
// ============================================================================

/// FFmpeg demuxer reading from an in-memory source.
pub struct FfmpegDemuxer {
    /// Format context. Declared before `io` so it is closed first.
    input: ffmpeg::format::context::Input,
    io: AvioSource,
    streams: ProbedStreams,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    video_threads: usize,
}

impl FfmpegDemuxer {
    /// Opens the container in `source` and probes its streams.
    pub fn open(source: MediaSource, config: &FfmpegConfig) -> Result<Self, PipelineError> {
        let io = AvioSource::new(source, config.avio_buffer_size)?;

        // SAFETY: ctx is freshly allocated and given our AVIO context with the
        // custom-IO flag, so avformat_close_input leaves pb to AvioSource. On
        // open failure FFmpeg frees ctx itself.
        let input = unsafe {
            let mut ctx = ffi::avformat_alloc_context();
            if ctx.is_null() {
                return Err(PipelineError::SourceUnreadable(
                    "avformat_alloc_context failed".to_string(),
                ));
            }
            (*ctx).pb = io.avio;
            (*ctx).flags |= ffi::AVFMT_FLAG_CUSTOM_IO as c_int;

            let ret = ffi::avformat_open_input(
                &mut ctx,
                ptr::null_mut(),
                ptr::null_mut(),
                ptr::null_mut(),
            );
            if ret < 0 {
                return Err(PipelineError::UnsupportedContainer(
                    ffmpeg::Error::from(ret).to_string(),
                ));
            }

            let ret = ffi::avformat_find_stream_info(ctx, ptr::null_mut());
            if ret < 0 {
                ffi::avformat_close_input(&mut ctx);
                return Err(PipelineError::StreamProbeFailed(
                    ffmpeg::Error::from(ret).to_string(),
                ));
            }

            ffmpeg::format::context::Input::wrap(ctx)
        };

        let mut streams = ProbedStreams {
            container_duration: (input.duration() > 0)
                .then(|| input.duration() as f64 / ffi::AV_TIME_BASE as f64),
            ..ProbedStreams::default()
        };

        let video_index = input.streams().best(ffmpeg::media::Type::Video).map(|stream| {
            let params = stream.parameters();
            // SAFETY: params points at the stream's live AVCodecParameters
            let (width, height) = unsafe {
                let p = params.as_ptr();
                ((*p).width.max(0) as u32, (*p).height.max(0) as u32)
            };
            streams.video = Some(VideoStreamDescriptor {
                codec: codec_name(&params),
                time_base: rational(stream.time_base()),
                duration: duration_ticks(stream.duration()),
                width,
                height,
                frame_rate: rational(stream.avg_frame_rate()),
            });
            stream.index()
        });

        let audio_index = input.streams().best(ffmpeg::media::Type::Audio).map(|stream| {
            let params = stream.parameters();
            // SAFETY: as above
            let (sample_rate, channels) = unsafe {
                let p = params.as_ptr();
                ((*p).sample_rate.max(0) as u32, (*p).ch_layout.nb_channels.max(0) as u16)
            };
            streams.audio = Some(AudioStreamDescriptor {
                codec: codec_name(&params),
                time_base: rational(stream.time_base()),
                duration: duration_ticks(stream.duration()),
                sample_rate,
                channels,
            });
            stream.index()
        });

        tracing::debug!(
            "FfmpegDemuxer: format {}, {} streams, video={:?}, audio={:?}",
            input.format().name(),
            input.streams().count(),
            video_index,
            audio_index
        );

        Ok(Self {
            input,
            io,
            streams,
            video_index,
            audio_index,
            video_threads: config.video_decoder_threads.max(1),
        })
    }

    fn decoder_context(
        &self,
        index: Option<usize>,
        kind: StreamKind,
    ) -> Result<ffmpeg::codec::context::Context, PipelineError> {
        let stream = index
            .and_then(|i| self.input.stream(i))
            .ok_or_else(|| PipelineError::codec_open(kind, "stream not selected"))?;
        ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| PipelineError::codec_open(kind, format!("codec context: {e}")))
    }
}

impl Demuxer for FfmpegDemuxer {
    fn streams(&self) -> &ProbedStreams {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<CompressedPacket>, DecodeError> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => continue,
                Err(e) => return Err(DecodeError::Demux(e.to_string())),
            }

            let index = Some(packet.stream());
            let kind = if index == self.video_index {
                StreamKind::Video
            } else if index == self.audio_index {
                StreamKind::Audio
            } else {
                continue;
            };

            return Ok(Some(CompressedPacket {
                kind,
                pts: packet.pts(),
                dts: packet.dts(),
                keyframe: packet.is_key(),
                data: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
            }));
        }
    }

    fn open_video_decoder(&mut self) -> Result<Box<dyn VideoDecoder>, PipelineError> {
        let mut context = self.decoder_context(self.video_index, StreamKind::Video)?;
        let mut threading = ffmpeg::threading::Config::default();
        threading.kind = ffmpeg::threading::Type::Frame;
        threading.count = self.video_threads;
        context.set_threading(threading);

        let decoder = context
            .decoder()
            .video()
            .map_err(|e| PipelineError::codec_open(StreamKind::Video, e.to_string()))?;
        tracing::info!(
            "FfmpegVideoDecoder: {}x{} {:?}, {} threads",
            decoder.width(),
            decoder.height(),
            decoder.format(),
            self.video_threads
        );
        Ok(Box::new(FfmpegVideoDecoder::new(decoder)))
    }

    fn open_audio_decoder(&mut self) -> Result<Box<dyn AudioDecoder>, PipelineError> {
        let context = self.decoder_context(self.audio_index, StreamKind::Audio)?;
        let decoder = context
            .decoder()
            .audio()
            .map_err(|e| PipelineError::codec_open(StreamKind::Audio, e.to_string()))?;
        tracing::info!(
            "FfmpegAudioDecoder: {} Hz, {} ch, {:?}",
            decoder.rate(),
            decoder.channels(),
            decoder.format()
        );
        Ok(Box::new(FfmpegAudioDecoder::new(decoder)))
    }
}

impl std::fmt::Debug for FfmpegDemuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegDemuxer")
            .field("streams", &self.streams)
            .field("video_index", &self.video_index)
            .field("audio_index", &self.audio_index)
            .field("avio", &self.io.avio)
            .finish()
    }
}

fn to_av_packet(packet: &CompressedPacket) -> ffmpeg::Packet {
    let mut av_packet = ffmpeg::Packet::copy(&packet.data);
    av_packet.set_pts(packet.pts);
    av_packet.set_dts(packet.dts);
    if packet.keyframe {
        av_packet.set_flags(ffmpeg::packet::Flags::KEY);
    }
    av_packet
}

// ============================================================================
// Video decoder
// ============================================================================

/// Video decoder producing planar YUV 4:2:0 pictures.
pub struct FfmpegVideoDecoder {
    decoder: ffmpeg::decoder::Video,
    scaler: Option<ffmpeg::software::scaling::Context>,
    frame: ffmpeg::frame::Video,
    converted: ffmpeg::frame::Video,
}

impl FfmpegVideoDecoder {
    fn new(decoder: ffmpeg::decoder::Video) -> Self {
        Self {
            decoder,
            scaler: None,
            frame: ffmpeg::frame::Video::empty(),
            converted: ffmpeg::frame::Video::empty(),
        }
    }

    fn drain(&mut self, sink: &mut PictureSink<'_>) -> Result<(), DecodeError> {
        loop {
            match self.decoder.receive_frame(&mut self.frame) {
                Ok(()) => self.emit(sink)?,
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => return Ok(()),
                Err(e) => return Err(DecodeError::Decode(format!("receive_frame: {e}"))),
            }
        }
    }

    fn ensure_scaler(
        &mut self,
        width: u32,
        height: u32,
        src_format: ffmpeg::format::Pixel,
    ) -> Result<(), DecodeError> {
        let needs_recreate = self.scaler.as_ref().map_or(true, |s| {
            let input = s.input();
            input.format != src_format || input.width != width || input.height != height
        });

        if needs_recreate {
            let scaler = ffmpeg::software::scaling::Context::get(
                src_format,
                width,
                height,
                ffmpeg::format::Pixel::YUV420P,
                width,
                height,
                ffmpeg::software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| DecodeError::UnsupportedPixelFormat(format!("{src_format:?}: {e}")))?;
            tracing::debug!("FfmpegVideoDecoder: converting {:?} to YUV420P", src_format);
            self.scaler = Some(scaler);
            self.converted = ffmpeg::frame::Video::empty();
        }
        Ok(())
    }

    fn emit(&mut self, sink: &mut PictureSink<'_>) -> Result<(), DecodeError> {
        // SAFETY: frame holds a decoded AVFrame; only the pointer is inspected
        let has_data = unsafe { !(*self.frame.as_ptr()).data[0].is_null() };
        if !has_data {
            return Ok(());
        }

        let pts = self.frame.pts();
        let best_effort_timestamp = self.frame.timestamp();
        let (width, height) = (self.frame.width(), self.frame.height());

        let source = if self.frame.format() == ffmpeg::format::Pixel::YUV420P {
            &self.frame
        } else {
            self.ensure_scaler(width, height, self.frame.format())?;
            let Some(scaler) = self.scaler.as_mut() else {
                return Err(DecodeError::Decode("scaler not initialized".to_string()));
            };
            scaler
                .run(&self.frame, &mut self.converted)
                .map_err(|e| DecodeError::Decode(format!("scaling failed: {e}")))?;
            &self.converted
        };

        sink(PictureRef {
            width,
            height,
            format: PixelFormat::Yuv420p,
            planes: [
                PlaneRef::new(source.data(0), source.stride(0)),
                PlaneRef::new(source.data(1), source.stride(1)),
                PlaneRef::new(source.data(2), source.stride(2)),
            ],
            pts,
            best_effort_timestamp,
        });
        Ok(())
    }
}

impl VideoDecoder for FfmpegVideoDecoder {
    fn decode(&mut self, packet: &CompressedPacket, sink: &mut PictureSink<'_>) -> Result<(), DecodeError> {
        let av_packet = to_av_packet(packet);
        match self.decoder.send_packet(&av_packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                // Decoder wants its output drained before taking more input
                self.drain(sink)?;
                self.decoder
                    .send_packet(&av_packet)
                    .map_err(|e| DecodeError::Decode(format!("send_packet: {e}")))?;
            }
            Err(e) => return Err(DecodeError::Decode(format!("send_packet: {e}"))),
        }
        self.drain(sink)
    }

    fn flush(&mut self, sink: &mut PictureSink<'_>) -> Result<(), DecodeError> {
        self.decoder
            .send_eof()
            .map_err(|e| DecodeError::Decode(format!("send_eof: {e}")))?;
        self.drain(sink)
    }
}

// ============================================================================
// Audio decoder
// ============================================================================

/// Audio decoder producing interleaved f32 stereo at the stream's rate.
pub struct FfmpegAudioDecoder {
    decoder: ffmpeg::decoder::Audio,
    resampler: Option<ffmpeg::software::resampling::Context>,
    frame: ffmpeg::frame::Audio,
    samples: Vec<f32>,
}

impl FfmpegAudioDecoder {
    fn new(decoder: ffmpeg::decoder::Audio) -> Self {
        Self {
            decoder,
            resampler: None,
            frame: ffmpeg::frame::Audio::empty(),
            samples: Vec::new(),
        }
    }

    fn ensure_resampler(&mut self) -> Result<(), DecodeError> {
        let src_format = self.frame.format();
        let src_rate = self.frame.rate();
        let src_layout = self.frame.channel_layout();

        let needs_recreate = self.resampler.as_ref().map_or(true, |r| {
            let input = r.input();
            input.format != src_format || input.rate != src_rate || input.channel_layout != src_layout
        });

        if needs_recreate {
            let resampler = ffmpeg::software::resampling::Context::get(
                src_format,
                src_layout,
                src_rate,
                ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Packed),
                ffmpeg::ChannelLayout::STEREO,
                src_rate,
            )
            .map_err(|e| DecodeError::UnsupportedAudio(format!("resampler: {e}")))?;
            self.resampler = Some(resampler);
        }
        Ok(())
    }

    fn drain(&mut self, sink: &mut AudioSink<'_>) -> Result<(), DecodeError> {
        loop {
            match self.decoder.receive_frame(&mut self.frame) {
                Ok(()) => self.emit(sink)?,
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => return Ok(()),
                Err(e) => return Err(DecodeError::Decode(format!("receive_frame: {e}"))),
            }
        }
    }

    fn emit(&mut self, sink: &mut AudioSink<'_>) -> Result<(), DecodeError> {
        self.ensure_resampler()?;
        let Some(resampler) = self.resampler.as_mut() else {
            return Err(DecodeError::Decode("resampler not initialized".to_string()));
        };
        let mut resampled = ffmpeg::frame::Audio::empty();
        resampler
            .run(&self.frame, &mut resampled)
            .map_err(|e| DecodeError::Decode(format!("resampling failed: {e}")))?;
        send_interleaved(&resampled, &mut self.samples, sink);
        Ok(())
    }
}

/// Output samples reserved for the resampler's buffered tail at end of stream.
const RESAMPLER_TAIL_SAMPLES: usize = 4096;

/// Drains the samples swresample still buffers. None if it held nothing.
fn flush_resampler(
    resampler: &mut ffmpeg::software::resampling::Context,
) -> Result<Option<ffmpeg::frame::Audio>, DecodeError> {
    let output = resampler.output();
    let mut tail = ffmpeg::frame::Audio::new(output.format, RESAMPLER_TAIL_SAMPLES, output.channel_layout);
    resampler
        .flush(&mut tail)
        .map_err(|e| DecodeError::Decode(format!("resampler flush failed: {e}")))?;
    Ok((tail.samples() > 0).then_some(tail))
}

/// Hands interleaved f32 stereo from `resampled` to `sink`.
fn send_interleaved(resampled: &ffmpeg::frame::Audio, samples: &mut Vec<f32>, sink: &mut AudioSink<'_>) {
    let frames = resampled.samples();
    if frames == 0 {
        return;
    }

    let raw = resampled.data(0);
    let count = (raw.len() / 4).min(frames * 2);
    samples.clear();
    samples.extend(
        raw[..count * 4]
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]])),
    );

    sink(AudioFrameRef {
        samples,
        channels: 2,
        sample_rate: resampled.rate(),
    });
}

impl AudioDecoder for FfmpegAudioDecoder {
    fn decode(&mut self, packet: &CompressedPacket, sink: &mut AudioSink<'_>) -> Result<(), DecodeError> {
        let av_packet = to_av_packet(packet);
        match self.decoder.send_packet(&av_packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                self.drain(sink)?;
                self.decoder
                    .send_packet(&av_packet)
                    .map_err(|e| DecodeError::Decode(format!("send_packet: {e}")))?;
            }
            Err(e) => return Err(DecodeError::Decode(format!("send_packet: {e}"))),
        }
        self.drain(sink)
    }

    fn flush(&mut self, sink: &mut AudioSink<'_>) -> Result<(), DecodeError> {
        self.decoder
            .send_eof()
            .map_err(|e| DecodeError::Decode(format!("send_eof: {e}")))?;
        self.drain(sink)?;

        if let Some(resampler) = self.resampler.as_mut() {
            if let Some(tail) = flush_resampler(resampler)? {
                tracing::debug!("FfmpegAudioDecoder: flushed {} buffered samples", tail.samples());
                send_interleaved(&tail, &mut self.samples, sink);
            }
        }
        Ok(())
    }
}
