//! Scripted media backend and recording collaborators shared by the
//! integration tests. Nothing here needs FFmpeg, an audio device or a GPU.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use vidsync_core::audio_path::{AudioDecoder, AudioFrameRef, AudioSink};
use vidsync_core::demux::{Demuxer, MediaBackend};
use vidsync_core::stream::{
    AudioStreamDescriptor, CompressedPacket, ProbedStreams, Rational, StreamKind,
    VideoStreamDescriptor,
};
use vidsync_core::video_path::{PictureRef, PictureSink, PixelFormat, PlaneRef, VideoDecoder};
use vidsync_core::{
    AudioOutput, AudioOutputError, AudioRegistration, DecodeError, MediaSource, PcmSource,
    PipelineError, PlaybackHandle, PresentationTarget, TargetDescriptor,
};

pub const SAMPLE_RATE: u32 = 48_000;
pub const WIDTH: u32 = 16;
pub const HEIGHT: u32 = 8;

/// One scripted demuxer read.
#[derive(Debug, Clone)]
pub enum Read {
    Packet(CompressedPacket),
    Error,
}

/// A clip the scripted backend will "demux".
#[derive(Debug, Clone)]
pub struct ScriptedMedia {
    pub video: Option<VideoStreamDescriptor>,
    pub audio: Option<AudioStreamDescriptor>,
    pub reads: Vec<Read>,
    /// Pictures the video decoder emits per packet
    pub pictures_per_packet: usize,
    /// Whether the video decoder holds one picture back until flushed
    pub video_delay: bool,
    pub fail_video_open: bool,
}

fn video_descriptor(fps: i32) -> VideoStreamDescriptor {
    VideoStreamDescriptor {
        codec: "scripted-video".to_string(),
        time_base: Rational::new(1, fps),
        duration: None,
        width: WIDTH,
        height: HEIGHT,
        frame_rate: Rational::new(fps, 1),
    }
}

fn audio_descriptor(duration_samples: Option<i64>) -> AudioStreamDescriptor {
    AudioStreamDescriptor {
        codec: "scripted-audio".to_string(),
        time_base: Rational::new(1, SAMPLE_RATE as i32),
        duration: duration_samples,
        sample_rate: SAMPLE_RATE,
        channels: 2,
    }
}

pub fn video_packet(index: i64) -> CompressedPacket {
    CompressedPacket::new(StreamKind::Video, Some(index), vec![(index % 250) as u8 + 1])
}

/// Audio packet carrying `frames` stereo frames; the decoder reads the count
/// from the payload.
pub fn audio_packet(pts: i64, frames: u32) -> CompressedPacket {
    CompressedPacket::new(StreamKind::Audio, Some(pts), frames.to_le_bytes().to_vec())
}

impl ScriptedMedia {
    /// `frames` video frames at `fps`, each followed by one frame interval of
    /// audio.
    pub fn av_clip(frames: usize, fps: i32) -> Self {
        let samples_per_frame = SAMPLE_RATE / fps as u32;
        let mut reads = Vec::with_capacity(frames * 2);
        for i in 0..frames as i64 {
            reads.push(Read::Packet(video_packet(i)));
            reads.push(Read::Packet(audio_packet(i * samples_per_frame as i64, samples_per_frame)));
        }
        Self {
            video: Some(video_descriptor(fps)),
            audio: Some(audio_descriptor(Some(frames as i64 * samples_per_frame as i64))),
            reads,
            pictures_per_packet: 1,
            video_delay: false,
            fail_video_open: false,
        }
    }

    /// Video frames only, but with a (silent) audio stream declared.
    pub fn silent_clip(frames: usize, fps: i32) -> Self {
        let mut media = Self::av_clip(frames, fps);
        media
            .reads
            .retain(|read| !matches!(read, Read::Packet(p) if p.kind == StreamKind::Audio));
        media
    }

    pub fn without_audio(mut self) -> Self {
        self.audio = None;
        self
    }

    pub fn without_video(mut self) -> Self {
        self.video = None;
        self
    }

    pub fn source(&self) -> MediaSource {
        let Ok(source) = MediaSource::new(b"scripted media blob".to_vec()) else {
            panic!("Expected source");
        };
        source
    }
}

/// Backend that ignores the bytes and plays back a [`ScriptedMedia`].
pub struct ScriptedBackend {
    pub media: ScriptedMedia,
    pub opens: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn new(media: ScriptedMedia) -> Self {
        Self {
            media,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl MediaBackend for ScriptedBackend {
    fn open(&self, _source: MediaSource) -> Result<Box<dyn Demuxer>, PipelineError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedDemuxer {
            streams: ProbedStreams {
                video: self.media.video.clone(),
                audio: self.media.audio.clone(),
                container_duration: None,
            },
            reads: self.media.reads.clone().into(),
            media: self.media.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

struct ScriptedDemuxer {
    streams: ProbedStreams,
    reads: VecDeque<Read>,
    media: ScriptedMedia,
}

impl Demuxer for ScriptedDemuxer {
    fn streams(&self) -> &ProbedStreams {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<CompressedPacket>, DecodeError> {
        match self.reads.pop_front() {
            Some(Read::Packet(packet)) => Ok(Some(packet)),
            Some(Read::Error) => Err(DecodeError::Demux("scripted read failure".to_string())),
            None => Ok(None),
        }
    }

    fn open_video_decoder(&mut self) -> Result<Box<dyn VideoDecoder>, PipelineError> {
        if self.media.fail_video_open {
            return Err(PipelineError::codec_open(StreamKind::Video, "scripted failure"));
        }
        Ok(Box::new(ScriptedVideoDecoder {
            pictures_per_packet: self.media.pictures_per_packet,
            delay: self.media.video_delay,
            held: None,
        }))
    }

    fn open_audio_decoder(&mut self) -> Result<Box<dyn AudioDecoder>, PipelineError> {
        Ok(Box::new(ScriptedAudioDecoder { scratch: Vec::new() }))
    }
}

/// Emits a solid `WIDTH × HEIGHT` picture per packet, luma = first payload
/// byte. Rows are padded to exercise stride handling.
struct ScriptedVideoDecoder {
    pictures_per_packet: usize,
    delay: bool,
    held: Option<(i64, u8)>,
}

const STRIDE_PADDING: usize = 8;

fn emit_picture(sink: &mut PictureSink<'_>, pts: i64, luma: u8) {
    let (w, h) = (WIDTH as usize, HEIGHT as usize);
    let y_stride = w + STRIDE_PADDING;
    let c_stride = w / 2 + STRIDE_PADDING;
    let y = vec![luma; y_stride * h];
    let u = vec![128u8; c_stride * h / 2];
    let v = vec![128u8; c_stride * h / 2];
    sink(PictureRef {
        width: WIDTH,
        height: HEIGHT,
        format: PixelFormat::Yuv420p,
        planes: [
            PlaneRef::new(&y, y_stride),
            PlaneRef::new(&u, c_stride),
            PlaneRef::new(&v, c_stride),
        ],
        pts: Some(pts),
        best_effort_timestamp: None,
    });
}

impl VideoDecoder for ScriptedVideoDecoder {
    fn decode(&mut self, packet: &CompressedPacket, sink: &mut PictureSink<'_>) -> Result<(), DecodeError> {
        let Some(&luma) = packet.data.first() else {
            return Err(DecodeError::Decode("corrupt packet".to_string()));
        };
        let pts = packet.pts.unwrap_or(0);

        if self.delay {
            if let Some((held_pts, held_luma)) = self.held.replace((pts, luma)) {
                emit_picture(sink, held_pts, held_luma);
            }
            return Ok(());
        }

        for _ in 0..self.pictures_per_packet {
            emit_picture(sink, pts, luma);
        }
        Ok(())
    }

    fn flush(&mut self, sink: &mut PictureSink<'_>) -> Result<(), DecodeError> {
        if let Some((pts, luma)) = self.held.take() {
            emit_picture(sink, pts, luma);
        }
        Ok(())
    }
}

struct ScriptedAudioDecoder {
    scratch: Vec<f32>,
}

impl AudioDecoder for ScriptedAudioDecoder {
    fn decode(&mut self, packet: &CompressedPacket, sink: &mut AudioSink<'_>) -> Result<(), DecodeError> {
        let Ok(bytes) = <[u8; 4]>::try_from(packet.data.as_slice()) else {
            return Err(DecodeError::Decode("corrupt audio packet".to_string()));
        };
        let frames = u32::from_le_bytes(bytes) as usize;
        self.scratch.clear();
        self.scratch.resize(frames * 2, 0.25);
        sink(AudioFrameRef {
            samples: &self.scratch,
            channels: 2,
            sample_rate: SAMPLE_RATE,
        });
        Ok(())
    }
}

/// Presentation target that records every write.
#[derive(Debug)]
pub struct RecordingTarget {
    pub descriptor: TargetDescriptor,
    /// (byte length, row pitch, first luma byte) per write
    pub writes: Vec<(usize, usize, u8)>,
    pub draws: usize,
}

impl RecordingTarget {
    pub fn matching() -> Self {
        Self {
            descriptor: TargetDescriptor::yuv420p(WIDTH, HEIGHT),
            writes: Vec::new(),
            draws: 0,
        }
    }

    pub fn mismatched() -> Self {
        Self {
            descriptor: TargetDescriptor::yuv420p(WIDTH * 2, HEIGHT),
            writes: Vec::new(),
            draws: 0,
        }
    }
}

impl PresentationTarget for RecordingTarget {
    fn descriptor(&self) -> TargetDescriptor {
        self.descriptor
    }

    fn write_planar(&mut self, data: &[u8], row_pitch: usize) {
        self.writes.push((data.len(), row_pitch, data.first().copied().unwrap_or(0)));
    }

    fn submit_draw(&mut self) {
        self.draws += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackEvent {
    Play,
    Stop,
    Volume(f32),
}

/// Audio output that records registrations and handle calls and never pulls
/// on its own.
#[derive(Default)]
pub struct RecordingOutput {
    pub registrations: Vec<AudioRegistration>,
    pub source: Option<Arc<dyn PcmSource>>,
    pub events: Arc<Mutex<Vec<PlaybackEvent>>>,
    pub refuse: bool,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<PlaybackEvent> {
        self.events.lock().clone()
    }

    pub fn source(&self) -> Arc<dyn PcmSource> {
        let Some(source) = self.source.clone() else {
            panic!("Expected a registered PCM source");
        };
        source
    }
}

impl AudioOutput for RecordingOutput {
    fn register(
        &mut self,
        registration: AudioRegistration,
        source: Arc<dyn PcmSource>,
    ) -> Result<Box<dyn PlaybackHandle>, AudioOutputError> {
        if self.refuse {
            return Err(AudioOutputError("device busy".to_string()));
        }
        self.registrations.push(registration);
        self.source = Some(source);
        Ok(Box::new(RecordingHandle {
            events: self.events.clone(),
        }))
    }
}

struct RecordingHandle {
    events: Arc<Mutex<Vec<PlaybackEvent>>>,
}

impl PlaybackHandle for RecordingHandle {
    fn play(&mut self) {
        self.events.lock().push(PlaybackEvent::Play);
    }

    fn stop(&mut self) {
        self.events.lock().push(PlaybackEvent::Stop);
    }

    fn set_volume(&mut self, volume: f32) {
        self.events.lock().push(PlaybackEvent::Volume(volume));
    }
}
