//! Pipeline construction and the per-tick presenter.
//!
//! A [`MediaPipeline`] is built once per media item. Construction opens the
//! container, opens both decoders, registers the audio stream with the audio
//! output and prebuffers video. After that the render loop calls
//! [`MediaPipeline::tick`] once per frame:
//!
//! 1. run at most one decode step while the frame queue has room,
//! 2. start audio playback on the first tick,
//! 3. look at the oldest queued frame against the master clock, and either
//!    drop it as late or upload it to the presentation target.
//!
//! Decoding and presenting happen on the calling thread. The only other
//! thread involved is the audio backend's, which drains the PCM ring through
//! [`AudioPull`].

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::audio_path::AudioDecodePath;
use crate::audio_ring::{AudioPull, AudioRing, AudioRingConfig, OUTPUT_CHANNELS};
use crate::clock::{self, AudioClock};
use crate::config::PipelineConfig;
use crate::demux::{open_streams, MediaBackend, PacketReader};
use crate::error::PipelineError;
use crate::frame_queue::FrameQueue;
use crate::output::{upload_frame, AudioOutput, AudioRegistration, PlaybackHandle, PresentationTarget};
use crate::pacing::{pacing_delay, PacingInput};
use crate::source::MediaSource;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::stream::{StreamKind, StreamPair};
use crate::video_path::VideoDecodePath;

/// Presenter lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterState {
    /// Filling the frame queue before the first present
    Prebuffering,
    /// Steady state: one decode step and at most one present per tick
    Playing,
    /// Demuxer exhausted, queued frames still to present
    Draining,
    /// Demuxer exhausted and queue empty. Terminal.
    Ended,
}

/// What a single [`MediaPipeline::tick`] did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// Playback has ended; the tick did nothing.
    Ended,
    /// No frame was queued.
    Idle,
    /// The front frame was late and was discarded without uploading.
    DroppedLate {
        /// PTS of the dropped frame
        pts: f64,
        /// How far behind the master clock it was, in seconds
        lateness: f64,
    },
    /// The front frame was uploaded.
    Presented {
        /// PTS of the presented frame
        pts: f64,
        /// Pacing delay after the present
        pace: Duration,
    },
    /// The target did not match the frame layout; the frame was discarded.
    Rejected {
        /// PTS of the discarded frame
        pts: f64,
    },
}

/// Decode and A/V-sync pipeline for one media item.
pub struct MediaPipeline {
    config: PipelineConfig,
    streams: StreamPair,
    reader: PacketReader,
    video: VideoDecodePath,
    audio: AudioDecodePath,
    queue: FrameQueue,
    ring: Arc<AudioRing>,
    clock: Arc<AudioClock>,
    stats: Arc<PipelineStats>,
    playback: Box<dyn PlaybackHandle>,
    playback_started: bool,
    decoders_flushed: bool,
    state: PresenterState,
    sync_threshold: f64,
}

impl MediaPipeline {
    /// Builds a pipeline over `source` and prebuffers it.
    ///
    /// Both an audio and a video stream are required. Every failure is
    /// reported before the audio output is touched, except a refusal from the
    /// audio output itself.
    pub fn new(
        source: MediaSource,
        backend: &dyn MediaBackend,
        audio_output: &mut dyn AudioOutput,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let (mut demuxer, streams) = open_streams(backend, source)?;
        let video_decoder = demuxer.open_video_decoder()?;
        let audio_decoder = demuxer.open_audio_decoder()?;

        let sample_rate = streams.audio.sample_rate;
        if sample_rate == 0 {
            return Err(PipelineError::codec_open(StreamKind::Audio, "unknown sample rate"));
        }
        if streams.video.width == 0 || streams.video.height == 0 {
            return Err(PipelineError::codec_open(
                StreamKind::Video,
                format!("invalid dimensions {}x{}", streams.video.width, streams.video.height),
            ));
        }

        let stats = Arc::new(PipelineStats::default());
        let clock = Arc::new(AudioClock::new());
        let ring_seconds = config.ring_seconds_for(streams.video.fps());
        let ring = Arc::new(
            AudioRing::new(AudioRingConfig::for_format(sample_rate, ring_seconds), stats.clone())
                .with_discard_clock(clock.clone(), sample_rate),
        );
        let pull = Arc::new(AudioPull::new(
            ring.clone(),
            clock.clone(),
            stats.clone(),
            sample_rate,
            config.audio_pull_timeout,
        ));

        let registration = AudioRegistration {
            sample_rate,
            channels: OUTPUT_CHANNELS,
            approximate_duration: streams.approximate_duration(),
        };
        let playback = audio_output.register(registration, pull)?;
        debug!(
            "MediaPipeline: registered audio {} Hz, {} ch, ~{:.2}s, ring {:.2}s",
            registration.sample_rate, registration.channels, registration.approximate_duration, ring_seconds
        );

        let sync_threshold = config
            .sync_threshold_floor
            .as_secs_f64()
            .max(0.5 * streams.video.frame_interval());

        let mut pipeline = Self {
            queue: FrameQueue::new(config.frame_queue_capacity, streams.video.width, streams.video.height),
            video: VideoDecodePath::new(video_decoder, streams.video.time_base, stats.clone()),
            audio: AudioDecodePath::new(audio_decoder, sample_rate, ring.clone(), stats.clone()),
            reader: PacketReader::new(demuxer),
            config,
            streams,
            ring,
            clock,
            stats,
            playback,
            playback_started: false,
            decoders_flushed: false,
            state: PresenterState::Prebuffering,
            sync_threshold,
        };
        pipeline.prebuffer();
        Ok(pipeline)
    }

    /// Decodes until the frame queue is full or the demuxer runs dry.
    fn prebuffer(&mut self) {
        while !self.queue.is_full() && !self.reader.is_exhausted() {
            self.decode_step();
        }
        self.update_state();
        info!(
            "MediaPipeline: prebuffered {}/{} frames, {} PCM bytes, state {:?}",
            self.queue.len(),
            self.queue.capacity(),
            self.ring.len(),
            self.state
        );
    }

    /// Reads one packet and hands it to its decode path.
    fn decode_step(&mut self) {
        let Some(packet) = self.reader.next_packet() else {
            self.flush_decoders();
            return;
        };
        PipelineStats::bump(&self.stats.packets_read);
        trace!(
            "MediaPipeline: {} packet pts={:?} ({} bytes)",
            packet.kind,
            packet.pts,
            packet.data.len()
        );

        let result = match packet.kind {
            StreamKind::Video => self.video.feed(&packet, &mut self.queue),
            StreamKind::Audio => self.audio.feed(&packet),
        };
        if let Err(e) = result {
            PipelineStats::bump(&self.stats.packets_skipped);
            warn!("MediaPipeline: skipped {} packet pts={:?}: {}", packet.kind, packet.pts, e);
        }
    }

    /// Drains both decoders once the demuxer is exhausted.
    fn flush_decoders(&mut self) {
        if self.decoders_flushed {
            return;
        }
        self.decoders_flushed = true;

        if let Err(e) = self.video.finish(&mut self.queue) {
            warn!("MediaPipeline: video decoder flush failed: {}", e);
        }
        if let Err(e) = self.audio.finish() {
            warn!("MediaPipeline: audio decoder flush failed: {}", e);
        }
        debug!("MediaPipeline: decoders flushed, {} frames queued", self.queue.len());
    }

    fn start_playback(&mut self) {
        self.playback.set_volume(self.config.initial_volume);
        self.playback.play();
        self.playback_started = true;
        info!("MediaPipeline: audio playback started");
    }

    fn update_state(&mut self) {
        let next = match (self.reader.is_exhausted(), self.queue.is_empty()) {
            (true, true) => PresenterState::Ended,
            (true, false) => PresenterState::Draining,
            (false, _) => PresenterState::Playing,
        };
        if next == self.state {
            return;
        }
        debug!("MediaPipeline: {:?} -> {:?}", self.state, next);
        self.state = next;
        if next == PresenterState::Ended {
            info!("MediaPipeline: end of video");
            self.stats.log_summary("ended");
        }
    }

    /// Runs one render tick against `target`.
    ///
    /// Never blocks for long: at most one packet is decoded, and the only
    /// sleep is the pacing delay when [`PipelineConfig::sleep_for_pacing`]
    /// is set. Once [`TickOutcome::Ended`] is returned, every later tick
    /// returns it again without doing anything.
    pub fn tick(&mut self, target: &mut dyn PresentationTarget) -> TickOutcome {
        if self.state == PresenterState::Ended {
            return TickOutcome::Ended;
        }

        if !self.queue.is_full() && !self.reader.is_exhausted() {
            self.decode_step();
        }

        if !self.playback_started {
            self.start_playback();
        }

        if self.queue.is_empty() {
            self.update_state();
            return if self.state == PresenterState::Ended {
                TickOutcome::Ended
            } else {
                TickOutcome::Idle
            };
        }

        let master = self.master_clock();
        let Some(frame) = self.queue.front() else {
            return TickOutcome::Idle;
        };
        let pts = frame.pts();
        let diff = pts - master;

        if diff <= -self.sync_threshold {
            self.queue.pop();
            PipelineStats::bump(&self.stats.frames_dropped_late);
            debug!(
                "MediaPipeline: dropped late frame pts={:.3}s ({:.3}s behind clock {:.3}s)",
                pts, -diff, master
            );
            self.update_state();
            return TickOutcome::DroppedLate { pts, lateness: -diff };
        }

        let upload = upload_frame(target, frame);
        self.queue.pop();

        if let Err(rejected) = upload {
            PipelineStats::bump(&self.stats.uploads_rejected);
            warn!("MediaPipeline: upload rejected for pts={:.3}s: {}", pts, rejected);
            self.update_state();
            return TickOutcome::Rejected { pts };
        }

        PipelineStats::bump(&self.stats.frames_presented);
        trace!("MediaPipeline: presented pts={:.3}s (clock {:.3}s)", pts, master);
        self.update_state();

        let pace = self.pacing_delay();
        if self.config.sleep_for_pacing && !pace.is_zero() {
            thread::sleep(pace);
        }
        TickOutcome::Presented { pts, pace }
    }

    fn pacing_delay(&self) -> Duration {
        let audio_seconds = self.clock.seconds();
        pacing_delay(
            self.config.pacing,
            PacingInput {
                fps: self.streams.video.fps(),
                next_pts: self.queue.front_pts(),
                master_clock: clock::master_clock(audio_seconds, self.queue.front_pts()),
                audio_clock_running: audio_seconds > 0.0,
            },
        )
    }

    /// The reference time frames are scheduled against.
    pub fn master_clock(&self) -> f64 {
        clock::master_clock(self.clock.seconds(), self.queue.front_pts())
    }

    /// The audio clock, advanced by the audio pull.
    pub fn audio_clock(&self) -> &Arc<AudioClock> {
        &self.clock
    }

    /// Current presenter state.
    pub fn state(&self) -> PresenterState {
        self.state
    }

    /// Returns true once the demuxer is exhausted and the queue has drained.
    pub fn is_ended(&self) -> bool {
        self.state == PresenterState::Ended
    }

    /// Whether audio playback has been started.
    pub fn playback_started(&self) -> bool {
        self.playback_started
    }

    /// Frames currently queued.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Maximum number of frames the queue holds.
    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// PTS of the oldest queued frame.
    pub fn front_pts(&self) -> Option<f64> {
        self.queue.front_pts()
    }

    /// Late-frame threshold in seconds: `max(floor, half a frame interval)`.
    pub fn sync_threshold(&self) -> f64 {
        self.sync_threshold
    }

    /// The audio and video streams being played.
    pub fn streams(&self) -> &StreamPair {
        &self.streams
    }

    /// Bytes of converted audio waiting in the ring.
    pub fn buffered_audio_bytes(&self) -> usize {
        self.ring.len()
    }

    /// Snapshot of the playback counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for MediaPipeline {
    fn drop(&mut self) {
        self.playback.stop();
        self.ring.close();
        self.queue.clear();
        self.stats.log_summary("teardown");
        info!("MediaPipeline: torn down in state {:?}", self.state);
    }
}

impl std::fmt::Debug for MediaPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPipeline")
            .field("state", &self.state)
            .field("queue", &self.queue)
            .field("ring", &self.ring)
            .field("audio_clock", &self.clock.seconds())
            .field("sync_threshold", &self.sync_threshold)
            .finish_non_exhaustive()
    }
}
