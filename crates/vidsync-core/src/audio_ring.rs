//! Bounded PCM byte ring shared with the audio output, and the pull callback
//! that drains it.
//!
//! The decode step appends converted stereo S16 bytes; the audio backend's
//! thread pulls them through [`AudioPull`]. A condition variable wakes a
//! waiting pull on append, and the wait is bounded so the pull degrades to
//! silence instead of stalling the device.
//!
//! On overflow the oldest unread bytes are overwritten, always in whole stereo
//! frames so the stream never loses channel alignment. A ring attached to an
//! [`AudioClock`] advances it by the duration of whatever it overwrites, so the
//! clock keeps reading the stream position of the next byte played.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::AudioClock;
use crate::output::{FillResult, PcmSource};
use crate::stats::PipelineStats;

/// Channels in the converted output format.
pub const OUTPUT_CHANNELS: u16 = 2;

/// Bytes per sample in the converted output format (signed 16-bit).
pub const OUTPUT_BYTES_PER_SAMPLE: usize = 2;

/// Bytes in one interleaved stereo S16 frame.
pub const OUTPUT_FRAME_BYTES: usize = OUTPUT_CHANNELS as usize * OUTPUT_BYTES_PER_SAMPLE;

/// Bytes per second of converted output audio at `sample_rate`.
pub fn output_bytes_per_second(sample_rate: u32) -> usize {
    sample_rate as usize * OUTPUT_FRAME_BYTES
}

/// Sizing for an [`AudioRing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioRingConfig {
    /// Capacity in bytes, a whole number of output frames
    pub capacity_bytes: usize,
}

impl AudioRingConfig {
    /// Holds `seconds` of stereo S16 audio at `sample_rate`.
    pub fn for_format(sample_rate: u32, seconds: f64) -> Self {
        let bytes = (output_bytes_per_second(sample_rate) as f64 * seconds.max(0.0)) as usize;
        let frames = (bytes / OUTPUT_FRAME_BYTES).max(1);
        Self {
            capacity_bytes: frames * OUTPUT_FRAME_BYTES,
        }
    }
}

struct RingState {
    bytes: VecDeque<u8>,
    closed: bool,
}

/// Bounded byte FIFO guarded by a mutex, with a condvar for waiting readers.
pub struct AudioRing {
    state: Mutex<RingState>,
    data_available: Condvar,
    capacity: usize,
    stats: Arc<PipelineStats>,
    /// Clock advanced by overwritten audio, with its bytes per second
    discard_clock: Option<(Arc<AudioClock>, f64)>,
}

impl AudioRing {
    /// Creates an empty ring.
    pub fn new(config: AudioRingConfig, stats: Arc<PipelineStats>) -> Self {
        let capacity = config.capacity_bytes.max(OUTPUT_FRAME_BYTES);
        Self {
            state: Mutex::new(RingState {
                bytes: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            data_available: Condvar::new(),
            capacity,
            stats,
            discard_clock: None,
        }
    }

    /// Advances `clock` by the duration of any unread audio this ring
    /// overwrites, for stereo S16 at `sample_rate`.
    pub fn with_discard_clock(mut self, clock: Arc<AudioClock>, sample_rate: u32) -> Self {
        self.discard_clock = Some((clock, output_bytes_per_second(sample_rate) as f64));
        self
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.state.lock().bytes.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends PCM bytes and wakes a waiting reader.
    ///
    /// Returns the number of bytes discarded to make room: overwritten unread
    /// bytes plus the head of a chunk larger than the whole ring. Appends after [`close`](Self::close) are ignored.
    pub fn append(&self, pcm: &[u8]) -> usize {
        if pcm.is_empty() {
            return 0;
        }

        let mut state = self.state.lock();
        if state.closed {
            return 0;
        }

        // A chunk larger than the whole ring keeps only its newest tail
        let mut discarded = pcm.len().saturating_sub(self.capacity);
        let pcm = &pcm[discarded..];

        let free = self.capacity - state.bytes.len();
        if pcm.len() > free {
            let excess = pcm.len() - free;
            let excess = excess.div_ceil(OUTPUT_FRAME_BYTES) * OUTPUT_FRAME_BYTES;
            let evicted = excess.min(state.bytes.len());
            state.bytes.drain(..evicted);
            discarded += evicted;
        }
        state.bytes.extend(pcm);
        drop(state);

        if discarded > 0 {
            PipelineStats::bump(&self.stats.ring_overflows);
            tracing::debug!("AudioRing: overwrote {} unread bytes", discarded);
            if let Some((clock, bytes_per_second)) = &self.discard_clock {
                clock.advance(discarded as f64 / bytes_per_second);
            }
        }
        PipelineStats::add(&self.stats.audio_bytes_appended, pcm.len() as u64);
        self.data_available.notify_one();
        discarded
    }

    /// Copies up to `dst.len()` bytes into `dst`, waiting at most `timeout`
    /// for data when the ring is empty. Returns the number of bytes copied.
    pub fn take_into(&self, dst: &mut [u8], timeout: Duration) -> usize {
        if dst.is_empty() {
            return 0;
        }

        let mut state = self.state.lock();
        if state.bytes.is_empty() && !state.closed {
            let _ = self.data_available.wait_for(&mut state, timeout);
        }

        let n = dst.len().min(state.bytes.len());
        for (slot, byte) in dst.iter_mut().zip(state.bytes.drain(..n)) {
            *slot = byte;
        }
        n
    }

    /// Discards buffered audio and wakes any waiting reader for good.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.bytes.clear();
        drop(state);
        self.data_available.notify_all();
    }
}

impl std::fmt::Debug for AudioRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioRing")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

/// The pull callback handed to the audio output.
///
/// Each pull drains the ring into the device buffer, zero-fills any shortfall
/// and advances the audio clock by the duration of the bytes actually copied.
/// The ring lock is released before the clock lock is taken.
pub struct AudioPull {
    ring: Arc<AudioRing>,
    clock: Arc<AudioClock>,
    stats: Arc<PipelineStats>,
    bytes_per_second: f64,
    timeout: Duration,
}

impl AudioPull {
    /// Creates a pull over `ring` for stereo S16 audio at `sample_rate`.
    pub fn new(
        ring: Arc<AudioRing>,
        clock: Arc<AudioClock>,
        stats: Arc<PipelineStats>,
        sample_rate: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            ring,
            clock,
            stats,
            bytes_per_second: output_bytes_per_second(sample_rate) as f64,
            timeout,
        }
    }
}

impl PcmSource for AudioPull {
    fn pull_samples(&self, buf: &mut [u8]) -> FillResult {
        let copied = self.ring.take_into(buf, self.timeout);
        buf[copied..].fill(0);

        if copied == 0 {
            PipelineStats::bump(&self.stats.silent_pulls);
            tracing::trace!("AudioPull: no PCM within {:?}, emitting silence", self.timeout);
            return FillResult::Silence;
        }

        if self.bytes_per_second > 0.0 {
            self.clock.advance(copied as f64 / self.bytes_per_second);
        }
        PipelineStats::add(&self.stats.audio_bytes_pulled, copied as u64);

        if copied < buf.len() {
            FillResult::Partial { copied }
        } else {
            FillResult::Filled
        }
    }
}
