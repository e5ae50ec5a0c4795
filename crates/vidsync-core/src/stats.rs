//! Playback counters.
//!
//! Shared between the render thread and the audio pull thread, so every
//! counter is an atomic. Read them through [`PipelineStats::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the decode paths, the presenter and the audio pull.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Packets pulled from the demuxer
    pub(crate) packets_read: AtomicU64,
    /// Packets whose decode failed and were skipped
    pub(crate) packets_skipped: AtomicU64,
    /// Video frames produced by the decoder
    pub(crate) frames_decoded: AtomicU64,
    /// Decoded frames discarded because the queue was full
    pub(crate) frames_dropped_backpressure: AtomicU64,
    /// Queued frames discarded for being late
    pub(crate) frames_dropped_late: AtomicU64,
    /// Frames uploaded to the presentation target
    pub(crate) frames_presented: AtomicU64,
    /// Frames the presentation target's layout did not match
    pub(crate) uploads_rejected: AtomicU64,
    /// PCM bytes appended to the ring
    pub(crate) audio_bytes_appended: AtomicU64,
    /// PCM bytes handed to the audio output
    pub(crate) audio_bytes_pulled: AtomicU64,
    /// Pulls that timed out and returned pure silence
    pub(crate) silent_pulls: AtomicU64,
    /// Appends that overwrote unread audio
    pub(crate) ring_overflows: AtomicU64,
}

impl PipelineStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Takes a point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_read: self.packets_read.load(Ordering::Relaxed),
            packets_skipped: self.packets_skipped.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            frames_dropped_backpressure: self.frames_dropped_backpressure.load(Ordering::Relaxed),
            frames_dropped_late: self.frames_dropped_late.load(Ordering::Relaxed),
            frames_presented: self.frames_presented.load(Ordering::Relaxed),
            uploads_rejected: self.uploads_rejected.load(Ordering::Relaxed),
            audio_bytes_appended: self.audio_bytes_appended.load(Ordering::Relaxed),
            audio_bytes_pulled: self.audio_bytes_pulled.load(Ordering::Relaxed),
            silent_pulls: self.silent_pulls.load(Ordering::Relaxed),
            ring_overflows: self.ring_overflows.load(Ordering::Relaxed),
        }
    }

    /// Logs every counter at info level.
    pub fn log_summary(&self, label: &str) {
        let s = self.snapshot();
        tracing::info!(
            "PipelineStats [{}]: packets={}, skipped={}, decoded={}, drop_bp={}, drop_late={}, presented={}, rejected={}, pcm_in={}, pcm_out={}, silent={}, overflows={}",
            label,
            s.packets_read,
            s.packets_skipped,
            s.frames_decoded,
            s.frames_dropped_backpressure,
            s.frames_dropped_late,
            s.frames_presented,
            s.uploads_rejected,
            s.audio_bytes_appended,
            s.audio_bytes_pulled,
            s.silent_pulls,
            s.ring_overflows
        );
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_read: u64,
    pub packets_skipped: u64,
    pub frames_decoded: u64,
    pub frames_dropped_backpressure: u64,
    pub frames_dropped_late: u64,
    pub frames_presented: u64,
    pub uploads_rejected: u64,
    pub audio_bytes_appended: u64,
    pub audio_bytes_pulled: u64,
    pub silent_pulls: u64,
    pub ring_overflows: u64,
}

impl StatsSnapshot {
    /// All frames that left the queue without reaching the screen.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped_backpressure + self.frames_dropped_late + self.uploads_rejected
    }
}
