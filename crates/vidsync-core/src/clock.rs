//! Audio clock and master clock selection.
//!
//! The audio clock is the number of seconds of PCM the audio device has
//! consumed. It is advanced on the audio thread and read on the render thread,
//! behind its own lock so that neither side ever holds the PCM ring lock and
//! the clock lock at the same time.

use parking_lot::Mutex;

/// Seconds of audio handed to the output device so far.
///
/// Monotonically non-decreasing. Starts at 0.0.
#[derive(Debug, Default)]
pub struct AudioClock {
    seconds: Mutex<f64>,
}

impl AudioClock {
    /// Creates a clock at 0.0 seconds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current clock value in seconds.
    pub fn seconds(&self) -> f64 {
        *self.seconds.lock()
    }

    /// Moves the clock forward. Negative or non-finite deltas are ignored.
    pub fn advance(&self, delta: f64) {
        if !delta.is_finite() || delta <= 0.0 {
            return;
        }
        *self.seconds.lock() += delta;
    }
}

/// Picks the reference time frames are scheduled against.
///
/// The audio clock wins once audio has actually played. Before that the video
/// schedules itself from the PTS of the oldest queued frame, and with nothing
/// queued the clock reads 0.0.
pub fn master_clock(audio_seconds: f64, front_pts: Option<f64>) -> f64 {
    if audio_seconds > 0.0 {
        audio_seconds
    } else {
        front_pts.unwrap_or(0.0)
    }
}
