//! Delay between a present and the next tick.
//!
//! Early frames are never held back: a frame that is not late is presented on
//! the tick that finds it at the front of the queue. Pacing only decides how
//! long the presenter yields afterwards.

use std::time::Duration;

/// How the presenter yields after presenting a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacingMode {
    /// Wait until the next queued frame is due on the master clock, capped
    /// at one frame interval.
    #[default]
    ClockDriven,
    /// Sleep a constant `800 ms / fps` after every present.
    Fixed,
    /// Never yield.
    Off,
}

/// Inputs to a pacing decision, sampled right after a present.
#[derive(Debug, Clone, Copy)]
pub struct PacingInput {
    /// Stream frame rate
    pub fps: f64,
    /// PTS of the frame that is now at the front of the queue
    pub next_pts: Option<f64>,
    /// Master clock value
    pub master_clock: f64,
    /// Whether the audio clock has started advancing
    pub audio_clock_running: bool,
}

/// Computes how long to yield after a present.
pub fn pacing_delay(mode: PacingMode, input: PacingInput) -> Duration {
    let fps = if input.fps.is_finite() && input.fps > 0.0 {
        input.fps
    } else {
        crate::stream::FALLBACK_FRAME_RATE
    };
    let frame_interval = 1.0 / fps;

    match mode {
        PacingMode::Off => Duration::ZERO,
        PacingMode::Fixed => Duration::from_millis((800.0 / fps) as u64),
        PacingMode::ClockDriven => {
            // Without a running audio clock the master clock is the front PTS
            // itself, so the gap is always zero. Fall back to the frame rate.
            let Some(next_pts) = input.next_pts.filter(|_| input.audio_clock_running) else {
                return Duration::from_secs_f64(frame_interval);
            };
            let wait = (next_pts - input.master_clock).clamp(0.0, frame_interval);
            Duration::from_secs_f64(wait)
        }
    }
}
