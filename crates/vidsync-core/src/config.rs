//! Pipeline configuration.

use std::time::Duration;

use crate::error::PipelineError;
use crate::frame_queue::DEFAULT_FRAME_QUEUE_CAPACITY;
use crate::pacing::PacingMode;

/// Lower bound of the late-frame threshold.
pub const DEFAULT_SYNC_THRESHOLD_FLOOR: Duration = Duration::from_millis(20);

/// Longest the audio pull waits for PCM before falling back to silence.
pub const DEFAULT_AUDIO_PULL_TIMEOUT: Duration = Duration::from_millis(10);

/// Default amount of converted audio the ring can hold.
pub const DEFAULT_AUDIO_RING_SECONDS: f64 = 4.0;

/// Audio the ring holds beyond the frame queue's span of stream time.
pub const AUDIO_RING_MARGIN_SECONDS: f64 = 1.0;

/// Tunables for a [`MediaPipeline`](crate::pipeline::MediaPipeline).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of decoded frames held ahead of presentation
    pub frame_queue_capacity: usize,
    /// Minimum late-frame threshold; the effective threshold is
    /// `max(floor, half a frame interval)`
    pub sync_threshold_floor: Duration,
    /// Bounded wait of the audio pull before it returns silence
    pub audio_pull_timeout: Duration,
    /// Minimum seconds of converted output audio the PCM ring can hold.
    /// The ring is grown to cover a full frame queue, see
    /// [`ring_seconds_for`](Self::ring_seconds_for).
    pub audio_ring_seconds: f64,
    /// How the presenter paces itself after a present
    pub pacing: PacingMode,
    /// Whether `tick` sleeps for the pacing delay itself
    pub sleep_for_pacing: bool,
    /// Volume applied to the playback handle when playback starts
    pub initial_volume: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_queue_capacity: DEFAULT_FRAME_QUEUE_CAPACITY,
            sync_threshold_floor: DEFAULT_SYNC_THRESHOLD_FLOOR,
            audio_pull_timeout: DEFAULT_AUDIO_PULL_TIMEOUT,
            audio_ring_seconds: DEFAULT_AUDIO_RING_SECONDS,
            pacing: PacingMode::default(),
            sleep_for_pacing: true,
            initial_volume: 1.0,
        }
    }
}

impl PipelineConfig {
    /// Config for driving the pipeline from an external scheduler: the pacing
    /// delay is reported in each tick outcome but never slept.
    pub fn for_external_pacing() -> Self {
        Self {
            sleep_for_pacing: false,
            ..Self::default()
        }
    }

    /// Ring size for video at `fps`: enough audio to match a full frame queue
    /// plus [`AUDIO_RING_MARGIN_SECONDS`], and never less than
    /// `audio_ring_seconds`.
    pub fn ring_seconds_for(&self, fps: f64) -> f64 {
        let fps = if fps.is_finite() && fps > 0.0 {
            fps
        } else {
            crate::stream::FALLBACK_FRAME_RATE
        };
        let queue_span = self.frame_queue_capacity as f64 / fps;
        self.audio_ring_seconds.max(queue_span + AUDIO_RING_MARGIN_SECONDS)
    }

    /// Sets the frame queue capacity.
    pub fn with_frame_queue_capacity(mut self, capacity: usize) -> Self {
        self.frame_queue_capacity = capacity;
        self
    }

    /// Sets the sync threshold floor.
    pub fn with_sync_threshold_floor(mut self, floor: Duration) -> Self {
        self.sync_threshold_floor = floor;
        self
    }

    /// Sets the audio pull timeout.
    pub fn with_audio_pull_timeout(mut self, timeout: Duration) -> Self {
        self.audio_pull_timeout = timeout;
        self
    }

    /// Sets how many seconds of audio the ring holds.
    pub fn with_audio_ring_seconds(mut self, seconds: f64) -> Self {
        self.audio_ring_seconds = seconds;
        self
    }

    /// Sets the pacing mode.
    pub fn with_pacing(mut self, pacing: PacingMode) -> Self {
        self.pacing = pacing;
        self
    }

    /// Sets whether `tick` sleeps for the pacing delay.
    pub fn with_sleep_for_pacing(mut self, sleep: bool) -> Self {
        self.sleep_for_pacing = sleep;
        self
    }

    /// Sets the playback volume applied on start.
    pub fn with_initial_volume(mut self, volume: f32) -> Self {
        self.initial_volume = volume;
        self
    }

    /// Checks that every field is usable.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.frame_queue_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "frame_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.audio_pull_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "audio_pull_timeout must be positive".to_string(),
            ));
        }
        if !self.audio_ring_seconds.is_finite() || self.audio_ring_seconds <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "audio_ring_seconds must be positive, got {}",
                self.audio_ring_seconds
            )));
        }
        if !self.initial_volume.is_finite() || self.initial_volume < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "initial_volume must be non-negative, got {}",
                self.initial_volume
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.frame_queue_capacity, 60);
        assert_eq!(config.sync_threshold_floor, Duration::from_millis(20));
        assert_eq!(config.audio_pull_timeout, Duration::from_millis(10));
        assert_eq!(config.pacing, PacingMode::ClockDriven);
        assert!(config.sleep_for_pacing);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ring_covers_full_frame_queue() {
        let config = PipelineConfig::default();
        // 60 frames at 10 fps span 6s of stream time
        assert!((config.ring_seconds_for(10.0) - 7.0).abs() < 1e-9);
        // At 30 fps the queue spans 2s and the configured minimum wins
        assert_eq!(config.ring_seconds_for(30.0), DEFAULT_AUDIO_RING_SECONDS);
        assert_eq!(config.ring_seconds_for(0.0), DEFAULT_AUDIO_RING_SECONDS);
    }

    #[test]
    fn test_external_pacing_does_not_sleep() {
        assert!(!PipelineConfig::for_external_pacing().sleep_for_pacing);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            PipelineConfig::default().with_frame_queue_capacity(0),
            PipelineConfig::default().with_audio_pull_timeout(Duration::ZERO),
            PipelineConfig::default().with_audio_ring_seconds(0.0),
            PipelineConfig::default().with_audio_ring_seconds(f64::NAN),
            PipelineConfig::default().with_initial_volume(-0.5),
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(PipelineError::InvalidConfig(_))),
                "{config:?} should be rejected"
            );
        }
    }
}
