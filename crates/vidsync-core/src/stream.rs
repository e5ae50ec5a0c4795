//! Stream metadata and compressed packets produced by the demuxer.

use std::fmt;

/// Frame rate assumed when the container does not declare a usable one.
pub const FALLBACK_FRAME_RATE: f64 = 30.0;

/// Which elementary stream a packet or decoder belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// The audio stream
    Audio,
    /// The video stream
    Video,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Video => write!(f, "video"),
        }
    }
}

/// A rational number, used for time bases and frame rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    /// Numerator
    pub num: i32,
    /// Denominator
    pub den: i32,
}

impl Rational {
    /// Creates a new rational.
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Returns true if the value is finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// Returns the value as a float, or 0.0 for a zero denominator.
    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        self.num as f64 / self.den as f64
    }

    /// Converts a count of time-base ticks to seconds.
    pub fn ticks_to_seconds(&self, ticks: i64) -> f64 {
        ticks as f64 * self.as_f64()
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Immutable description of the video stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoStreamDescriptor {
    /// Codec name as reported by the backend
    pub codec: String,
    /// Time base of packet and frame timestamps
    pub time_base: Rational,
    /// Stream duration in time-base ticks, if known
    pub duration: Option<i64>,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Average frame rate
    pub frame_rate: Rational,
}

impl VideoStreamDescriptor {
    /// Frames per second, falling back to 30 when the container is vague.
    pub fn fps(&self) -> f64 {
        if self.frame_rate.is_valid() {
            self.frame_rate.as_f64()
        } else {
            FALLBACK_FRAME_RATE
        }
    }

    /// Duration of one frame in seconds.
    pub fn frame_interval(&self) -> f64 {
        1.0 / self.fps()
    }

    /// Stream duration in seconds, if known.
    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration
            .filter(|&d| d > 0)
            .map(|d| self.time_base.ticks_to_seconds(d))
    }
}

/// Immutable description of the audio stream.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioStreamDescriptor {
    /// Codec name as reported by the backend
    pub codec: String,
    /// Time base of packet timestamps
    pub time_base: Rational,
    /// Stream duration in time-base ticks, if known
    pub duration: Option<i64>,
    /// Native sample rate in Hz
    pub sample_rate: u32,
    /// Native channel count
    pub channels: u16,
}

impl AudioStreamDescriptor {
    /// Stream duration in seconds, if known.
    pub fn duration_seconds(&self) -> Option<f64> {
        self.duration
            .filter(|&d| d > 0)
            .map(|d| self.time_base.ticks_to_seconds(d))
    }
}

/// Streams found by a backend probe. Either may be missing.
#[derive(Debug, Clone, Default)]
pub struct ProbedStreams {
    /// Selected video stream, if any
    pub video: Option<VideoStreamDescriptor>,
    /// Selected audio stream, if any
    pub audio: Option<AudioStreamDescriptor>,
    /// Container-level duration in seconds, if known
    pub container_duration: Option<f64>,
}

/// The audio/video stream pair the pipeline requires.
#[derive(Debug, Clone)]
pub struct StreamPair {
    /// The video stream
    pub video: VideoStreamDescriptor,
    /// The audio stream
    pub audio: AudioStreamDescriptor,
    /// Container-level duration in seconds, if known
    pub container_duration: Option<f64>,
}

impl StreamPair {
    /// Approximate playback length handed to the audio output.
    ///
    /// Prefers the audio stream's own duration, then the container's.
    pub fn approximate_duration(&self) -> f64 {
        self.audio
            .duration_seconds()
            .or(self.container_duration)
            .unwrap_or(0.0)
    }
}

/// A compressed packet as read from the container.
///
/// Consumed by exactly one decode path and released right after.
#[derive(Clone)]
pub struct CompressedPacket {
    /// Stream this packet belongs to
    pub kind: StreamKind,
    /// Presentation timestamp in stream time-base ticks
    pub pts: Option<i64>,
    /// Decode timestamp in stream time-base ticks
    pub dts: Option<i64>,
    /// Whether the packet starts a keyframe
    pub keyframe: bool,
    /// Codec-specific payload
    pub data: Vec<u8>,
}

impl CompressedPacket {
    /// Creates a packet with only a kind, a PTS and a payload.
    pub fn new(kind: StreamKind, pts: Option<i64>, data: Vec<u8>) -> Self {
        Self {
            kind,
            pts,
            dts: None,
            keyframe: false,
            data,
        }
    }
}

impl fmt::Debug for CompressedPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressedPacket")
            .field("kind", &self.kind)
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("keyframe", &self.keyframe)
            .field("data_len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(frame_rate: Rational) -> VideoStreamDescriptor {
        VideoStreamDescriptor {
            codec: "h264".to_string(),
            time_base: Rational::new(1, 90_000),
            duration: Some(900_000),
            width: 640,
            height: 360,
            frame_rate,
        }
    }

    #[test]
    fn test_rational_ticks_to_seconds() {
        let tb = Rational::new(1, 90_000);
        assert!((tb.ticks_to_seconds(45_000) - 0.5).abs() < 1e-9);
        assert_eq!(Rational::new(1, 0).as_f64(), 0.0);
    }

    #[test]
    fn test_fps_fallback() {
        assert!((video(Rational::new(24_000, 1001)).fps() - 23.976).abs() < 0.001);
        assert_eq!(video(Rational::new(0, 1)).fps(), FALLBACK_FRAME_RATE);
        assert_eq!(video(Rational::new(25, 0)).fps(), FALLBACK_FRAME_RATE);
    }

    #[test]
    fn test_video_duration_seconds() {
        assert_eq!(video(Rational::new(30, 1)).duration_seconds(), Some(10.0));
    }

    #[test]
    fn test_approximate_duration_prefers_audio() {
        let audio = AudioStreamDescriptor {
            codec: "aac".to_string(),
            time_base: Rational::new(1, 48_000),
            duration: Some(96_000),
            sample_rate: 48_000,
            channels: 2,
        };
        let mut pair = StreamPair {
            video: video(Rational::new(30, 1)),
            audio,
            container_duration: Some(9.0),
        };
        assert_eq!(pair.approximate_duration(), 2.0);

        pair.audio.duration = None;
        assert_eq!(pair.approximate_duration(), 9.0);

        pair.container_duration = None;
        assert_eq!(pair.approximate_duration(), 0.0);
    }
}
