//! Container demuxing.
//!
//! A [`MediaBackend`] turns a [`MediaSource`] into a [`Demuxer`]: stream
//! metadata plus a sequence of compressed packets tagged audio or video, and
//! the decoders for both streams. Packets come out in the container's own
//! interleaving; nothing here reorders them.

use crate::audio_path::AudioDecoder;
use crate::error::{DecodeError, PipelineError};
use crate::source::MediaSource;
use crate::stream::{CompressedPacket, ProbedStreams, StreamPair};
use crate::video_path::VideoDecoder;

/// Opens media blobs. Implemented by decoding backends such as FFmpeg.
pub trait MediaBackend {
    /// Detects the container and probes its streams.
    ///
    /// Fails with [`PipelineError::UnsupportedContainer`] when no format
    /// matches and [`PipelineError::StreamProbeFailed`] when stream metadata
    /// cannot be resolved.
    fn open(&self, source: MediaSource) -> Result<Box<dyn Demuxer>, PipelineError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str {
        "unnamed"
    }
}

/// An opened container.
pub trait Demuxer {
    /// Streams found by the probe.
    fn streams(&self) -> &ProbedStreams;

    /// Reads the next packet of the selected audio or video stream.
    ///
    /// `Ok(None)` means the container is exhausted. Packets of other streams
    /// are skipped by the demuxer.
    fn read_packet(&mut self) -> Result<Option<CompressedPacket>, DecodeError>;

    /// Opens a decoder for the selected video stream.
    fn open_video_decoder(&mut self) -> Result<Box<dyn VideoDecoder>, PipelineError>;

    /// Opens a decoder for the selected audio stream.
    fn open_audio_decoder(&mut self) -> Result<Box<dyn AudioDecoder>, PipelineError>;
}

/// Checks that the probe found both streams and returns them as a pair.
pub fn require_streams(probed: &ProbedStreams) -> Result<StreamPair, PipelineError> {
    match (&probed.video, &probed.audio) {
        (Some(video), Some(audio)) => Ok(StreamPair {
            video: video.clone(),
            audio: audio.clone(),
            container_duration: probed.container_duration,
        }),
        (video, audio) => Err(PipelineError::MissingRequiredStream {
            has_audio: audio.is_some(),
            has_video: video.is_some(),
        }),
    }
}

/// Opens `source` with `backend` and checks both required streams exist.
pub fn open_streams(
    backend: &dyn MediaBackend,
    source: MediaSource,
) -> Result<(Box<dyn Demuxer>, StreamPair), PipelineError> {
    let size = source.size();
    let demuxer = backend.open(source)?;
    let pair = require_streams(demuxer.streams())?;

    tracing::info!(
        "Demuxer[{}]: {} bytes, video {} {}x{} @ {:.3} fps (tb {}), audio {} {} Hz {} ch (tb {})",
        backend.name(),
        size,
        pair.video.codec,
        pair.video.width,
        pair.video.height,
        pair.video.fps(),
        pair.video.time_base,
        pair.audio.codec,
        pair.audio.sample_rate,
        pair.audio.channels,
        pair.audio.time_base
    );
    Ok((demuxer, pair))
}

/// Packet cursor that latches end of stream.
///
/// Once the demuxer reports exhaustion, or fails to read, no further reads
/// are attempted.
pub struct PacketReader {
    demuxer: Box<dyn Demuxer>,
    exhausted: bool,
}

impl PacketReader {
    /// Wraps an opened demuxer.
    pub fn new(demuxer: Box<dyn Demuxer>) -> Self {
        Self {
            demuxer,
            exhausted: false,
        }
    }

    /// Returns true once the demuxer has no more packets.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Next packet, or `None` at (and forever after) end of stream.
    pub fn next_packet(&mut self) -> Option<CompressedPacket> {
        if self.exhausted {
            return None;
        }
        match self.demuxer.read_packet() {
            Ok(Some(packet)) => Some(packet),
            Ok(None) => {
                tracing::debug!("PacketReader: end of stream");
                self.exhausted = true;
                None
            }
            Err(e) => {
                tracing::warn!("PacketReader: read failed, treating as end of stream: {}", e);
                self.exhausted = true;
                None
            }
        }
    }
}

impl std::fmt::Debug for PacketReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketReader")
            .field("exhausted", &self.exhausted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;
    use crate::stream::{AudioStreamDescriptor, Rational, StreamKind, VideoStreamDescriptor};

    struct ListDemuxer {
        streams: ProbedStreams,
        packets: VecDeque<Result<Option<CompressedPacket>, DecodeError>>,
    }

    impl Demuxer for ListDemuxer {
        fn streams(&self) -> &ProbedStreams {
            &self.streams
        }

        fn read_packet(&mut self) -> Result<Option<CompressedPacket>, DecodeError> {
            self.packets.pop_front().unwrap_or(Ok(None))
        }

        fn open_video_decoder(&mut self) -> Result<Box<dyn VideoDecoder>, PipelineError> {
            Err(PipelineError::codec_open(StreamKind::Video, "not in this test"))
        }

        fn open_audio_decoder(&mut self) -> Result<Box<dyn AudioDecoder>, PipelineError> {
            Err(PipelineError::codec_open(StreamKind::Audio, "not in this test"))
        }
    }

    fn video() -> VideoStreamDescriptor {
        VideoStreamDescriptor {
            codec: "h264".to_string(),
            time_base: Rational::new(1, 25),
            duration: None,
            width: 16,
            height: 16,
            frame_rate: Rational::new(25, 1),
        }
    }

    fn audio() -> AudioStreamDescriptor {
        AudioStreamDescriptor {
            codec: "aac".to_string(),
            time_base: Rational::new(1, 48_000),
            duration: None,
            sample_rate: 48_000,
            channels: 2,
        }
    }

    #[test]
    fn test_require_streams() {
        let both = ProbedStreams {
            video: Some(video()),
            audio: Some(audio()),
            container_duration: Some(3.0),
        };
        let Ok(pair) = require_streams(&both) else {
            panic!("Expected stream pair");
        };
        assert_eq!(pair.container_duration, Some(3.0));

        let video_only = ProbedStreams {
            video: Some(video()),
            ..ProbedStreams::default()
        };
        assert!(matches!(
            require_streams(&video_only),
            Err(PipelineError::MissingRequiredStream {
                has_audio: false,
                has_video: true
            })
        ));

        assert!(matches!(
            require_streams(&ProbedStreams::default()),
            Err(PipelineError::MissingRequiredStream {
                has_audio: false,
                has_video: false
            })
        ));
    }

    #[test]
    fn test_reader_latches_end_of_stream_on_error() {
        let packets = VecDeque::from(vec![
            Ok(Some(CompressedPacket::new(StreamKind::Video, Some(0), vec![1]))),
            Err(DecodeError::Demux("truncated".to_string())),
            Ok(Some(CompressedPacket::new(StreamKind::Video, Some(1), vec![1]))),
        ]);
        let mut reader = PacketReader::new(Box::new(ListDemuxer {
            streams: ProbedStreams::default(),
            packets,
        }));

        assert!(reader.next_packet().is_some());
        assert!(reader.next_packet().is_none());
        assert!(reader.is_exhausted());
        assert!(reader.next_packet().is_none());
    }
}
