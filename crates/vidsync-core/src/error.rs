//! Error types for pipeline construction and per-packet decoding.
//!
//! Only construction can fail from the caller's point of view. Everything
//! that goes wrong after the pipeline is built is a [`DecodeError`], which the
//! decode paths log, count and skip.

use thiserror::Error;

use crate::stream::StreamKind;

/// Fatal errors raised while constructing a pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The byte source is empty or could not be read.
    #[error("media source unreadable: {0}")]
    SourceUnreadable(String),

    /// No container format matched the byte stream.
    #[error("unsupported container: {0}")]
    UnsupportedContainer(String),

    /// Stream metadata could not be resolved.
    #[error("stream probe failed: {0}")]
    StreamProbeFailed(String),

    /// The container lacks an audio stream, a video stream, or both.
    #[error("missing required stream (audio present: {has_audio}, video present: {has_video})")]
    MissingRequiredStream {
        /// Whether an audio stream was found
        has_audio: bool,
        /// Whether a video stream was found
        has_video: bool,
    },

    /// A decoder (or the audio converter) could not be opened.
    #[error("failed to open {kind} decoder: {reason}")]
    CodecOpen {
        /// Which stream the decoder was for
        kind: StreamKind,
        /// Backend-provided reason
        reason: String,
    },

    /// The audio output collaborator refused the stream registration.
    #[error("audio registration failed: {0}")]
    AudioRegistration(String),

    /// The pipeline configuration is unusable.
    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Convenience constructor for [`PipelineError::CodecOpen`].
    pub fn codec_open(kind: StreamKind, reason: impl Into<String>) -> Self {
        Self::CodecOpen {
            kind,
            reason: reason.into(),
        }
    }
}

/// Refusal from an [`AudioOutput`](crate::output::AudioOutput) collaborator.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct AudioOutputError(pub String);

impl From<AudioOutputError> for PipelineError {
    fn from(err: AudioOutputError) -> Self {
        PipelineError::AudioRegistration(err.0)
    }
}

/// Non-fatal failure of a single decode step.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The decoder rejected the packet or failed to produce output.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The decoder produced a picture that is not planar YUV 4:2:0.
    #[error("unsupported pixel format: {0}")]
    UnsupportedPixelFormat(String),

    /// Decoded audio has a shape the converter cannot handle.
    #[error("unsupported audio layout: {0}")]
    UnsupportedAudio(String),

    /// The demuxer failed to read the next packet.
    #[error("demux read failed: {0}")]
    Demux(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_stream_display() {
        let err = PipelineError::MissingRequiredStream {
            has_audio: false,
            has_video: true,
        };
        let msg = err.to_string();
        assert!(msg.contains("audio present: false"));
        assert!(msg.contains("video present: true"));
    }

    #[test]
    fn test_codec_open_display() {
        let err = PipelineError::codec_open(StreamKind::Video, "no decoder for hevc");
        assert_eq!(
            err.to_string(),
            "failed to open video decoder: no decoder for hevc"
        );
    }
}
