//! vidsync-core: Media decode and A/V synchronization pipeline.
//!
//! Turns a fully loaded media blob into video frames presented in lockstep
//! with an independently running audio clock. It contains:
//!
//! - Input: [`source`], [`stream`], [`demux`]
//! - Decode paths: [`audio_path`], [`video_path`]
//! - Buffering: [`audio_ring`], [`frame_queue`]
//! - Sync and presentation: [`clock`], [`pacing`], [`pipeline`]
//! - Collaborator seams: [`output`]
//!
//! Decoding backends plug in through [`demux::MediaBackend`]; the renderer and
//! the audio device plug in through [`output::PresentationTarget`] and
//! [`output::AudioOutput`]. Concrete implementations live behind features:
//!
//! - `ffmpeg`: [`ffmpeg::FfmpegBackend`], demuxing and decoding with FFmpeg
//! - `cpal`: [`cpal_output::CpalAudioOutput`], audio output through cpal
//!
//! The crate never installs a tracing subscriber.

pub mod audio_path;
pub mod audio_ring;
pub mod clock;
pub mod config;
pub mod demux;
pub mod error;
pub mod frame_queue;
pub mod output;
pub mod pacing;
pub mod pipeline;
pub mod source;
pub mod stats;
pub mod stream;
pub mod video_path;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

#[cfg(feature = "cpal")]
pub mod cpal_output;

pub use config::PipelineConfig;
pub use error::{AudioOutputError, DecodeError, PipelineError};
pub use output::{
    AudioOutput, AudioRegistration, FillResult, PcmSource, PlaybackHandle, PresentationTarget,
    TargetDescriptor, TargetFormat,
};
pub use pacing::PacingMode;
pub use pipeline::{MediaPipeline, PresenterState, TickOutcome};
pub use source::MediaSource;
pub use stats::StatsSnapshot;
