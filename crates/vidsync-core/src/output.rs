//! Seams to the rendering and audio collaborators.
//!
//! The pipeline never creates GPU resources or opens an audio device. A
//! [`PresentationTarget`] accepts planar image writes, and an [`AudioOutput`]
//! accepts a pull-based PCM source and hands back a [`PlaybackHandle`].

use std::sync::Arc;

use crate::error::AudioOutputError;
use crate::frame_queue::{yuv420p_len, VideoFrame};

/// Pixel format of a presentation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
    /// Single-channel 8-bit unsigned normalized
    R8Unorm,
    /// Four-channel 8-bit unsigned normalized
    Rgba8Unorm,
    /// Anything else the renderer exposes
    Other,
}

/// What a presentation target declares about its storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDescriptor {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Texel format
    pub format: TargetFormat,
}

impl TargetDescriptor {
    /// The descriptor a target needs to accept `width × height` YUV 4:2:0
    /// frames: one R8 texture, `height · 3/2` rows tall.
    pub fn yuv420p(width: u32, height: u32) -> Self {
        Self {
            width,
            height: height * 3 / 2,
            format: TargetFormat::R8Unorm,
        }
    }
}

/// A GPU-visible image the presenter writes decoded frames into.
pub trait PresentationTarget {
    /// Dimensions and format of the target.
    fn descriptor(&self) -> TargetDescriptor;

    /// Writes the packed planar image. `row_pitch` is the byte length of one
    /// row, equal to the frame width.
    fn write_planar(&mut self, data: &[u8], row_pitch: usize);

    /// Schedules a draw of the target. Optional.
    fn submit_draw(&mut self) {}
}

/// Why an upload was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadRejected {
    /// What the target declared
    pub target: TargetDescriptor,
    /// What the frame needed
    pub required: TargetDescriptor,
}

impl std::fmt::Display for UploadRejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "target is {}x{} {:?}, frame needs {}x{} {:?}",
            self.target.width,
            self.target.height,
            self.target.format,
            self.required.width,
            self.required.height,
            self.required.format
        )
    }
}

/// Writes a frame into the target if the target's layout matches exactly.
pub fn upload_frame(
    target: &mut dyn PresentationTarget,
    frame: &VideoFrame,
) -> Result<(), UploadRejected> {
    let required = TargetDescriptor::yuv420p(frame.width(), frame.height());
    let declared = target.descriptor();
    if declared != required || frame.planar_bytes().len() != yuv420p_len(frame.width(), frame.height()) {
        return Err(UploadRejected {
            target: declared,
            required,
        });
    }

    target.write_planar(frame.planar_bytes(), frame.width() as usize);
    target.submit_draw();
    Ok(())
}

/// Outcome of one audio pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillResult {
    /// The whole buffer holds real audio.
    Filled,
    /// `copied` bytes of real audio, the rest is silence.
    Partial {
        /// Bytes of real audio at the start of the buffer
        copied: usize,
    },
    /// No audio arrived in time; the buffer is silence.
    Silence,
}

impl FillResult {
    /// Bytes of real audio written, given the buffer length.
    pub fn bytes_copied(&self, buffer_len: usize) -> usize {
        match self {
            FillResult::Filled => buffer_len,
            FillResult::Partial { copied } => *copied,
            FillResult::Silence => 0,
        }
    }
}

/// Pull-based source of interleaved 16-bit PCM.
///
/// Called from the audio backend's thread. Implementations must not block
/// for longer than a short bounded wait and must not allocate.
pub trait PcmSource: Send + Sync {
    /// Fills `buf` completely, with silence where no audio is available.
    fn pull_samples(&self, buf: &mut [u8]) -> FillResult;
}

/// Stream parameters handed to the audio output on registration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioRegistration {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Approximate playback length in seconds (0.0 when unknown)
    pub approximate_duration: f64,
}

/// Control over a registered audio stream.
pub trait PlaybackHandle {
    /// Starts (or resumes) pulling from the source.
    fn play(&mut self);

    /// Stops pulling from the source.
    fn stop(&mut self);

    /// Sets the output volume, 1.0 being unity gain.
    fn set_volume(&mut self, volume: f32);
}

/// The audio backend collaborator.
pub trait AudioOutput {
    /// Registers a streamed sound fed by `source`. Playback does not start
    /// until [`PlaybackHandle::play`] is called.
    fn register(
        &mut self,
        registration: AudioRegistration,
        source: Arc<dyn PcmSource>,
    ) -> Result<Box<dyn PlaybackHandle>, AudioOutputError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_queue::FrameQueue;

    struct Target {
        descriptor: TargetDescriptor,
        writes: Vec<(usize, usize)>,
        draws: usize,
    }

    impl PresentationTarget for Target {
        fn descriptor(&self) -> TargetDescriptor {
            self.descriptor
        }

        fn write_planar(&mut self, data: &[u8], row_pitch: usize) {
            self.writes.push((data.len(), row_pitch));
        }

        fn submit_draw(&mut self) {
            self.draws += 1;
        }
    }

    fn queued_frame() -> FrameQueue {
        let mut queue = FrameQueue::new(1, 8, 4);
        let result = queue.try_push_with(0.0, 8, 4, |planes| {
            planes.y.fill(16);
            Ok(())
        });
        assert!(result.is_ok());
        queue
    }

    #[test]
    fn test_descriptor_for_yuv420p() {
        let desc = TargetDescriptor::yuv420p(1280, 720);
        assert_eq!(desc.height, 1080);
        assert_eq!(desc.format, TargetFormat::R8Unorm);
    }

    #[test]
    fn test_upload_matching_target() {
        let queue = queued_frame();
        let Some(frame) = queue.front() else {
            panic!("Expected frame");
        };
        let mut target = Target {
            descriptor: TargetDescriptor::yuv420p(8, 4),
            writes: Vec::new(),
            draws: 0,
        };

        assert!(upload_frame(&mut target, frame).is_ok());
        assert_eq!(target.writes, vec![(48, 8)]);
        assert_eq!(target.draws, 1);
    }

    #[test]
    fn test_upload_rejects_mismatch() {
        let queue = queued_frame();
        let Some(frame) = queue.front() else {
            panic!("Expected frame");
        };
        let mismatched = [
            TargetDescriptor::yuv420p(16, 4),
            TargetDescriptor {
                width: 8,
                height: 4,
                format: TargetFormat::R8Unorm,
            },
            TargetDescriptor {
                format: TargetFormat::Rgba8Unorm,
                ..TargetDescriptor::yuv420p(8, 4)
            },
        ];
        for descriptor in mismatched {
            let mut target = Target {
                descriptor,
                writes: Vec::new(),
                draws: 0,
            };
            assert!(upload_frame(&mut target, frame).is_err());
            assert!(target.writes.is_empty());
            assert_eq!(target.draws, 0);
        }
    }

    #[test]
    fn test_fill_result_bytes_copied() {
        assert_eq!(FillResult::Filled.bytes_copied(64), 64);
        assert_eq!(FillResult::Partial { copied: 10 }.bytes_copied(64), 10);
        assert_eq!(FillResult::Silence.bytes_copied(64), 0);
    }
}
