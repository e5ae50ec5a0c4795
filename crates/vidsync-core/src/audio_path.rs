//! Audio decode path: packets in, stereo S16 PCM into the ring.

use std::sync::Arc;

use crate::audio_ring::{AudioRing, OUTPUT_CHANNELS, OUTPUT_FRAME_BYTES};
use crate::error::DecodeError;
use crate::stats::PipelineStats;
use crate::stream::CompressedPacket;

/// Decoded audio as the decoder hands it out: interleaved f32 samples.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrameRef<'a> {
    /// Interleaved samples, `channels` per frame
    pub samples: &'a [f32],
    /// Interleaved channel count
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

/// Receives decoded audio frames.
pub type AudioSink<'s> = dyn FnMut(AudioFrameRef<'_>) + 's;

/// An audio decoder supplied by a media backend.
pub trait AudioDecoder {
    /// Decodes one packet, passing every frame it completes to `sink`.
    fn decode(&mut self, packet: &CompressedPacket, sink: &mut AudioSink<'_>) -> Result<(), DecodeError>;

    /// Signals end of stream and passes any buffered frames to `sink`.
    fn flush(&mut self, sink: &mut AudioSink<'_>) -> Result<(), DecodeError> {
        let _ = sink;
        Ok(())
    }
}

/// Converts decoded f32 audio to interleaved stereo signed 16-bit little-endian.
///
/// Mono is duplicated into both channels. Beyond two channels only the front
/// pair is kept. The sample rate is passed through unchanged and must match
/// the rate the output was registered with.
#[derive(Debug)]
pub struct PcmConverter {
    sample_rate: u32,
    out: Vec<u8>,
}

impl PcmConverter {
    /// Creates a converter for audio at `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            out: Vec::new(),
        }
    }

    /// Converts one frame. The returned bytes stay valid until the next call.
    pub fn convert(&mut self, frame: AudioFrameRef<'_>) -> Result<&[u8], DecodeError> {
        if frame.channels == 0 {
            return Err(DecodeError::UnsupportedAudio("zero channels".to_string()));
        }
        if frame.sample_rate != self.sample_rate {
            return Err(DecodeError::UnsupportedAudio(format!(
                "sample rate changed from {} Hz to {} Hz",
                self.sample_rate, frame.sample_rate
            )));
        }

        let channels = frame.channels as usize;
        let frames = frame.samples.len() / channels;
        self.out.clear();
        self.out.reserve(frames * OUTPUT_FRAME_BYTES);

        for chunk in frame.samples.chunks_exact(channels) {
            let left = chunk[0];
            let right = if channels == 1 { chunk[0] } else { chunk[1] };
            self.out.extend_from_slice(&to_s16(left).to_le_bytes());
            self.out.extend_from_slice(&to_s16(right).to_le_bytes());
        }
        Ok(&self.out)
    }
}

#[inline]
fn to_s16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Turns decoded audio into PCM bytes in the shared ring.
pub struct AudioDecodePath {
    decoder: Box<dyn AudioDecoder>,
    converter: PcmConverter,
    ring: Arc<AudioRing>,
    stats: Arc<PipelineStats>,
}

impl AudioDecodePath {
    /// Wraps a decoder producing audio at `sample_rate`.
    pub fn new(
        decoder: Box<dyn AudioDecoder>,
        sample_rate: u32,
        ring: Arc<AudioRing>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        tracing::debug!(
            "AudioDecodePath: converting to {} Hz, {} ch, s16",
            sample_rate,
            OUTPUT_CHANNELS
        );
        Self {
            decoder,
            converter: PcmConverter::new(sample_rate),
            ring,
            stats,
        }
    }

    /// Decodes one packet and appends the converted audio to the ring.
    pub fn feed(&mut self, packet: &CompressedPacket) -> Result<(), DecodeError> {
        let converter = &mut self.converter;
        let ring = &self.ring;
        let stats = &self.stats;
        let mut sink = |frame: AudioFrameRef<'_>| append(frame, converter, ring, stats);
        self.decoder.decode(packet, &mut sink)
    }

    /// Drains the decoder at end of stream into the ring.
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        let converter = &mut self.converter;
        let ring = &self.ring;
        let stats = &self.stats;
        let mut sink = |frame: AudioFrameRef<'_>| append(frame, converter, ring, stats);
        self.decoder.flush(&mut sink)
    }
}

fn append(frame: AudioFrameRef<'_>, converter: &mut PcmConverter, ring: &AudioRing, stats: &PipelineStats) {
    match converter.convert(frame) {
        Ok(pcm) => {
            ring.append(pcm);
        }
        Err(e) => {
            PipelineStats::bump(&stats.packets_skipped);
            tracing::warn!("AudioDecodePath: dropped audio frame: {}", e);
        }
    }
}
