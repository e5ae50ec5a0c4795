//! cpal-backed [`AudioOutput`].
//!
//! Opens the default output device and drives the pipeline's [`PcmSource`]
//! from the device callback. The device runs at the stream's own sample rate
//! when one of its supported configs covers it. Otherwise it runs at its
//! default rate and the callback converts with linear interpolation, pulling
//! source-rate PCM so the audio clock keeps counting stream time.
//!
//! The stream is created paused and only pulls once [`PlaybackHandle::play`]
//! is called; until then the callback fills silence without touching the
//! source, so the audio clock stays at zero.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};

use crate::audio_ring::OUTPUT_FRAME_BYTES;
use crate::error::AudioOutputError;
use crate::output::{AudioOutput, AudioRegistration, PcmSource, PlaybackHandle};

/// Bytes reserved up front for the callback's PCM scratch buffer.
const INITIAL_SCRATCH_BYTES: usize = 4096 * OUTPUT_FRAME_BYTES;

/// Audio output on the system's default device.
#[derive(Debug, Default)]
pub struct CpalAudioOutput {
    _private: (),
}

impl CpalAudioOutput {
    /// Creates an output for the default host and device.
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioOutput for CpalAudioOutput {
    fn register(
        &mut self,
        registration: AudioRegistration,
        source: Arc<dyn PcmSource>,
    ) -> Result<Box<dyn PlaybackHandle>, AudioOutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioOutputError("No audio output device available".to_string()))?;

        let supported_config = device
            .default_output_config()
            .map_err(|e| AudioOutputError(format!("Failed to get default output config: {e}")))?;

        let sample_format = supported_config.sample_format();
        let device_channels = supported_config.channels().clamp(1, 2);
        let device_sample_rate = supported_config.sample_rate();

        if device_channels < registration.channels {
            tracing::warn!(
                "Audio device supports only {} channel(s), stereo will be downmixed",
                device_channels
            );
        }

        let output_rate = select_output_rate(
            registration.sample_rate,
            device_sample_rate,
            device_channels,
            sample_format,
            &supported_rate_ranges(&device),
        );
        if output_rate != registration.sample_rate {
            tracing::warn!(
                "Stream sample rate {}Hz not supported for {:?}/{}ch, resampling to device rate {}Hz",
                registration.sample_rate,
                sample_format,
                device_channels,
                output_rate
            );
        }

        let stream_config = cpal::StreamConfig {
            channels: device_channels,
            sample_rate: output_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let playing = Arc::new(AtomicBool::new(false));
        let volume = Arc::new(AtomicU32::new(1.0f32.to_bits()));
        let stream = build_stream(
            &device,
            &stream_config,
            sample_format,
            CallbackState {
                source,
                playing: playing.clone(),
                volume: volume.clone(),
                resampler: (output_rate != registration.sample_rate)
                    .then(|| LinearResampler::new(registration.sample_rate, output_rate)),
            },
        )
        .map_err(AudioOutputError)?;

        tracing::info!(
            "CpalAudioOutput: stream {}Hz (device {}Hz), {}ch, {:?}, ~{:.2}s",
            registration.sample_rate,
            output_rate,
            device_channels,
            sample_format,
            registration.approximate_duration
        );

        Ok(Box::new(CpalPlayback {
            stream,
            playing,
            volume,
        }))
    }
}

/// A supported output config range as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RateRange {
    channels: u16,
    sample_format: SampleFormat,
    min: u32,
    max: u32,
}

fn supported_rate_ranges(device: &cpal::Device) -> Vec<RateRange> {
    match device.supported_output_configs() {
        Ok(configs) => configs
            .map(|cfg| RateRange {
                channels: cfg.channels(),
                sample_format: cfg.sample_format(),
                min: cfg.min_sample_rate(),
                max: cfg.max_sample_rate(),
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to query supported output configs: {e}");
            Vec::new()
        }
    }
}

/// Picks the rate to open the device at: the stream's own rate when a
/// config with the same channels and sample format covers it, else the
/// device's default rate.
fn select_output_rate(
    stream_rate: u32,
    device_rate: u32,
    channels: u16,
    sample_format: SampleFormat,
    ranges: &[RateRange],
) -> u32 {
    if stream_rate == device_rate {
        return device_rate;
    }
    let covered = ranges.iter().any(|range| {
        range.channels == channels
            && range.sample_format == sample_format
            && (range.min..=range.max).contains(&stream_rate)
    });
    if covered {
        stream_rate
    } else {
        device_rate
    }
}

/// Linear-interpolating rate converter over stereo frames.
///
/// `phase` is the position between `current` and `next`, always in [0, 1).
#[derive(Debug)]
struct LinearResampler {
    /// Source frames per output frame
    step: f64,
    phase: f64,
    current: [f32; 2],
    next: [f32; 2],
    primed: bool,
}

impl LinearResampler {
    fn new(source_rate: u32, output_rate: u32) -> Self {
        Self {
            step: source_rate as f64 / output_rate.max(1) as f64,
            phase: 0.0,
            current: [0.0; 2],
            next: [0.0; 2],
            primed: false,
        }
    }

    /// Source frames that [`process`](Self::process) consumes for `out_frames`.
    fn source_frames_for(&self, out_frames: usize) -> usize {
        let advances = (self.phase + out_frames as f64 * self.step).floor() as usize;
        if self.primed {
            advances
        } else {
            advances + 2
        }
    }

    fn process(
        &mut self,
        mut source: impl Iterator<Item = [f32; 2]>,
        out_frames: usize,
        mut emit: impl FnMut([f32; 2]),
    ) {
        if !self.primed {
            self.current = source.next().unwrap_or([0.0; 2]);
            self.next = source.next().unwrap_or(self.current);
            self.primed = true;
        }
        for _ in 0..out_frames {
            let t = self.phase as f32;
            emit([
                self.current[0] + (self.next[0] - self.current[0]) * t,
                self.current[1] + (self.next[1] - self.current[1]) * t,
            ]);
            self.phase += self.step;
            while self.phase >= 1.0 {
                self.phase -= 1.0;
                self.current = self.next;
                self.next = source.next().unwrap_or(self.next);
            }
        }
    }
}

/// Everything the device callback owns.
struct CallbackState {
    source: Arc<dyn PcmSource>,
    playing: Arc<AtomicBool>,
    volume: Arc<AtomicU32>,
    resampler: Option<LinearResampler>,
}

/// Handle over a paused-until-played cpal stream.
struct CpalPlayback {
    stream: cpal::Stream,
    playing: Arc<AtomicBool>,
    volume: Arc<AtomicU32>,
}

impl PlaybackHandle for CpalPlayback {
    fn play(&mut self) {
        self.playing.store(true, Ordering::Release);
        if let Err(e) = self.stream.play() {
            tracing::error!("cpal stream play failed: {e}");
        }
    }

    fn stop(&mut self) {
        self.playing.store(false, Ordering::Release);
        // pause() is not supported everywhere; the playing flag covers it
        let _ = self.stream.pause();
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume.store(volume.max(0.0).to_bits(), Ordering::Relaxed);
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: SampleFormat,
    state: CallbackState,
) -> Result<cpal::Stream, String> {
    match sample_format {
        SampleFormat::I16 => build_stream_typed::<i16>(device, config, state),
        SampleFormat::I32 => build_stream_typed::<i32>(device, config, state),
        SampleFormat::U16 => build_stream_typed::<u16>(device, config, state),
        SampleFormat::F32 => build_stream_typed::<f32>(device, config, state),
        SampleFormat::F64 => build_stream_typed::<f64>(device, config, state),
        other => Err(format!("Unsupported output sample format: {other:?}")),
    }
}

#[inline]
fn s16_to_f32(lo: u8, hi: u8) -> f32 {
    i16::from_le_bytes([lo, hi]) as f32 / 32768.0
}

#[inline]
fn decode_frame(bytes: &[u8]) -> [f32; 2] {
    [s16_to_f32(bytes[0], bytes[1]), s16_to_f32(bytes[2], bytes[3])]
}

#[inline]
fn write_frame<T: SizedSample + FromSample<f32>>(frame: &mut [T], [left, right]: [f32; 2], vol: f32) {
    let (left, right) = (left * vol, right * vol);
    if frame.len() == 1 {
        frame[0] = T::from_sample((left + right) * 0.5);
        return;
    }
    frame[0] = T::from_sample(left);
    frame[1] = T::from_sample(right);
    for sample in frame.iter_mut().skip(2) {
        *sample = T::from_sample(0.0f32);
    }
}

fn build_stream_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut state: CallbackState,
) -> Result<cpal::Stream, String>
where
    T: SizedSample + FromSample<f32>,
{
    let output_channels = config.channels as usize;
    let mut scratch = vec![0u8; INITIAL_SCRATCH_BYTES];

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if !state.playing.load(Ordering::Acquire) {
                    data.fill(T::from_sample(0.0f32));
                    return;
                }

                let frames = data.len() / output_channels;
                let source_frames = match state.resampler.as_ref() {
                    Some(resampler) => resampler.source_frames_for(frames),
                    None => frames,
                };
                let needed = source_frames * OUTPUT_FRAME_BYTES;
                if scratch.len() < needed {
                    // Only on a buffer-size increase from the device
                    scratch.resize(needed, 0);
                }
                let pcm = &mut scratch[..needed];
                if !pcm.is_empty() {
                    state.source.pull_samples(pcm);
                }

                let vol = f32::from_bits(state.volume.load(Ordering::Relaxed));
                let mut out = data.chunks_mut(output_channels);
                let source = pcm.chunks_exact(OUTPUT_FRAME_BYTES).map(decode_frame);
                match state.resampler.as_mut() {
                    Some(resampler) => resampler.process(source, frames, |lr| {
                        if let Some(frame) = out.next() {
                            write_frame(frame, lr, vol);
                        }
                    }),
                    None => {
                        for (frame, lr) in out.zip(source) {
                            write_frame(frame, lr, vol);
                        }
                    }
                }
            },
            |err| tracing::error!("cpal audio error: {err}"),
            None,
        )
        .map_err(|e| format!("Failed to build cpal stream: {e}"))?;

    stream.pause().ok(); // Start paused
    Ok(stream)
}
