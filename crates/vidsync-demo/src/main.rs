//! vidsync Demo Application
//!
//! Plays a media file headlessly: video frames are "uploaded" into a counting
//! target while audio goes to the default output device. Useful for watching
//! the A/V-sync decisions in the logs:
//!
//! ```bash
//! RUST_LOG=vidsync_core=trace cargo run -p vidsync-demo --features ffmpeg,cpal -- movie.mkv
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use vidsync_core::{
    MediaSource, PacingMode, PipelineConfig, PresentationTarget, TargetDescriptor, TickOutcome,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Pacing {
    /// Wait for the audio clock to reach the next frame
    Clock,
    /// 80% of a frame interval after every present
    Fixed,
    /// No delay
    Off,
}

impl From<Pacing> for PacingMode {
    fn from(pacing: Pacing) -> Self {
        match pacing {
            Pacing::Clock => PacingMode::ClockDriven,
            Pacing::Fixed => PacingMode::Fixed,
            Pacing::Off => PacingMode::Off,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "vidsync-demo", about = "Headless A/V-synced playback of a media file")]
struct Args {
    /// Media file to play
    path: PathBuf,

    /// Frame queue capacity
    #[arg(long, default_value_t = 60)]
    queue: usize,

    /// Pacing after each presented frame
    #[arg(long, value_enum, default_value_t = Pacing::Clock)]
    pacing: Pacing,

    /// Initial playback volume
    #[arg(long, default_value_t = 1.0)]
    volume: f32,

    /// Stop after this many ticks
    #[arg(long)]
    max_ticks: Option<u64>,
}

/// Stands in for a GPU texture: checks layout, counts bytes.
#[cfg_attr(not(all(feature = "ffmpeg", feature = "cpal")), allow(dead_code))]
struct HeadlessTarget {
    descriptor: TargetDescriptor,
    uploads: u64,
    bytes: u64,
}

impl PresentationTarget for HeadlessTarget {
    fn descriptor(&self) -> TargetDescriptor {
        self.descriptor
    }

    fn write_planar(&mut self, data: &[u8], _row_pitch: usize) {
        self.uploads += 1;
        self.bytes += data.len() as u64;
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("vidsync_core=info".parse()?)
                .add_directive("vidsync_demo=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let blob = std::fs::read(&args.path).with_context(|| format!("reading {}", args.path.display()))?;
    let source = MediaSource::new(blob)?;

    let config = PipelineConfig::default()
        .with_frame_queue_capacity(args.queue)
        .with_pacing(args.pacing.into())
        .with_initial_volume(args.volume);

    play(source, config, args.max_ticks)
}

#[cfg(all(feature = "ffmpeg", feature = "cpal"))]
fn play(source: MediaSource, config: PipelineConfig, max_ticks: Option<u64>) -> anyhow::Result<()> {
    use vidsync_core::cpal_output::CpalAudioOutput;
    use vidsync_core::ffmpeg::FfmpegBackend;
    use vidsync_core::MediaPipeline;

    let backend = FfmpegBackend::new();
    let mut audio = CpalAudioOutput::new();
    let mut pipeline = MediaPipeline::new(source, &backend, &mut audio, config)?;

    let video = &pipeline.streams().video;
    tracing::info!(
        "Playing {} {}x{} @ {:.2} fps, {} Hz audio",
        video.codec,
        video.width,
        video.height,
        video.fps(),
        pipeline.streams().audio.sample_rate
    );
    let mut target = HeadlessTarget {
        descriptor: TargetDescriptor::yuv420p(video.width, video.height),
        uploads: 0,
        bytes: 0,
    };

    let mut ticks = 0u64;
    loop {
        match pipeline.tick(&mut target) {
            TickOutcome::Ended => break,
            TickOutcome::Idle => std::thread::sleep(std::time::Duration::from_millis(1)),
            TickOutcome::DroppedLate { pts, lateness } => {
                tracing::debug!("late frame {:.3}s ({:.0} ms behind)", pts, lateness * 1000.0);
            }
            TickOutcome::Presented { .. } | TickOutcome::Rejected { .. } => {}
        }
        ticks += 1;
        if max_ticks.is_some_and(|max| ticks >= max) {
            tracing::info!("Stopping after {} ticks", ticks);
            break;
        }
    }

    let stats = pipeline.stats();
    println!(
        "ticks={} uploads={} ({} bytes) presented={} dropped={} (late {}, backpressure {}, rejected {}) silent_pulls={} clock={:.3}s",
        ticks,
        target.uploads,
        target.bytes,
        stats.frames_presented,
        stats.frames_dropped(),
        stats.frames_dropped_late,
        stats.frames_dropped_backpressure,
        stats.uploads_rejected,
        stats.silent_pulls,
        pipeline.audio_clock().seconds()
    );
    Ok(())
}

#[cfg(not(all(feature = "ffmpeg", feature = "cpal")))]
fn play(_source: MediaSource, _config: PipelineConfig, _max_ticks: Option<u64>) -> anyhow::Result<()> {
    anyhow::bail!("vidsync-demo was built without a media backend; rebuild with --features ffmpeg,cpal")
}
