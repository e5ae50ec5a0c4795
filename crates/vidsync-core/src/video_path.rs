//! Video decode path: packets in, PTS-stamped frames into the queue.
//!
//! Decoding never waits for the presenter. A frame decoded while the queue is
//! full is discarded on the spot.

use std::sync::Arc;

use crate::error::DecodeError;
use crate::frame_queue::{FrameQueue, PlanesMut, PushOutcome};
use crate::stats::PipelineStats;
use crate::stream::{CompressedPacket, Rational};

/// Pixel layout of a decoded picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Planar Y, U, V with 2x2 chroma subsampling
    Yuv420p,
    /// Y plane plus interleaved UV plane
    Nv12,
    /// Packed RGBA
    Rgba,
    /// Anything else
    Other,
}

/// One plane of a decoded picture, borrowed from the decoder.
#[derive(Debug, Clone, Copy)]
pub struct PlaneRef<'a> {
    /// Plane bytes, `stride` per row
    pub data: &'a [u8],
    /// Bytes between the starts of consecutive rows
    pub stride: usize,
}

impl<'a> PlaneRef<'a> {
    /// A plane with no data, for formats with fewer than three planes.
    pub const EMPTY: PlaneRef<'static> = PlaneRef { data: &[], stride: 0 };

    /// Creates a plane view.
    pub fn new(data: &'a [u8], stride: usize) -> Self {
        Self { data, stride }
    }
}

/// A decoded picture as the decoder hands it out. Only valid during the sink
/// call; the video path copies what it keeps.
#[derive(Debug, Clone, Copy)]
pub struct PictureRef<'a> {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel layout of `planes`
    pub format: PixelFormat,
    /// Up to three planes; unused ones are [`PlaneRef::EMPTY`]
    pub planes: [PlaneRef<'a>; 3],
    /// Timestamp stamped on the frame, in stream time-base ticks
    pub pts: Option<i64>,
    /// Decoder's best-effort timestamp, in stream time-base ticks
    pub best_effort_timestamp: Option<i64>,
}

impl PictureRef<'_> {
    /// The frame's own timestamp, else the best-effort one.
    pub fn resolved_timestamp(&self) -> Option<i64> {
        self.pts.or(self.best_effort_timestamp)
    }
}

/// Receives decoded pictures.
pub type PictureSink<'s> = dyn FnMut(PictureRef<'_>) + 's;

/// A video decoder supplied by a media backend.
pub trait VideoDecoder {
    /// Decodes one packet, passing every picture it completes to `sink`.
    fn decode(
        &mut self,
        packet: &CompressedPacket,
        sink: &mut PictureSink<'_>,
    ) -> Result<(), DecodeError>;

    /// Signals end of stream and passes any buffered pictures to `sink`.
    fn flush(&mut self, sink: &mut PictureSink<'_>) -> Result<(), DecodeError> {
        let _ = sink;
        Ok(())
    }
}

/// Copies `rows` rows of `row_len` bytes from a strided plane into a packed one.
fn copy_plane(
    dst: &mut [u8],
    src: PlaneRef<'_>,
    row_len: usize,
    rows: usize,
    name: &str,
) -> Result<(), DecodeError> {
    if row_len == 0 || rows == 0 {
        return Ok(());
    }
    let needed = src.stride * (rows - 1) + row_len;
    if src.stride < row_len || src.data.len() < needed {
        return Err(DecodeError::Decode(format!(
            "{name} plane too small: {} bytes, stride {}, need {} rows of {}",
            src.data.len(),
            src.stride,
            rows,
            row_len
        )));
    }
    for (row, dst_row) in dst.chunks_exact_mut(row_len).take(rows).enumerate() {
        let start = row * src.stride;
        dst_row.copy_from_slice(&src.data[start..start + row_len]);
    }
    Ok(())
}

/// Packs a YUV 4:2:0 picture into a queue slot.
fn write_yuv420p(picture: &PictureRef<'_>, planes: PlanesMut<'_>) -> Result<(), DecodeError> {
    let (w, h) = (picture.width as usize, picture.height as usize);
    let [y, u, v] = picture.planes;
    copy_plane(planes.y, y, w, h, "Y")?;
    copy_plane(planes.u, u, w / 2, h / 2, "U")?;
    copy_plane(planes.v, v, w / 2, h / 2, "V")?;
    Ok(())
}

/// Turns decoded pictures into queued frames.
pub struct VideoDecodePath {
    decoder: Box<dyn VideoDecoder>,
    time_base: Rational,
    stats: Arc<PipelineStats>,
}

impl VideoDecodePath {
    /// Wraps a decoder whose timestamps are in `time_base` ticks.
    pub fn new(decoder: Box<dyn VideoDecoder>, time_base: Rational, stats: Arc<PipelineStats>) -> Self {
        Self {
            decoder,
            time_base,
            stats,
        }
    }

    /// Decodes one packet and enqueues the pictures the queue has room for.
    pub fn feed(&mut self, packet: &CompressedPacket, queue: &mut FrameQueue) -> Result<(), DecodeError> {
        let time_base = self.time_base;
        let stats = &self.stats;
        let mut sink = |picture: PictureRef<'_>| enqueue(picture, time_base, queue, stats);
        self.decoder.decode(packet, &mut sink)
    }

    /// Drains the decoder at end of stream through the same enqueue policy.
    pub fn finish(&mut self, queue: &mut FrameQueue) -> Result<(), DecodeError> {
        let time_base = self.time_base;
        let stats = &self.stats;
        let mut sink = |picture: PictureRef<'_>| enqueue(picture, time_base, queue, stats);
        self.decoder.flush(&mut sink)
    }
}

fn enqueue(picture: PictureRef<'_>, time_base: Rational, queue: &mut FrameQueue, stats: &PipelineStats) {
    PipelineStats::bump(&stats.frames_decoded);

    if picture.format != PixelFormat::Yuv420p {
        PipelineStats::bump(&stats.packets_skipped);
        let err = DecodeError::UnsupportedPixelFormat(format!("{:?}", picture.format));
        tracing::warn!("VideoDecodePath: skipping picture: {}", err);
        return;
    }

    let pts = picture
        .resolved_timestamp()
        .map(|ticks| time_base.ticks_to_seconds(ticks))
        .unwrap_or(0.0);

    match queue.try_push_with(pts, picture.width, picture.height, |planes| {
        write_yuv420p(&picture, planes)
    }) {
        Ok(PushOutcome::Queued) => {
            tracing::trace!("VideoDecodePath: queued frame pts={:.3}s ({} queued)", pts, queue.len());
        }
        Ok(PushOutcome::Full) => {
            PipelineStats::bump(&stats.frames_dropped_backpressure);
            tracing::debug!("VideoDecodePath: queue full, dropped frame pts={:.3}s", pts);
        }
        Err(e) => {
            PipelineStats::bump(&stats.packets_skipped);
            tracing::warn!("VideoDecodePath: dropped frame pts={:.3}s: {}", pts, e);
        }
    }
}
