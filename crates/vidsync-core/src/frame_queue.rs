//! Fixed-capacity queue of decoded video frames.
//!
//! Frames live in a ring of pre-allocated slots. A slot's pixel buffer is
//! reused for every frame that lands in it, so steady-state decoding does not
//! allocate, and the capacity bound is the length of the slot array rather
//! than a counter that has to be kept in step with the queue.
//!
//! The queue is owned by the render thread (decode steps run there too), so it
//! needs no lock. Moving decoding to another thread means wrapping it in one.

use crate::error::DecodeError;

/// Default number of decoded frames held ahead of presentation.
pub const DEFAULT_FRAME_QUEUE_CAPACITY: usize = 60;

/// Size in bytes of a packed planar YUV 4:2:0 image.
///
/// Luma is `width × height`, each chroma plane `width/2 × height/2`.
pub fn yuv420p_len(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    w * h + 2 * (w / 2) * (h / 2)
}

/// A decoded frame held in a queue slot.
///
/// The Y, U and V planes are stored back to back with no row padding, which
/// is exactly the layout the presentation target expects.
#[derive(Debug, Clone, Default)]
pub struct VideoFrame {
    pts: f64,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl VideoFrame {
    /// Presentation timestamp in seconds.
    pub fn pts(&self) -> f64 {
        self.pts
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The whole packed Y+U+V buffer.
    pub fn planar_bytes(&self) -> &[u8] {
        &self.data
    }

    fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn chroma_len(&self) -> usize {
        (self.width as usize / 2) * (self.height as usize / 2)
    }

    /// Luma plane.
    pub fn y(&self) -> &[u8] {
        &self.data[..self.luma_len()]
    }

    /// First chroma plane.
    pub fn u(&self) -> &[u8] {
        let start = self.luma_len();
        &self.data[start..start + self.chroma_len()]
    }

    /// Second chroma plane.
    pub fn v(&self) -> &[u8] {
        let start = self.luma_len() + self.chroma_len();
        &self.data[start..start + self.chroma_len()]
    }

    /// Reshapes the slot for a new frame and hands out mutable planes.
    fn prepare(&mut self, pts: f64, width: u32, height: u32) -> PlanesMut<'_> {
        self.pts = pts;
        self.width = width;
        self.height = height;
        self.data.resize(yuv420p_len(width, height), 0);

        let luma = self.luma_len();
        let chroma = self.chroma_len();
        let (y, rest) = self.data.split_at_mut(luma);
        let (u, v) = rest.split_at_mut(chroma);
        PlanesMut { y, u, v }
    }
}

/// Mutable views of a slot's three planes, handed to the frame writer.
pub struct PlanesMut<'a> {
    /// Luma, `width × height`
    pub y: &'a mut [u8],
    /// First chroma plane, `width/2 × height/2`
    pub u: &'a mut [u8],
    /// Second chroma plane, `width/2 × height/2`
    pub v: &'a mut [u8],
}

/// Outcome of offering a frame to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The frame now occupies a slot.
    Queued,
    /// Every slot is taken; the frame was not stored.
    Full,
}

/// FIFO of decoded frames backed by a fixed slot ring.
pub struct FrameQueue {
    slots: Box<[VideoFrame]>,
    /// Index of the oldest occupied slot
    head: usize,
    /// Number of occupied slots
    len: usize,
}

impl FrameQueue {
    /// Creates a queue with `capacity` slots, each pre-sized for a
    /// `width × height` frame.
    pub fn new(capacity: usize, width: u32, height: u32) -> Self {
        let slot_len = yuv420p_len(width, height);
        let slots = (0..capacity.max(1))
            .map(|_| VideoFrame {
                pts: 0.0,
                width,
                height,
                data: vec![0; slot_len],
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            head: 0,
            len: 0,
        }
    }

    /// Maximum number of frames the queue can hold.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of frames currently queued.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no frames are queued.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Writes a frame into the next free slot.
    ///
    /// `fill` receives the slot's planes, already sized for `width × height`.
    /// When it fails the slot is left free and the error is returned. When the
    /// queue is full `fill` is never called.
    pub fn try_push_with<F>(
        &mut self,
        pts: f64,
        width: u32,
        height: u32,
        fill: F,
    ) -> Result<PushOutcome, DecodeError>
    where
        F: FnOnce(PlanesMut<'_>) -> Result<(), DecodeError>,
    {
        if self.is_full() {
            return Ok(PushOutcome::Full);
        }

        let tail = (self.head + self.len) % self.slots.len();
        let planes = self.slots[tail].prepare(pts, width, height);
        fill(planes)?;

        self.len += 1;
        Ok(PushOutcome::Queued)
    }

    /// The oldest queued frame.
    pub fn front(&self) -> Option<&VideoFrame> {
        if self.is_empty() {
            return None;
        }
        Some(&self.slots[self.head])
    }

    /// PTS of the oldest queued frame.
    pub fn front_pts(&self) -> Option<f64> {
        self.front().map(VideoFrame::pts)
    }

    /// Releases the oldest frame's slot. Returns false if the queue was empty.
    pub fn pop(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        self.head = (self.head + 1) % self.slots.len();
        self.len -= 1;
        true
    }

    /// Releases every queued frame.
    pub fn clear(&mut self) {
        let dropped = self.len;
        self.head = 0;
        self.len = 0;
        if dropped > 0 {
            tracing::debug!("FrameQueue::clear: released {} frames", dropped);
        }
    }
}

impl std::fmt::Debug for FrameQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameQueue")
            .field("capacity", &self.slots.len())
            .field("len", &self.len)
            .field("head", &self.head)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_solid(queue: &mut FrameQueue, pts: f64, luma: u8) -> PushOutcome {
        let result = queue.try_push_with(pts, 4, 2, |planes| {
            planes.y.fill(luma);
            planes.u.fill(128);
            planes.v.fill(64);
            Ok(())
        });
        let Ok(outcome) = result else {
            panic!("Expected push to succeed");
        };
        outcome
    }

    #[test]
    fn test_yuv420p_len() {
        assert_eq!(yuv420p_len(4, 2), 8 + 2 + 2);
        assert_eq!(yuv420p_len(1920, 1080), 1920 * 1080 * 3 / 2);
    }

    #[test]
    fn test_push_pop_fifo() {
        let mut queue = FrameQueue::new(3, 4, 2);

        assert_eq!(push_solid(&mut queue, 0.0, 10), PushOutcome::Queued);
        assert_eq!(push_solid(&mut queue, 0.1, 20), PushOutcome::Queued);
        assert_eq!(queue.len(), 2);

        let Some(front) = queue.front() else {
            panic!("Expected front frame");
        };
        assert_eq!(front.pts(), 0.0);
        assert_eq!(front.y(), &[10; 8]);
        assert_eq!(front.u(), &[128; 2]);
        assert_eq!(front.v(), &[64; 2]);

        assert!(queue.pop());
        assert_eq!(queue.front_pts(), Some(0.1));
        assert!(queue.pop());
        assert!(!queue.pop());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_queue_rejects_without_calling_writer() {
        let mut queue = FrameQueue::new(2, 4, 2);
        push_solid(&mut queue, 0.0, 1);
        push_solid(&mut queue, 0.1, 2);
        assert!(queue.is_full());

        let mut called = false;
        let result = queue.try_push_with(0.2, 4, 2, |_| {
            called = true;
            Ok(())
        });
        assert_eq!(result, Ok(PushOutcome::Full));
        assert!(!called);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_slots_wrap_around() {
        let mut queue = FrameQueue::new(2, 4, 2);
        for i in 0..7 {
            push_solid(&mut queue, i as f64, i as u8);
            assert!(queue.len() <= queue.capacity());
            if queue.is_full() {
                queue.pop();
            }
        }
        assert_eq!(queue.front_pts(), Some(6.0));
    }

    #[test]
    fn test_failed_fill_leaves_slot_free() {
        let mut queue = FrameQueue::new(2, 4, 2);
        let result = queue.try_push_with(0.0, 4, 2, |_| {
            Err(DecodeError::Decode("short plane".to_string()))
        });
        assert!(result.is_err());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_slot_resizes_for_new_dimensions() {
        let mut queue = FrameQueue::new(1, 4, 2);
        let result = queue.try_push_with(0.0, 8, 4, |planes| {
            assert_eq!(planes.y.len(), 32);
            assert_eq!(planes.u.len(), 8);
            assert_eq!(planes.v.len(), 8);
            Ok(())
        });
        assert_eq!(result, Ok(PushOutcome::Queued));
        let Some(frame) = queue.front() else {
            panic!("Expected frame");
        };
        assert_eq!(frame.planar_bytes().len(), yuv420p_len(8, 4));
    }
}
