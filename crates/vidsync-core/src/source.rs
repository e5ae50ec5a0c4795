//! In-memory byte source feeding the demuxer.
//!
//! The pipeline never touches files. The caller reads the whole media blob up
//! front and hands it over as a [`MediaSource`]; the demuxer pulls from it
//! through [`MediaSource::read`] and, when the container needs it,
//! [`MediaSource::seek`].

use std::io::SeekFrom;

use crate::error::PipelineError;

/// Result of a single read from a [`MediaSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were copied into the destination buffer (`n > 0`).
    Read(usize),
    /// The cursor is at the end of the blob.
    EndOfStream,
}

/// Read cursor over a fully materialized media blob.
///
/// The size is fixed at construction. Only the cursor moves.
pub struct MediaSource {
    data: Vec<u8>,
    position: usize,
}

impl MediaSource {
    /// Wraps an already-loaded media blob.
    ///
    /// An empty blob cannot hold a container and is rejected up front.
    pub fn new(data: impl Into<Vec<u8>>) -> Result<Self, PipelineError> {
        let data = data.into();
        if data.is_empty() {
            return Err(PipelineError::SourceUnreadable(
                "media blob is empty".to_string(),
            ));
        }
        Ok(Self { data, position: 0 })
    }

    /// Total size of the blob in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Current read position.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left between the cursor and the end of the blob.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Copies up to `buf.len()` bytes from the cursor and advances it.
    pub fn read(&mut self, buf: &mut [u8]) -> ReadOutcome {
        if self.position >= self.data.len() || buf.is_empty() {
            return ReadOutcome::EndOfStream;
        }
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        ReadOutcome::Read(n)
    }

    /// Moves the cursor. Returns the new position, or `None` if the target
    /// lies before the start of the blob. Positions past the end are clamped.
    pub fn seek(&mut self, pos: SeekFrom) -> Option<u64> {
        let size = self.data.len() as i128;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.position as i128 + delta as i128,
            SeekFrom::End(delta) => size + delta as i128,
        };
        if target < 0 {
            return None;
        }
        self.position = target.min(size) as usize;
        Some(self.position as u64)
    }
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSource")
            .field("size", &self.data.len())
            .field("position", &self.position)
            .finish()
    }
}
