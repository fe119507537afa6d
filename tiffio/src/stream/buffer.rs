//! Growable in-memory stream

use super::{Stream, Whence};
use crate::error::{Result, TiffError};

/// A seekable byte buffer that behaves like a file.
///
/// `length` counts valid bytes, `capacity` counts allocated bytes. The buffer
/// is kept fully allocated and zero-initialised up to `capacity`, and growth
/// always doubles the capacity until the request fits. `length <= capacity`
/// holds at every observation point.
#[derive(Debug, Clone, Default)]
pub struct ByteBufferStream {
    /// Allocated storage; `data.len()` is the capacity
    data: Vec<u8>,
    /// Number of valid bytes
    length: usize,
    /// Cursor
    position: u64,
    /// Optional cap on growth
    max_capacity: Option<usize>,
    /// Set once the buffer has been released
    closed: bool,
}

impl ByteBufferStream {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with `capacity` bytes preallocated
    pub fn with_capacity(capacity: usize) -> Self {
        ByteBufferStream {
            data: vec![0; capacity],
            ..Self::default()
        }
    }

    /// Wrap existing bytes; all of them are valid data
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        ByteBufferStream {
            length: bytes.len(),
            data: bytes,
            ..Self::default()
        }
    }

    /// Limit how far the buffer may grow
    pub fn max_capacity(mut self, limit: usize) -> Self {
        self.max_capacity = Some(limit);
        self
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.length
    }

    /// Check if there is no valid data
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Allocated size
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Current cursor
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Check if the buffer has been released
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Valid bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Consume the stream, keeping only the valid bytes
    pub fn into_inner(mut self) -> Vec<u8> {
        self.data.truncate(self.length);
        self.data
    }

    /// Make sure at least `needed` bytes are allocated, doubling capacity
    /// until it is strictly larger than `needed`.
    fn guarantee(&mut self, needed: usize) -> Result<()> {
        let capacity = self.data.len();
        if needed <= capacity {
            return Ok(());
        }

        let mut new_capacity = capacity.max(1);
        while new_capacity <= needed {
            new_capacity = new_capacity
                .checked_mul(2)
                .ok_or(TiffError::OutOfMemory { requested: needed })?;
        }

        if let Some(limit) = self.max_capacity {
            if new_capacity > limit {
                return Err(TiffError::CapacityExceeded { needed, limit });
            }
        }

        self.data
            .try_reserve_exact(new_capacity - capacity)
            .map_err(|_| TiffError::OutOfMemory {
                requested: new_capacity,
            })?;
        self.data.resize(new_capacity, 0);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(TiffError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Stream for ByteBufferStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        let start = (self.position as usize).min(self.length);
        let available = self.length - start;
        let to_read = buf.len().min(available);
        if to_read > 0 {
            buf[..to_read].copy_from_slice(&self.data[start..start + to_read]);
            self.position += to_read as u64;
        }
        Ok(to_read)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let start = self.position as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or(TiffError::OutOfMemory { requested: usize::MAX })?;
        self.guarantee(end)?;

        self.data[start..end].copy_from_slice(buf);
        self.position = end as u64;
        self.length = self.length.max(end);
        Ok(buf.len())
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        self.ensure_open()?;
        let target = whence.resolve(offset, self.position, self.length as u64)?;

        if target > self.length as u64 {
            let end = usize::try_from(target)
                .map_err(|_| TiffError::OutOfMemory { requested: usize::MAX })?;
            self.guarantee(end)?;
            self.data[self.length..end].fill(0);
            self.length = end;
        }

        if target > self.length as u64 {
            return Err(TiffError::SeekBeyondEnd {
                target,
                length: self.length as u64,
            });
        }

        self.position = target;
        Ok(target)
    }

    fn size(&mut self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.length as u64)
    }

    fn close(&mut self) -> Result<()> {
        self.data = Vec::new();
        self.length = 0;
        self.position = 0;
        self.closed = true;
        Ok(())
    }
}
