//! Caller-owned backing store for one session

use crate::config::SessionConfig;
use crate::error::Result;
use crate::stream::{ByteBufferStream, FileStream, Stream, Whence};
use std::path::Path;

/// Either a file or an in-memory buffer, chosen when the job is created and
/// fixed for its whole lifetime.
#[derive(Debug)]
pub enum StreamJob {
    /// Backed by an OS file
    File(FileStream),
    /// Backed by a growable byte buffer
    Buffer(ByteBufferStream),
}

impl StreamJob {
    /// Open an existing file for reading
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(StreamJob::File(FileStream::open(path)?))
    }

    /// Create a file for writing
    pub fn create_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(StreamJob::File(FileStream::create(path)?))
    }

    /// Read from bytes already in memory
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        StreamJob::Buffer(ByteBufferStream::from_bytes(bytes))
    }

    /// Empty in-memory buffer with default sizing
    pub fn buffer() -> Self {
        Self::buffer_with(&SessionConfig::default())
    }

    /// Empty in-memory buffer sized by `config`
    pub fn buffer_with(config: &SessionConfig) -> Self {
        let mut stream = ByteBufferStream::with_capacity(config.initial_buffer_capacity);
        if let Some(limit) = config.max_buffer_capacity {
            stream = stream.max_capacity(limit);
        }
        StreamJob::Buffer(stream)
    }

    /// Check if the job is file-backed
    pub fn is_file(&self) -> bool {
        matches!(self, StreamJob::File(_))
    }

    /// Check if the backing store has been released
    pub fn is_released(&self) -> bool {
        match self {
            StreamJob::File(f) => f.is_closed(),
            StreamJob::Buffer(b) => b.is_closed(),
        }
    }

    /// In-memory stream, if buffer-backed
    pub fn as_buffer(&self) -> Option<&ByteBufferStream> {
        match self {
            StreamJob::Buffer(b) => Some(b),
            StreamJob::File(_) => None,
        }
    }

    /// Valid buffer contents, if buffer-backed
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            StreamJob::Buffer(b) => Some(b.into_inner()),
            StreamJob::File(_) => None,
        }
    }

    /// Read the first four bytes of the stream and put the cursor back.
    ///
    /// Returns fewer than four bytes when the stream is shorter.
    pub fn peek_magic(&mut self) -> Result<Vec<u8>> {
        let position = self.seek(0, Whence::Current)?;
        self.seek(0, Whence::Start)?;
        let mut magic = [0u8; 4];
        let read = self.read(&mut magic);
        self.seek(position as i64, Whence::Start)?;
        let n = read?;
        Ok(magic[..n].to_vec())
    }
}

impl Stream for StreamJob {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            StreamJob::File(f) => f.read(buf),
            StreamJob::Buffer(b) => b.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self {
            StreamJob::File(f) => f.write(buf),
            StreamJob::Buffer(b) => b.write(buf),
        }
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        match self {
            StreamJob::File(f) => f.seek(offset, whence),
            StreamJob::Buffer(b) => b.seek(offset, whence),
        }
    }

    fn size(&mut self) -> Result<u64> {
        match self {
            StreamJob::File(f) => f.size(),
            StreamJob::Buffer(b) => b.size(),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self {
            StreamJob::File(f) => f.close(),
            StreamJob::Buffer(b) => b.close(),
        }
    }
}
