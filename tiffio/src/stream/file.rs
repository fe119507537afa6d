//! Pass-through stream over an OS file

use super::{Stream, Whence};
use crate::error::{Result, TiffError};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// A stream that forwards every operation to an open file.
#[derive(Debug)]
pub struct FileStream {
    file: Option<File>,
}

impl FileStream {
    /// Wrap an already opened file
    pub fn new(file: File) -> Self {
        FileStream { file: Some(file) }
    }

    /// Open an existing file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(File::open(path)?))
    }

    /// Create (or truncate) a file for writing; it stays readable so the
    /// codec can re-read directories it has written.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::new(file))
    }

    /// Check if the descriptor has been closed
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(TiffError::Closed)
    }
}

impl Stream for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let file = self.file()?;
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.file()?.write_all(buf)?;
        Ok(buf.len())
    }

    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        let from = match whence {
            Whence::Start => {
                if offset < 0 {
                    return Err(TiffError::NegativeOffset(offset));
                }
                SeekFrom::Start(offset as u64)
            }
            Whence::Current => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        };
        Ok(self.file()?.seek(from)?)
    }

    fn size(&mut self) -> Result<u64> {
        let file = self.file()?;
        let current = file.stream_position()?;
        let end = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(current))?;
        Ok(end)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_preserves_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("size.bin");
        std::fs::write(&path, [1u8; 40]).unwrap();

        let mut stream = FileStream::open(&path).unwrap();
        stream.seek(7, Whence::Start).unwrap();
        assert_eq!(stream.size().unwrap(), 40);
        assert_eq!(stream.seek(0, Whence::Current).unwrap(), 7);
    }

    #[test]
    fn test_read_stops_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eof.bin");
        std::fs::write(&path, b"abc").unwrap();

        let mut stream = FileStream::open(&path).unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(stream.read(&mut buf).unwrap(), 3);
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_write_and_reread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rw.bin");

        let mut stream = FileStream::create(&path).unwrap();
        stream.write(b"0123456789").unwrap();
        assert_eq!(stream.seek(-4, Whence::End).unwrap(), 6);
        let mut buf = [0u8; 4];
        stream.read(&mut buf).unwrap();
        assert_eq!(&buf, b"6789");
    }

    #[test]
    fn test_close_nulls_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("close.bin");
        std::fs::write(&path, b"x").unwrap();

        let mut stream = FileStream::open(&path).unwrap();
        stream.close().unwrap();
        assert!(stream.is_closed());
        assert!(matches!(stream.size(), Err(TiffError::Closed)));
        stream.close().unwrap();
    }

    #[test]
    fn test_negative_seek_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neg.bin");
        std::fs::write(&path, b"abcdef").unwrap();

        let mut stream = FileStream::open(&path).unwrap();
        assert!(stream.seek(-1, Whence::Start).is_err());
        assert!(stream.seek(-1, Whence::Current).is_err());
    }
}
