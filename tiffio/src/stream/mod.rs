//! File-like streams the client codec reads from and writes to.
//!
//! Two backing stores implement [`Stream`]: [`FileStream`] over an OS file and
//! [`ByteBufferStream`] over a growable heap buffer that emulates file
//! semantics, including zero-filled gaps when seeking past the data end.

pub mod buffer;
pub mod file;

pub use buffer::ByteBufferStream;
pub use file::FileStream;

use crate::error::{Result, TiffError};

/// Raw whence value for seeking from the start
pub const SEEK_SET: i32 = 0;
/// Raw whence value for seeking from the current position
pub const SEEK_CUR: i32 = 1;
/// Raw whence value for seeking from the end
pub const SEEK_END: i32 = 2;

/// Seek origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Offset is absolute
    Start,
    /// Offset is relative to the current position
    Current,
    /// Offset is relative to the end of the data
    End,
}

impl Whence {
    /// Decode a raw whence value
    pub fn from_raw(value: i32) -> Result<Self> {
        match value {
            SEEK_SET => Ok(Whence::Start),
            SEEK_CUR => Ok(Whence::Current),
            SEEK_END => Ok(Whence::End),
            other => Err(TiffError::InvalidWhence(other)),
        }
    }

    /// Encode as a raw whence value
    pub fn to_raw(self) -> i32 {
        match self {
            Whence::Start => SEEK_SET,
            Whence::Current => SEEK_CUR,
            Whence::End => SEEK_END,
        }
    }

    /// Resolve `offset` against this origin to an absolute position
    pub fn resolve(self, offset: i64, position: u64, end: u64) -> Result<u64> {
        let base = match self {
            Whence::Start => 0,
            Whence::Current => position as i64,
            Whence::End => end as i64,
        };
        let target = base
            .checked_add(offset)
            .ok_or(TiffError::NegativeOffset(offset))?;
        if target < 0 {
            return Err(TiffError::NegativeOffset(target));
        }
        Ok(target as u64)
    }
}

/// Operations every backing store provides
pub trait Stream {
    /// Read up to `buf.len()` bytes; 0 means end of data
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `buf`, returning the number of bytes written
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Move the cursor, returning the new absolute position
    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64>;

    /// Total size of the data
    fn size(&mut self) -> Result<u64>;

    /// Release the backing store
    fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whence_raw_values() {
        assert_eq!(Whence::from_raw(0).unwrap(), Whence::Start);
        assert_eq!(Whence::from_raw(1).unwrap(), Whence::Current);
        assert_eq!(Whence::from_raw(2).unwrap(), Whence::End);
        assert!(matches!(
            Whence::from_raw(3),
            Err(TiffError::InvalidWhence(3))
        ));
        assert_eq!(Whence::End.to_raw(), SEEK_END);
    }

    #[test]
    fn test_resolve() {
        assert_eq!(Whence::Start.resolve(5, 100, 200).unwrap(), 5);
        assert_eq!(Whence::Current.resolve(-10, 100, 200).unwrap(), 90);
        assert_eq!(Whence::End.resolve(0, 100, 200).unwrap(), 200);
        assert!(Whence::Current.resolve(-101, 100, 200).is_err());
    }
}
