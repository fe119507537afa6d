//! File- and memory-backed stream layer for a TIFF codec
//!
//! The codec in this crate never touches files directly: every byte moves
//! through a set of stream callbacks bound to a [`StreamJob`], which is either
//! an OS file or a growable in-memory buffer that emulates file semantics.
//! A [`SessionManager`] keeps at most one codec handle open and guarantees the
//! job's resources are released on every exit path, including fatal codec
//! errors.
//!
//! # Example
//!
//! ```ignore
//! use tiffio::{SessionManager, tags::tag, IfdEntry};
//!
//! let mut sessions = SessionManager::default();
//!
//! // Encode into memory
//! let tiff = sessions.create_in_memory()?;
//! tiff.set_field(IfdEntry::long(tag::IMAGE_WIDTH, 2))?;
//! tiff.set_field(IfdEntry::long(tag::IMAGE_LENGTH, 1))?;
//! tiff.write_encoded_strip(0, &[10, 20])?;
//! let bytes = sessions.close_active()?.and_then(|job| job.into_bytes()).unwrap();
//!
//! // Decode it again
//! sessions.open_from_buffer(bytes)?;
//! let strip = sessions.run(|tiff| tiff.read_encoded_strip(0))?;
//! sessions.close_active()?;
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod ifd;
pub mod job;
pub mod session;
pub mod stream;
pub mod tags;

pub use client::{ClientProcs, JobProcs, ProcIo};
pub use codec::{OpenMode, Tiff};
pub use config::SessionConfig;
pub use diagnostics::{CollectingSink, Diagnostics, TracingSink, WarningSink};
pub use error::{Result, TiffError};
pub use ifd::{Ifd, IfdEntry, IfdValue};
pub use job::StreamJob;
pub use session::{global, Session, SessionManager, SessionState, SessionStats};
pub use stream::{ByteBufferStream, FileStream, Stream, Whence};

/// TIFF magic number - little endian "II"
pub const TIFF_MAGIC_LE: [u8; 2] = [0x49, 0x49];

/// TIFF magic number - big endian "MM"
pub const TIFF_MAGIC_BE: [u8; 2] = [0x4D, 0x4D];

/// TIFF version (42)
pub const TIFF_VERSION: u16 = 42;

const _: () = assert!(std::mem::size_of::<f32>() == 4);
const _: () = assert!(std::mem::size_of::<u64>() == 8);

/// Check whether `prefix` starts with a classic TIFF signature,
/// `II*\0` or `MM\0*`.
pub fn is_tiff_signature(prefix: &[u8]) -> bool {
    matches!(
        prefix,
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..]
    )
}

/// Verify the numeric widths the codec relies on.
pub fn check_type_sizes() -> Result<()> {
    let widths = [
        ("uint8_t", 8, u8::BITS as usize),
        ("uint16_t", 16, u16::BITS as usize),
        ("uint32_t", 32, u32::BITS as usize),
        ("uint64_t", 64, u64::BITS as usize),
        ("float", 32, std::mem::size_of::<f32>() * 8),
    ];
    for (name, expected, actual) in widths {
        if expected != actual {
            return Err(TiffError::TypeSize {
                name,
                expected,
                actual,
            });
        }
    }
    Ok(())
}
