//! Error types for the stream layer and its client codec

use thiserror::Error;

/// Result type for tiffio operations
pub type Result<T> = std::result::Result<T, TiffError>;

/// tiffio error types
#[derive(Error, Debug)]
pub enum TiffError {
    /// First four bytes are neither `II*\0` nor `MM\0*`
    #[error("Invalid TIFF magic number")]
    InvalidMagic,

    /// Header carries a version other than 42
    #[error("Unsupported TIFF version: {version}")]
    UnsupportedVersion { version: u16 },

    /// Seek origin outside SEEK_SET/SEEK_CUR/SEEK_END
    #[error("Invalid whence argument: {0}")]
    InvalidWhence(i32),

    /// Seek resolved to a position before the start of the stream
    #[error("Seek to negative offset {0}")]
    NegativeOffset(i64),

    /// Seek past the data end that growth could not satisfy
    #[error("Seek beyond data end: target {target}, length {length}")]
    SeekBeyondEnd { target: u64, length: u64 },

    /// Buffer growth could not be allocated
    #[error("Out of memory growing buffer to {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Buffer growth would exceed the configured limit
    #[error("Buffer capacity limit exceeded: needed {needed} bytes, limit {limit}")]
    CapacityExceeded { needed: usize, limit: usize },

    /// Operation on a released backing store
    #[error("Stream is closed")]
    Closed,

    /// Unparseable open mode string
    #[error("Invalid open mode: {0:?}")]
    InvalidMode(String),

    /// Operation not allowed in the session's mode
    #[error("Operation requires {0} mode")]
    WrongMode(&'static str),

    /// No session is currently open
    #[error("No active session")]
    NoActiveSession,

    /// Malformed image file directory
    #[error("Invalid IFD: {0}")]
    InvalidIfd(String),

    /// A required directory field is absent
    #[error("Missing required tag: {0}")]
    MissingTag(String),

    /// Strip index out of range for the current directory
    #[error("Strip {index} out of range ({count} strips)")]
    InvalidStrip { index: u32, count: u32 },

    /// Platform numeric width differs from what the codec assumes
    #[error("Type {name} is {actual} bits wide, expected {expected}")]
    TypeSize { name: &'static str, expected: usize, actual: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Unrecoverable codec error; the session that raised it is gone
    #[error("{module}: {message}")]
    Fatal { module: String, message: String },
}

impl TiffError {
    /// Build a fatal codec error
    pub fn fatal(module: impl Into<String>, message: impl Into<String>) -> Self {
        TiffError::Fatal {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Whether this error must tear down the active session
    pub fn is_fatal(&self) -> bool {
        matches!(self, TiffError::Fatal { .. })
    }

    /// Whether this error came from running out of buffer space
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            TiffError::OutOfMemory { .. } | TiffError::CapacityExceeded { .. }
        )
    }
}
