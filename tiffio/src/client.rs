//! Callback set the client codec drives, bound to a [`StreamJob`].
//!
//! The codec never touches a file or buffer directly. It calls the seven
//! procedures of [`ClientProcs`], which report failure through their return
//! value the way a C stream callback would, and leave the explanation on the
//! warning channel.

use crate::diagnostics::Diagnostics;
use crate::error::TiffError;
use crate::job::StreamJob;
use crate::stream::{Stream, Whence};
use std::io;
use tracing::debug;

/// Stream callbacks a client codec is opened with
pub trait ClientProcs {
    /// Read into `buf`, returning bytes read (0 at end of data or on failure)
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Write `buf`, returning bytes written (short count on failure)
    fn write(&mut self, buf: &[u8]) -> usize;

    /// Seek with a raw whence value, returning the new offset
    fn seek(&mut self, offset: i64, whence: i32) -> Option<u64>;

    /// Release the backing store
    fn close(&mut self) -> crate::Result<()>;

    /// Total size of the stream
    fn size(&mut self) -> u64;

    /// Map the whole stream into memory
    fn map_file(&mut self) -> Option<&[u8]>;

    /// Undo [`ClientProcs::map_file`]
    fn unmap_file(&mut self);
}

/// [`ClientProcs`] over an owned [`StreamJob`]
#[derive(Debug)]
pub struct JobProcs {
    job: StreamJob,
    diagnostics: Diagnostics,
    module: String,
    /// Free an in-memory buffer on close (read sessions); write sessions
    /// keep it so the caller can collect the encoded bytes.
    release_buffer: bool,
}

impl JobProcs {
    /// Bind callbacks to `job`
    pub fn new(job: StreamJob, diagnostics: Diagnostics, module: impl Into<String>) -> Self {
        JobProcs {
            job,
            diagnostics,
            module: module.into(),
            release_buffer: true,
        }
    }

    /// Keep or free an in-memory buffer when the session closes
    pub fn release_buffer_on_close(mut self, release: bool) -> Self {
        self.release_buffer = release;
        self
    }

    /// Backing store
    pub fn job(&self) -> &StreamJob {
        &self.job
    }

    /// Hand the backing store back to the caller
    pub fn into_job(self) -> StreamJob {
        self.job
    }

    /// Warning channel these callbacks report to
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    fn warn(&self, message: &str) {
        self.diagnostics.warning(&self.module, message);
    }

    fn trace(&self, op: &str, amount: i64) {
        if let StreamJob::Buffer(b) = &self.job {
            debug!(
                position = b.position(),
                length = b.len(),
                capacity = b.capacity(),
                amount,
                "{} callback",
                op
            );
        }
    }
}

impl ClientProcs for JobProcs {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        self.trace("read", buf.len() as i64);
        match self.job.read(buf) {
            Ok(n) => n,
            Err(e) => {
                self.warn(&format!("read callback failed: {}", e));
                0
            }
        }
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        self.trace("write", buf.len() as i64);
        match self.job.write(buf) {
            Ok(n) => n,
            Err(e) => {
                self.warn(&format!("write callback failed: {}", e));
                0
            }
        }
    }

    fn seek(&mut self, offset: i64, whence: i32) -> Option<u64> {
        self.trace("seek", offset);
        let whence = match Whence::from_raw(whence) {
            Ok(w) => w,
            Err(_) => {
                self.warn("invalid `whence' argument to seek callback");
                return None;
            }
        };

        match self.job.seek(offset, whence) {
            Ok(position) => Some(position),
            Err(e) => {
                let message = match (&self.job, &e) {
                    (StreamJob::File(_), _) => "seek failed on a file in seek callback".to_string(),
                    (_, TiffError::SeekBeyondEnd { .. }) => {
                        "attempted to seek beyond the data end".to_string()
                    }
                    _ => format!("seek callback failed: {}", e),
                };
                self.warn(&message);
                None
            }
        }
    }

    fn close(&mut self) -> crate::Result<()> {
        match &mut self.job {
            StreamJob::File(f) => f.close(),
            StreamJob::Buffer(b) if self.release_buffer => b.close(),
            StreamJob::Buffer(_) => Ok(()),
        }
    }

    fn size(&mut self) -> u64 {
        match self.job.size() {
            Ok(size) => size,
            Err(e) => {
                self.warn(&format!("size callback failed: {}", e));
                0
            }
        }
    }

    fn map_file(&mut self) -> Option<&[u8]> {
        self.warn("attempted to use map callback on non-file which is unsupported");
        None
    }

    fn unmap_file(&mut self) {
        self.warn("attempted to use unmap callback on non-file which is unsupported");
    }
}

/// `std::io` view of a callback set, so the codec can use ordinary readers
/// and writers on top of it.
pub struct ProcIo<'a, P: ClientProcs + ?Sized> {
    procs: &'a mut P,
}

impl<'a, P: ClientProcs + ?Sized> ProcIo<'a, P> {
    /// Borrow `procs` as an I/O object
    pub fn new(procs: &'a mut P) -> Self {
        ProcIo { procs }
    }
}

impl<P: ClientProcs + ?Sized> io::Read for ProcIo<'_, P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.procs.read(buf))
    }
}

impl<P: ClientProcs + ?Sized> io::Write for ProcIo<'_, P> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.procs.write(buf);
        if written < buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("write callback wrote {} of {} bytes", written, buf.len()),
            ));
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<P: ClientProcs + ?Sized> io::Seek for ProcIo<'_, P> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (offset, whence) = match pos {
            io::SeekFrom::Start(n) => {
                let n = i64::try_from(n)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
                (n, Whence::Start)
            }
            io::SeekFrom::Current(n) => (n, Whence::Current),
            io::SeekFrom::End(n) => (n, Whence::End),
        };
        self.procs
            .seek(offset, whence.to_raw())
            .ok_or_else(|| io::Error::other("seek callback failed"))
    }
}
