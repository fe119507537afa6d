//! Session lifecycle: one active handle at a time, guaranteed cleanup.
//!
//! A [`SessionManager`] owns at most one open [`Tiff`] handle. Opening a new
//! session force-closes the previous one first. Fatal codec errors raised by
//! an operation run through [`SessionManager::run`] tear the handle down
//! before the error reaches the caller; a fatal error raised while that
//! teardown is in progress is swallowed, because the manager is already in
//! the [`SessionState::Closing`] state.
//!
//! The manager is an ordinary value owned by the caller. For code that wants
//! one process-wide instance, [`global`] hands out a mutex-guarded manager;
//! the one-session-at-a-time contract then holds for the whole process.

use crate::client::JobProcs;
use crate::codec::{OpenMode, Tiff};
use crate::config::SessionConfig;
use crate::diagnostics::{Diagnostics, TracingSink, WarningSink};
use crate::error::{Result, TiffError};
use crate::job::StreamJob;
use crate::{check_type_sizes, is_tiff_signature};
use parking_lot::{Mutex, MutexGuard};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// Mode used for every read session: no memory mapping, no strip chopping.
pub const READ_MODE: &str = "rmc";

/// Mode used for every write session.
pub const WRITE_MODE: &str = "w";

/// Lifecycle of the manager's single handle slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handlers not installed yet
    Uninitialized,
    /// No handle open
    Idle,
    /// A handle is being constructed
    Opening,
    /// A handle is open
    Open,
    /// The handle is being torn down
    Closing,
}

/// Counters for handle lifetimes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Handles successfully opened
    pub opened: u64,
    /// Handles whose backing store was released by a close
    pub released: u64,
    /// Fatal errors handled
    pub fatal_errors: u64,
    /// Fatal errors dropped because they arrived during teardown
    pub suppressed: u64,
}

/// Owner of the single active codec handle
#[derive(Debug)]
pub struct SessionManager {
    config: SessionConfig,
    diagnostics: Diagnostics,
    state: SessionState,
    active: Option<Tiff>,
    stats: SessionStats,
}

impl Default for SessionManager {
    fn default() -> Self {
        SessionManager::new(SessionConfig::default())
    }
}

impl SessionManager {
    /// Create a manager that logs warnings through `tracing`
    pub fn new(config: SessionConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Create a manager that forwards warnings to `sink`
    pub fn with_sink(config: SessionConfig, sink: Arc<dyn WarningSink>) -> Self {
        let diagnostics = Diagnostics::new(sink, config.suppressed_warnings.clone());
        SessionManager {
            config,
            diagnostics,
            state: SessionState::Uninitialized,
            active: None,
            stats: SessionStats::default(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Lifetime counters
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Configuration in use
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Check if a handle is open
    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    /// The open handle, if any
    pub fn active(&mut self) -> Option<&mut Tiff> {
        self.active.as_mut()
    }

    fn init(&mut self) -> Result<()> {
        if self.state == SessionState::Uninitialized {
            check_type_sizes()?;
            self.state = SessionState::Idle;
            debug!(module = %self.config.module, "session manager initialized");
        }
        Ok(())
    }

    /// Open a session over `job`.
    ///
    /// Read sessions check the 4-byte signature first; a mismatch fails
    /// without touching the codec or the currently active handle. Otherwise
    /// any active handle is closed before the new one is opened.
    pub fn open(&mut self, mode: &str, mut job: StreamJob) -> Result<&mut Tiff> {
        self.init()?;
        let mode: OpenMode = mode.parse()?;

        if !mode.write {
            let magic = job.peek_magic()?;
            if !is_tiff_signature(&magic) {
                debug!(?magic, "rejected input without TIFF signature");
                return Err(TiffError::InvalidMagic);
            }
        }

        if self.active.is_some() {
            debug!("closing previous session before opening a new one");
            if let Err(e) = self.close_active() {
                self.diagnostics
                    .warning(&self.config.module, &format!("closing previous session: {}", e));
            }
        }

        self.state = SessionState::Opening;
        let procs = JobProcs::new(job, self.diagnostics.clone(), self.config.module.clone())
            .release_buffer_on_close(!mode.write);

        match Tiff::client_open(&self.config.module, mode, procs, self.diagnostics.clone()) {
            Ok(tiff) => {
                self.state = SessionState::Open;
                self.stats.opened += 1;
                info!(module = %self.config.module, write = mode.write, "session opened");
                Ok(self.active.insert(tiff))
            }
            Err(e) => {
                self.state = SessionState::Idle;
                // the failed handle already released its backing store
                self.stats.released += 1;
                Err(self.escalate(e))
            }
        }
    }

    /// Open an existing file for reading
    pub fn open_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<&mut Tiff> {
        let job = StreamJob::open_file(path)?;
        self.open(READ_MODE, job)
    }

    /// Open in-memory bytes for reading
    pub fn open_from_buffer(&mut self, bytes: Vec<u8>) -> Result<&mut Tiff> {
        self.open(READ_MODE, StreamJob::from_bytes(bytes))
    }

    /// Start writing a file
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> Result<&mut Tiff> {
        let job = StreamJob::create_file(path)?;
        self.open(WRITE_MODE, job)
    }

    /// Start writing into a growable in-memory buffer
    pub fn create_in_memory(&mut self) -> Result<&mut Tiff> {
        let job = StreamJob::buffer_with(&self.config);
        self.open(WRITE_MODE, job)
    }

    /// Run a codec operation on the active handle. A fatal error closes the
    /// handle before it is returned.
    pub fn run<T>(&mut self, op: impl FnOnce(&mut Tiff) -> Result<T>) -> Result<T> {
        let tiff = self.active.as_mut().ok_or(TiffError::NoActiveSession)?;
        op(tiff).map_err(|e| self.escalate(e))
    }

    /// Close the active handle through the codec's close, which runs the
    /// stream's close callback. Returns the job, whose buffer still holds the
    /// encoded bytes after a write session.
    pub fn close_active(&mut self) -> Result<Option<StreamJob>> {
        let Some(mut tiff) = self.active.take() else {
            return Ok(None);
        };

        self.state = SessionState::Closing;
        let closed = tiff.close();
        self.state = SessionState::Idle;
        self.stats.released += 1;
        info!(module = %self.config.module, "session closed");

        closed?;
        Ok(Some(tiff.into_procs().into_job()))
    }

    /// Start a scoped session that is closed when the guard drops
    pub fn session(&mut self, mode: &str, job: StreamJob) -> Result<Session<'_>> {
        self.open(mode, job)?;
        Ok(Session { manager: self })
    }

    /// Fatal error handler.
    ///
    /// Warns, force-closes the active handle and returns the error to raise.
    /// Returns `None` when called while a handle is already being torn down;
    /// such errors are dropped.
    ///
    /// Only the release is exactly-once: a later call outside teardown finds
    /// no handle to close but still warns and returns the error.
    pub fn handle_fatal(&mut self, module: &str, message: &str) -> Option<TiffError> {
        if self.state == SessionState::Closing {
            self.stats.suppressed += 1;
            return None;
        }

        self.stats.fatal_errors += 1;
        self.diagnostics.warning(
            &self.config.module,
            &format!(
                "The tiff file you are attempting to read from is causing the following problem: \"{}: {}\"",
                module, message
            ),
        );

        if let Some(mut tiff) = self.active.take() {
            self.state = SessionState::Closing;
            if let Err(TiffError::Fatal { module, message }) = tiff.close() {
                // raised by the close itself
                let _ = self.handle_fatal(&module, &message);
            }
            self.stats.released += 1;
            self.state = SessionState::Idle;
        }

        Some(TiffError::fatal(module, message))
    }

    fn escalate(&mut self, e: TiffError) -> TiffError {
        match e {
            TiffError::Fatal { module, message } => self
                .handle_fatal(&module, &message)
                .unwrap_or(TiffError::Fatal { module, message }),
            other => other,
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if self.active.is_some() {
            let _ = self.close_active();
        }
    }
}

/// Scoped session; the handle is closed on every exit path.
#[derive(Debug)]
pub struct Session<'m> {
    manager: &'m mut SessionManager,
}

impl Session<'_> {
    /// Run a codec operation on this session's handle
    pub fn run<T>(&mut self, op: impl FnOnce(&mut Tiff) -> Result<T>) -> Result<T> {
        self.manager.run(op)
    }

    /// Check if the handle is still open (a fatal error closes it early)
    pub fn is_open(&self) -> bool {
        self.manager.is_open()
    }

    /// Close now and take back the job
    pub fn finish(self) -> Result<Option<StreamJob>> {
        self.manager.close_active()
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        if self.manager.is_open() {
            let _ = self.manager.close_active();
        }
    }
}

static GLOBAL: OnceLock<Mutex<SessionManager>> = OnceLock::new();

/// Process-wide manager. Holding the guard is the only way to reach it, so
/// opens and closes are serialized across threads.
pub fn global() -> MutexGuard<'static, SessionManager> {
    GLOBAL
        .get_or_init(|| Mutex::new(SessionManager::default()))
        .lock()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use crate::ifd::IfdEntry;
    use crate::tags::tag;

    fn manager() -> (Arc<CollectingSink>, SessionManager) {
        let sink = Arc::new(CollectingSink::new());
        let manager = SessionManager::with_sink(SessionConfig::default(), sink.clone());
        (sink, manager)
    }

    fn tiny_tiff() -> Vec<u8> {
        let (_, mut m) = manager();
        let tiff = m.create_in_memory().unwrap();
        tiff.set_field(IfdEntry::long(tag::IMAGE_WIDTH, 2)).unwrap();
        tiff.set_field(IfdEntry::long(tag::IMAGE_LENGTH, 2)).unwrap();
        tiff.write_encoded_strip(0, &[1, 2, 3, 4]).unwrap();
        m.close_active().unwrap().unwrap().into_bytes().unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let (_, mut m) = manager();
        assert_eq!(m.state(), SessionState::Uninitialized);
        m.open_from_buffer(tiny_tiff()).unwrap();
        assert_eq!(m.state(), SessionState::Open);
        m.close_active().unwrap();
        assert_eq!(m.state(), SessionState::Idle);
        assert!(m.close_active().unwrap().is_none());
    }

    #[test]
    fn test_bad_magic_leaves_active_handle() {
        let (_, mut m) = manager();
        m.open_from_buffer(tiny_tiff()).unwrap();
        let err = m.open_from_buffer(b"\x89PNG\r\n\x1a\n".to_vec()).unwrap_err();
        assert!(matches!(err, TiffError::InvalidMagic));
        assert!(m.is_open());
        assert_eq!(m.state(), SessionState::Open);
        assert_eq!(m.stats().opened, 1);
    }

    #[test]
    fn test_invalid_mode() {
        let (_, mut m) = manager();
        assert!(matches!(
            m.open("x", StreamJob::buffer()),
            Err(TiffError::InvalidMode(_))
        ));
        assert!(!m.is_open());
    }

    #[test]
    fn test_run_without_session() {
        let (_, mut m) = manager();
        assert!(matches!(
            m.run(|t| t.read_encoded_strip(0)),
            Err(TiffError::NoActiveSession)
        ));
    }

    #[test]
    fn test_fatal_error_closes_handle() {
        let (sink, mut m) = manager();
        m.open_from_buffer(tiny_tiff()).unwrap();
        let err = m
            .run(|_| Err::<(), _>(TiffError::fatal("TIFFReadDirectory", "corrupt")))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(!m.is_open());
        assert_eq!(m.state(), SessionState::Idle);
        assert_eq!(m.stats().released, 1);
        assert!(sink.messages()[0].contains("causing the following problem"));
    }

    #[test]
    fn test_scoped_session_closes_on_drop() {
        let (_, mut m) = manager();
        {
            let mut session = m.session(READ_MODE, StreamJob::from_bytes(tiny_tiff())).unwrap();
            let strip = session.run(|t| t.read_encoded_strip(0)).unwrap();
            assert_eq!(strip, vec![1, 2, 3, 4]);
        }
        assert!(!m.is_open());
        assert_eq!(m.stats().released, 1);
    }

    #[test]
    fn test_global_manager() {
        let mut m = global();
        let opened = m.stats().opened;
        m.open_from_buffer(tiny_tiff()).unwrap();
        assert_eq!(m.stats().opened, opened + 1);
        m.close_active().unwrap();
    }
}
