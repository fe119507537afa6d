//! Warning channel between the codec and the host.
//!
//! Every non-fatal problem noticed by the stream callbacks or the codec goes
//! through [`Diagnostics::warning`], which drops known-benign messages and
//! forwards the rest to a [`WarningSink`].

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Receiver of non-fatal warnings
pub trait WarningSink: Send + Sync {
    /// Handle one warning
    fn warning(&self, module: &str, message: &str);
}

/// Sink that logs through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl WarningSink for TracingSink {
    fn warning(&self, module: &str, message: &str) {
        warn!("{}: {}", module, message);
    }
}

/// Sink that keeps every warning for later inspection
#[derive(Debug, Default)]
pub struct CollectingSink {
    messages: Mutex<Vec<String>>,
}

impl CollectingSink {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Warnings received so far, as `module: message`
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Remove and return every collected warning
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock())
    }
}

impl WarningSink for CollectingSink {
    fn warning(&self, module: &str, message: &str) {
        self.messages.lock().push(format!("{}: {}", module, message));
    }
}

/// Filtering front end for a warning sink
#[derive(Clone)]
pub struct Diagnostics {
    sink: Arc<dyn WarningSink>,
    suppressed: Arc<[String]>,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("suppressed", &self.suppressed)
            .finish_non_exhaustive()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics::new(Arc::new(TracingSink), Vec::new())
    }
}

impl Diagnostics {
    /// Forward to `sink`, dropping messages containing any of `suppressed`
    pub fn new(sink: Arc<dyn WarningSink>, suppressed: Vec<String>) -> Self {
        Diagnostics {
            sink,
            suppressed: suppressed.into(),
        }
    }

    /// Check if a message would be dropped
    pub fn is_suppressed(&self, message: &str) -> bool {
        self.suppressed
            .iter()
            .any(|fragment| message.contains(fragment.as_str()))
    }

    /// Report a non-fatal problem
    pub fn warning(&self, module: &str, message: &str) {
        if !self.is_suppressed(message) {
            self.sink.warning(module, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BENIGN_WARNINGS;

    fn collecting() -> (Arc<CollectingSink>, Diagnostics) {
        let sink = Arc::new(CollectingSink::new());
        let suppressed = BENIGN_WARNINGS.iter().map(|s| s.to_string()).collect();
        let diagnostics = Diagnostics::new(sink.clone(), suppressed);
        (sink, diagnostics)
    }

    #[test]
    fn test_forwards_verbatim() {
        let (sink, diagnostics) = collecting();
        diagnostics.warning("tiffio", "something odd at offset 12");
        assert_eq!(sink.messages(), vec!["tiffio: something odd at offset 12"]);
    }

    #[test]
    fn test_benign_patterns_dropped() {
        let (sink, diagnostics) = collecting();
        diagnostics.warning("TIFFReadDirectory", "Unknown field with tag 40000 (0x9c40) encountered");
        diagnostics.warning(
            "TIFFReadDirectory",
            "Sum of Photometric type-related color channels and ExtraSamples doesn't match SamplesPerPixel. Defining non-color channels as ExtraSamples.",
        );
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn test_take_drains() {
        let (sink, diagnostics) = collecting();
        diagnostics.warning("m", "one");
        assert_eq!(sink.take().len(), 1);
        assert!(sink.messages().is_empty());
    }
}
