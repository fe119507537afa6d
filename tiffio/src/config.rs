//! Session configuration

use serde::{Deserialize, Serialize};

/// Warning fragments that are expected and harmless, dropped before reaching the host.
pub const BENIGN_WARNINGS: [&str; 2] = [
    "Unknown field with tag",
    "Defining non-color channels as ExtraSamples.",
];

/// Configuration shared by every session a manager opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Module name reported in warnings and fatal errors
    pub module: String,
    /// Starting capacity of in-memory write buffers
    pub initial_buffer_capacity: usize,
    /// Upper bound on in-memory buffer growth (`None` = unbounded)
    pub max_buffer_capacity: Option<usize>,
    /// Warning substrings that are never forwarded to the host
    pub suppressed_warnings: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            module: "tiffio".to_string(),
            initial_buffer_capacity: 8192,
            max_buffer_capacity: None,
            suppressed_warnings: BENIGN_WARNINGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SessionConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the module name
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    /// Set the initial capacity of in-memory write buffers
    pub fn initial_buffer_capacity(mut self, capacity: usize) -> Self {
        self.initial_buffer_capacity = capacity;
        self
    }

    /// Limit in-memory buffer growth
    pub fn max_buffer_capacity(mut self, limit: usize) -> Self {
        self.max_buffer_capacity = Some(limit);
        self
    }

    /// Add a warning substring to suppress
    pub fn suppress_warning(mut self, fragment: impl Into<String>) -> Self {
        self.suppressed_warnings.push(fragment.into());
        self
    }
}
