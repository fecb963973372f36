// src/config/model.rs

use serde::Deserialize;

use crate::logging::LogLevel;
use crate::types::Modality;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [queue]
/// scan_capacity = 256
/// preprocess_capacity = 256
/// async_preprocessing = true
/// single_event_modality = "nonmodal"
///
/// [scan]
/// exclude = ["**/.git/**"]
/// content_hash = false
///
/// [logging]
/// level = "info"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawRefreshConfig {
    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub scan: ScanSection,

    #[serde(default)]
    pub logging: LoggingSection,
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawRefreshConfig>` (see `validate.rs`)
/// or [`RefreshConfig::default`], which is valid by construction.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    queue: QueueSection,
    scan: ScanSection,
    logging: LoggingSection,
}

impl RefreshConfig {
    pub(crate) fn new_unchecked(
        queue: QueueSection,
        scan: ScanSection,
        logging: LoggingSection,
    ) -> Self {
        Self {
            queue,
            scan,
            logging,
        }
    }

    pub fn queue(&self) -> &QueueSection {
        &self.queue
    }

    pub fn scan(&self) -> &ScanSection {
        &self.scan
    }

    pub fn logging(&self) -> &LoggingSection {
        &self.logging
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self::new_unchecked(
            QueueSection::default(),
            ScanSection::default(),
            LoggingSection::default(),
        )
    }
}

/// `[queue]` section: sizing and routing of the two worker queues.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    /// Capacity of the scan worker's bounded queue.
    #[serde(default = "default_capacity")]
    pub scan_capacity: usize,

    /// Capacity of the event preprocessor's bounded queue.
    #[serde(default = "default_capacity")]
    pub preprocess_capacity: usize,

    /// If true, asynchronous sessions compute listener appliers on the
    /// preprocessor before firing. If false, they fire directly and listeners
    /// run inside the write action.
    #[serde(default = "default_true")]
    pub async_preprocessing: bool,

    /// Scheduling context used for `process_single_event`.
    #[serde(default)]
    pub single_event_modality: Modality,
}

fn default_capacity() -> usize {
    256
}

fn default_true() -> bool {
    true
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            scan_capacity: default_capacity(),
            preprocess_capacity: default_capacity(),
            async_preprocessing: true,
            single_event_modality: Modality::NonModal,
        }
    }
}

/// `[scan]` section: behaviour of the default file-system scanner.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScanSection {
    /// Glob patterns (relative to each scanned root) that are never reported.
    #[serde(default)]
    pub exclude: Vec<String>,

    /// If true, file stamps include a blake3 digest of the contents, so a
    /// rewrite with identical size and mtime is still detected.
    #[serde(default)]
    pub content_hash: bool,
}

/// `[logging]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingSection {
    #[serde(default)]
    pub level: Option<LogLevel>,
}
