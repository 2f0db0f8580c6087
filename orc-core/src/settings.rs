//! Configuration accepted by [`crate::Engine::process`] and process-wide run counters.
//!
//! `Settings` itself is pure data: no file I/O, no argv parsing. The `orc-cli` binary crate is
//! responsible for discovering a `.orc-config` TOML file and populating one of these, so a host
//! embedding this crate can build a `Settings` any way it likes.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Mirrors `settings::log_level`; `orc-cli` maps this onto a `tracing` level filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LogLevel {
    Silent,
    #[default]
    Warning,
    Info,
    Verbose,
}

/// Mirrors `settings::output_file_mode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum OutputFileMode {
    #[default]
    Text,
    Json,
}

/// The configuration surface the core understands, populated from `.orc-config` TOML keys by
/// `orc-cli` or built directly by an embedding host.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Settings {
    pub graceful_exit: bool,
    pub max_violation_count: usize,
    pub log_level: LogLevel,
    pub parallel_processing: bool,
    pub symbol_ignore: Vec<String>,
    pub violation_report: Vec<String>,
    pub violation_ignore: Vec<String>,
    pub filter_redundant: bool,
    pub output_file_mode: OutputFileMode,
}

/// `#[derive(Default)]` would give every `bool` field `false`, but two of these default to `true`,
/// so `Default` is written out by hand instead.
impl Default for Settings {
    fn default() -> Self {
        Self {
            graceful_exit: false,
            max_violation_count: 0,
            log_level: LogLevel::default(),
            parallel_processing: true,
            symbol_ignore: Vec::new(),
            violation_report: Vec::new(),
            violation_ignore: Vec::new(),
            filter_redundant: true,
            output_file_mode: OutputFileMode::default(),
        }
    }
}

impl Settings {
    /// True when the configured level is at least as noisy as `level`.
    pub fn log_level_at_least(&self, level: LogLevel) -> bool {
        self.log_level >= level
    }
}

/// Process-wide run counters, reset between independent analysis passes over the same [`crate::Engine`].
#[derive(Default)]
pub struct Globals {
    pub object_file_count: AtomicUsize,
    pub odrv_count: AtomicUsize,
    pub die_processed_count: AtomicUsize,
    pub die_registered_count: AtomicUsize,
    pub error_count: AtomicUsize,
}

impl Globals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Must not be called while tasks are still in flight, or counters will read as inconsistent
    /// mid-run snapshots.
    pub fn reset(&self) {
        self.object_file_count.store(0, Ordering::SeqCst);
        self.odrv_count.store(0, Ordering::SeqCst);
        self.die_processed_count.store(0, Ordering::SeqCst);
        self.die_registered_count.store(0, Ordering::SeqCst);
        self.error_count.store(0, Ordering::SeqCst);
    }

    pub fn record_object_file(&self) {
        self.object_file_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_die_processed(&self) {
        self.die_processed_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_die_registered(&self) {
        self.die_registered_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_odrv(&self) {
        self.odrv_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }
}
