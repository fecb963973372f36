// src/config/mod.rs

//! Configuration loading and validation for fsrefresh.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate queue sizes, exclude patterns and names (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_and_validate};
pub use model::{LoggingSection, QueueSection, RawRefreshConfig, RefreshConfig, ScanSection};
