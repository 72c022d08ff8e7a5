//! Configuration management for contentmig
//!
//! Settings are layered from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use contentmig::config::Config;
//!
//! let config = Config::load(None).expect("Failed to load configuration");
//! println!("Results go to: {}", config.migration.results_dir.display());
//! ```
//!
//! # Environment Variables
//!
//! Any key can be overridden with `CONTENTMIG__<section>__<key>`:
//! - `CONTENTMIG__LEDGER__ENDPOINT=http://ledger:9944`
//! - `CONTENTMIG__MIGRATION__VIDEO_BATCH_SIZE=10`
//! - `CONTENTMIG__DESTINATION__UPLOAD_ENDPOINTS=http://a:3333,http://b:3333`
//!
//! The ledger authority key is only read from `CONTENTMIG_AUTHORITY_KEY`.
//!
//! # Configuration File
//!
//! Loaded from `config/contentmig.toml` unless a path is passed explicitly
//! or `CONTENTMIG_CONFIG` points elsewhere.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    Config, DestinationConfig, FeesConfig, HttpConfig, LedgerConfig, MigrationConfig,
    SourceConfig,
};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails.
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = sources::load(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path, skipping `.env` and secrets
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
