use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "CONTENTMIG_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/contentmig.toml";
const ENV_PREFIX: &str = "CONTENTMIG";
const ENV_SEPARATOR: &str = "__";
const AUTHORITY_KEY_ENV_VAR: &str = "CONTENTMIG_AUTHORITY_KEY";

/// Load configuration with priority (lowest to highest):
/// 1. Defaults (embedded in structs)
/// 2. TOML file, if it exists
/// 3. `.env` file (via dotenvy)
/// 4. Process environment
pub fn load(explicit_path: Option<PathBuf>) -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let config_path = explicit_path
        .or_else(|| env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);

    Ok(config)
}

/// Secrets never live in TOML files, only in the environment
fn load_secrets(config: &mut Config) {
    if let Ok(key) = env::var(AUTHORITY_KEY_ENV_VAR) {
        if !key.is_empty() {
            config.ledger.authority_key = Some(key);
        }
    }
}

/// Load configuration from a specific path and the environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // CONTENTMIG__MIGRATION__RESULTS_DIR -> migration.results_dir
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("source.distributor_endpoints")
            .with_list_parse_key("destination.upload_endpoints"),
    );

    builder.build()?.try_deserialize()
}
