use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub destination: DestinationConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub fees: FeesConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Destination ledger connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// Base URL of the ledger batch endpoint; `None` means no ledger is reachable
    pub endpoint: Option<String>,
    /// Account that signs every submitted batch
    #[serde(default = "default_authority_account")]
    pub authority_account: String,
    /// Authority signing key (loaded from environment, never from config file)
    #[serde(skip)]
    pub authority_key: Option<String>,
    #[serde(default = "default_ledger_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            authority_account: default_authority_account(),
            authority_key: None,
            request_timeout_secs: default_ledger_timeout_secs(),
        }
    }
}

fn default_authority_account() -> String {
    "authority".to_string()
}

fn default_ledger_timeout_secs() -> u64 {
    300
}

/// Source system: snapshot query service and asset distributors
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub query_endpoint: Option<String>,
    #[serde(default)]
    pub distributor_endpoints: Vec<String>,
    /// Local cache of source assets, keyed by source object id
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            query_endpoint: None,
            distributor_endpoints: Vec::new(),
            assets_dir: default_assets_dir(),
            page_size: default_page_size(),
        }
    }
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("data/assets")
}

fn default_page_size() -> usize {
    1000
}

/// Destination asset storage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DestinationConfig {
    #[serde(default)]
    pub upload_endpoints: Vec<String>,
    /// Staging directory for assets waiting to be uploaded
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            upload_endpoints: Vec::new(),
            uploads_dir: default_uploads_dir(),
        }
    }
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("data/uploads")
}

/// Migration engine tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MigrationConfig {
    /// Directory holding per-stage state files and the pending upload queue
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_category_batch_size")]
    pub category_batch_size: usize,
    #[serde(default = "default_channel_batch_size")]
    pub channel_batch_size: usize,
    #[serde(default = "default_video_batch_size")]
    pub video_batch_size: usize,
    #[serde(default = "default_member_batch_size")]
    pub member_batch_size: usize,
    /// Assets larger than this are skipped
    #[serde(default = "default_max_asset_size")]
    pub max_asset_size: ByteSize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            category_batch_size: default_category_batch_size(),
            channel_batch_size: default_channel_batch_size(),
            video_batch_size: default_video_batch_size(),
            member_batch_size: default_member_batch_size(),
            max_asset_size: default_max_asset_size(),
        }
    }
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_category_batch_size() -> usize {
    100
}

fn default_channel_batch_size() -> usize {
    20
}

fn default_video_batch_size() -> usize {
    20
}

fn default_member_batch_size() -> usize {
    50
}

fn default_max_asset_size() -> ByteSize {
    ByteSize(10 * 1024 * 1024 * 1024) // 10 GB
}

/// Destination storage fees
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeesConfig {
    /// Deposit locked per stored object
    #[serde(default = "default_deletion_prize")]
    pub data_object_deletion_prize: u64,
    /// Fee per started mebibyte of asset data
    #[serde(default)]
    pub fee_per_megabyte: u64,
}

impl Default for FeesConfig {
    fn default() -> Self {
        Self {
            data_object_deletion_prize: default_deletion_prize(),
            fee_per_megabyte: 0,
        }
    }
}

fn default_deletion_prize() -> u64 {
    1
}

/// Shared HTTP client settings for downloads, uploads and snapshot paging
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    3
}

fn default_user_agent() -> String {
    concat!("contentmig/", env!("CARGO_PKG_VERSION")).to_string()
}
