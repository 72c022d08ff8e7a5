//! Destination ledger write path
//!
//! The engine only needs one primitive from the ledger: submit an ordered
//! batch of calls signed by the authority account and get back the ordered
//! events it produced. Execution stops at the first failing call, which is
//! reported as [`LedgerEvent::BatchInterrupted`] with that call's index.

pub mod http;
pub mod mock;
mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use http::HttpLedger;
pub use mock::MockLedger;
pub use types::{AssetUpload, Call, CategoryKind, EntityKind, LedgerEvent};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger transport error: {0}")]
    Transport(String),

    #[error("Ledger rejected batch with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid ledger response: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit calls as one batch and return the events it emitted
    async fn submit_batch(&self, calls: Vec<Call>) -> Result<Vec<LedgerEvent>>;
}
