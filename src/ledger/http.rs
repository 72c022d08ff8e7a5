//! JSON-over-HTTP ledger client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{Call, LedgerClient, LedgerError, LedgerEvent, Result};
use crate::config::LedgerConfig;

#[derive(Serialize)]
struct BatchRequest<'a> {
    signer: &'a str,
    calls: &'a [Call],
}

#[derive(Deserialize)]
struct BatchResponse {
    events: Vec<LedgerEvent>,
}

/// Submits batches as `POST {endpoint}/batch` with the authority key as a bearer token
pub struct HttpLedger {
    client: Client,
    batch_url: String,
    signer: String,
    authority_key: String,
}

impl HttpLedger {
    pub fn new(config: &LedgerConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| LedgerError::Transport("ledger.endpoint is not configured".into()))?;
        let authority_key = config
            .authority_key
            .clone()
            .ok_or_else(|| LedgerError::Transport("authority key is not configured".into()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        info!(endpoint, signer = %config.authority_account, "Ledger client ready");

        Ok(Self {
            client,
            batch_url: format!("{}/batch", endpoint.trim_end_matches('/')),
            signer: config.authority_account.clone(),
            authority_key,
        })
    }
}

#[async_trait]
impl LedgerClient for HttpLedger {
    async fn submit_batch(&self, calls: Vec<Call>) -> Result<Vec<LedgerEvent>> {
        debug!(calls = calls.len(), url = %self.batch_url, "Submitting batch");

        let response = self
            .client
            .post(&self.batch_url)
            .bearer_auth(&self.authority_key)
            .json(&BatchRequest {
                signer: &self.signer,
                calls: &calls,
            })
            .send()
            .await
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: BatchResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Decode(e.to_string()))?;

        debug!(events = body.events.len(), "Batch finalized");
        Ok(body.events)
    }
}
