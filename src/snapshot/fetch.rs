//! Pages every collection out of the source query service into a [`Snapshot`]

use super::{Result, Snapshot};
use crate::http::HttpClient;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

pub struct SnapshotFetcher {
    client: HttpClient,
    endpoint: String,
    page_size: usize,
}

impl SnapshotFetcher {
    pub fn new(client: HttpClient, endpoint: impl Into<String>, page_size: usize) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            page_size: page_size.max(1),
        }
    }

    pub async fn fetch(&self) -> Result<Snapshot> {
        let taken_at = Utc::now();
        let snapshot = Snapshot {
            taken_at: Some(taken_at),
            channel_categories: self.fetch_collection("channelCategories").await?,
            video_categories: self.fetch_collection("videoCategories").await?,
            channels: self.fetch_collection("channels").await?,
            videos: self.fetch_collection("videos").await?,
            members: self.fetch_collection("members").await?,
        };

        info!(
            channels = snapshot.channels.len(),
            videos = snapshot.videos.len(),
            members = snapshot.members.len(),
            "Snapshot fetched"
        );

        Ok(snapshot)
    }

    /// `GET {endpoint}/{collection}?offset=N&limit=M` until a short page
    async fn fetch_collection<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();

        loop {
            let url = format!(
                "{}/{}?offset={}&limit={}",
                self.endpoint,
                collection,
                items.len(),
                self.page_size
            );
            let page: Vec<T> = self.client.get_json(&url).await?;
            let page_len = page.len();
            items.extend(page);

            debug!(collection, fetched = items.len(), "Fetched page");

            if page_len < self.page_size {
                break;
            }
        }

        Ok(items)
    }
}
