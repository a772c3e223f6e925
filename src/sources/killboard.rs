//! Killboard page feed and enrichment API.

use crate::pipeline::killmail::Killmail;
use crate::sources::SourceClient;
use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// The two lookups the fetch pipeline needs: the paginated per-system feed
/// of killmail summaries and the detail call that completes one record.
#[async_trait]
pub trait KillmailSource: Send + Sync {
    async fn system_page(
        &self,
        system_id: u64,
        past_seconds: u64,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<Killmail>>;

    async fn killmail_detail(
        &self,
        id: u64,
        hash: &str,
        cancel: &CancellationToken,
    ) -> Result<Killmail>;

    /// Public permalink recorded as provenance on emitted records.
    fn kill_url(&self, id: u64) -> String;
}

pub struct KillboardClient {
    client: SourceClient,
    killboard_url: String,
    esi_url: String,
}

impl KillboardClient {
    pub fn new(
        client: SourceClient,
        killboard_url: impl Into<String>,
        esi_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            killboard_url: killboard_url.into(),
            esi_url: esi_url.into(),
        }
    }
}

#[async_trait]
impl KillmailSource for KillboardClient {
    async fn system_page(
        &self,
        system_id: u64,
        past_seconds: u64,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<Killmail>> {
        let url = format!(
            "{}/api/systemID/{}/pastSeconds/{}/page/{}/",
            self.killboard_url, system_id, past_seconds, page
        );
        tracing::debug!(system = system_id, page, url = %url, "fetching killmails");

        self.client.get_json(&url, None, cancel).await
    }

    async fn killmail_detail(
        &self,
        id: u64,
        hash: &str,
        cancel: &CancellationToken,
    ) -> Result<Killmail> {
        let url = format!(
            "{}/latest/killmails/{}/{}/?datasource=tranquility",
            self.esi_url, id, hash
        );
        tracing::debug!(id, hash, url = %url, "fetching killmail detail");

        self.client.get_json(&url, None, cancel).await
    }

    fn kill_url(&self, id: u64) -> String {
        format!("{}/kill/{}/", self.killboard_url, id)
    }
}
