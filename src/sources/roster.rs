//! Roster source backed by the map service's HTTP API.

use crate::roster::{RosterProvider, System};
use crate::sources::SourceClient;
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize)]
struct RosterEnvelope {
    #[serde(rename = "Data", default)]
    data: Vec<System>,
}

pub struct HttpRosterSource {
    client: SourceClient,
    base_url: String,
    slug: String,
    token: String,
    cancel: CancellationToken,
}

impl HttpRosterSource {
    pub fn new(
        client: SourceClient,
        base_url: impl Into<String>,
        slug: impl Into<String>,
        token: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            slug: slug.into(),
            token: token.into(),
            cancel,
        }
    }
}

#[async_trait]
impl RosterProvider for HttpRosterSource {
    async fn fetch_systems(&self) -> Result<Vec<System>> {
        let url = format!("{}/api/map/systems?slug={}", self.base_url, self.slug);
        tracing::debug!(url = %url, "fetching systems on map");

        let envelope: RosterEnvelope = self
            .client
            .get_json(&url, Some(&self.token), &self.cancel)
            .await?;

        Ok(envelope.data)
    }
}
