//! Shared HTTP plumbing for the external collaborators.
//!
//! One `reqwest` client carries the composed User-Agent and the configured
//! request timeout; every call takes a cancellation token so a shutdown
//! aborts in-flight requests instead of waiting them out.

use anyhow::{bail, Context, Result};
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::select;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct SourceClient {
    http: reqwest::Client,
}

impl SourceClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }

    /// Performs a GET and decodes the JSON body. Non-2xx statuses and decode
    /// failures are errors carrying the URL for context.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        bearer: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let mut request = self.http.get(url).header(ACCEPT, "application/json");
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = select! {
            _ = cancel.cancelled() => bail!("request cancelled: {url}"),
            result = request.send() => {
                result.with_context(|| format!("request failed: {url}"))?
            }
        };

        let response = response
            .error_for_status()
            .with_context(|| format!("request rejected: {url}"))?;

        let value = select! {
            _ = cancel.cancelled() => bail!("request cancelled: {url}"),
            result = response.json::<T>() => {
                result.with_context(|| format!("failed to decode response from {url}"))?
            }
        };

        Ok(value)
    }
}
