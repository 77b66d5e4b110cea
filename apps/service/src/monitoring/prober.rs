use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::stores::TrackedStore;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Probe of {store} timed out after {timeout:?}")]
    Timeout { store: String, timeout: Duration },

    #[error("Request to {store} failed: {source}")]
    Transport { store: String, source: reqwest::Error },

    #[error("Failed to read response body from {store}: {source}")]
    Body { store: String, source: reqwest::Error },

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Result of probing one store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub online: bool,
    pub checked_at: DateTime<Utc>,
}

/// Decides whether a single store is currently accepting orders
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, store: &TrackedStore) -> Result<ProbeOutcome, ProbeError>;
}

/// Fetches the storefront page and looks for a closed banner
///
/// - non-2xx/3xx status: offline
/// - page text contains any closed marker (case-insensitive): offline
/// - otherwise: online
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
    closed_markers: Vec<String>,
}

impl HttpProber {
    pub fn new(
        timeout: Duration,
        user_agent: &str,
        closed_markers: &[String],
    ) -> Result<Self, ProbeError> {
        Self::with_builder(reqwest::Client::builder(), timeout, user_agent, closed_markers)
    }

    /// Like [`HttpProber::new`], starting from a preconfigured client builder
    pub fn with_builder(
        builder: reqwest::ClientBuilder,
        timeout: Duration,
        user_agent: &str,
        closed_markers: &[String],
    ) -> Result<Self, ProbeError> {
        let client = builder
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(ProbeError::Client)?;

        Ok(Self {
            client,
            timeout,
            closed_markers: closed_markers
                .iter()
                .map(|marker| marker.to_lowercase())
                .filter(|marker| !marker.is_empty())
                .collect(),
        })
    }
}

/// Whether `body` carries one of the lowercase `markers`
pub fn shows_closed_marker(body: &str, markers: &[String]) -> bool {
    let body = body.to_lowercase();
    markers.iter().any(|marker| body.contains(marker.as_str()))
}

#[async_trait::async_trait]
impl Prober for HttpProber {
    async fn probe(&self, store: &TrackedStore) -> Result<ProbeOutcome, ProbeError> {
        let response = self.client.get(&store.url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout { store: store.id.clone(), timeout: self.timeout }
            } else {
                ProbeError::Transport { store: store.id.clone(), source: e }
            }
        })?;
        let checked_at = Utc::now();

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            debug!(store = %store.id, status = status.as_u16(), "Store page returned error status");
            return Ok(ProbeOutcome { online: false, checked_at });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::Body { store: store.id.clone(), source: e })?;
        let online = !shows_closed_marker(&body, &self.closed_markers);

        debug!(store = %store.id, status = status.as_u16(), online, "Probed store");
        Ok(ProbeOutcome { online, checked_at })
    }
}
