//! HTTP JSON race-card feed.
//!
//! Issues `GET {url}?date=YYYY-MM-DD`, optionally with an API-key header,
//! and decodes the body with the shared feed format.
//!
//! Failure classification:
//! - connect errors, request timeouts, 429 and 5xx → `Transient`
//! - 401 / 403, bad URL, missing credential → `Configuration`
//! - any other non-success status → `Malformed`

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::feed::parse_feed;
use super::{FetchContext, RawPayload, SourceCollector};
use crate::config::{AppConfig, SourceConfig};
use crate::types::{CollectorError, NormalizedRace, SourceId};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const KIND: &str = "json_feed";

const DEFAULT_API_KEY_HEADER: &str = "X-Api-Key";

/// Transport-level ceiling. The resilience wrapper's own timeout is
/// normally shorter.
const HTTP_TIMEOUT_SECS: u64 = 30;

/// Error bodies are truncated to this many characters in messages.
const MAX_ERROR_BODY: usize = 200;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct JsonFeedCollector {
    id: SourceId,
    http: Client,
    url: String,
    api_key: Option<(String, SecretString)>,
}

impl JsonFeedCollector {
    pub fn new(
        id: SourceId,
        url: impl Into<String>,
        api_key: Option<(String, SecretString)>,
    ) -> Result<Self, CollectorError> {
        let url = url.into();
        reqwest::Url::parse(&url)
            .map_err(|e| CollectorError::Configuration(format!("invalid url {url}: {e}")))?;

        let http = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent("PADDOCK/0.1.0 (race-card aggregator)")
            .build()
            .map_err(|e| CollectorError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { id, http, url, api_key })
    }

    /// Factory registered under `json_feed`.
    pub fn from_config(cfg: &SourceConfig) -> Result<Arc<dyn SourceCollector>, CollectorError> {
        let url = cfg
            .url
            .as_deref()
            .ok_or_else(|| CollectorError::Configuration(format!("source {} has no url", cfg.id)))?;

        let api_key = match &cfg.api_key_env {
            Some(env) => {
                let value = AppConfig::resolve_env(env)
                    .map_err(|e| CollectorError::Configuration(format!("{e:#}")))?;
                let header = cfg
                    .api_key_header
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_KEY_HEADER.to_string());
                Some((header, SecretString::new(value)))
            }
            None => None,
        };

        Ok(Arc::new(Self::new(cfg.id.clone(), url, api_key)?))
    }

    fn request_url(&self, ctx: &FetchContext) -> String {
        let date = ctx.race_date.format("%Y-%m-%d").to_string();
        let sep = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{sep}date={}", self.url, urlencoding::encode(&date))
    }
}

/// Map an HTTP status to the collector failure taxonomy.
fn classify_status(status: StatusCode, body: &str) -> CollectorError {
    let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
    let msg = format!("HTTP {status}: {snippet}");
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        CollectorError::Configuration(msg)
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CollectorError::Transient(msg)
    } else {
        CollectorError::Malformed(msg)
    }
}

fn classify_transport(e: reqwest::Error) -> CollectorError {
    if e.is_builder() {
        CollectorError::Configuration(e.to_string())
    } else {
        CollectorError::Transient(e.to_string())
    }
}

#[async_trait]
impl SourceCollector for JsonFeedCollector {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    async fn fetch(&self, ctx: &FetchContext) -> Result<RawPayload, CollectorError> {
        let url = self.request_url(ctx);
        debug!(source = %self.id, url = %url, "Fetching race card");

        let mut req = self.http.get(&url);
        if let Some((header, key)) = &self.api_key {
            req = req.header(header.as_str(), key.expose_secret().as_str());
        }

        let resp = req.send().await.map_err(classify_transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        Ok(RawPayload::new(body))
    }

    fn parse(&self, raw: RawPayload) -> Result<Vec<NormalizedRace>, CollectorError> {
        parse_feed(&self.id, &raw.body, raw.fetched_at)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
