//! Race-card sources.
//!
//! Defines the `SourceCollector` trait and the statically-typed
//! `SourceRegistry` that builds collectors from configuration:
//! - `json_feed`: HTTP JSON race-card feed
//! - `fixture`: offline sample data read from a local file
//!
//! Collectors only fetch and parse. Timeouts, retries, caching and the
//! circuit breaker live in the engine's resilience wrapper.

pub mod feed;
pub mod fixture;
pub mod json_feed;
pub mod odds;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::SourceConfig;
use crate::types::{CollectorError, EngineError, NormalizedRace, SourceId};

/// Per-call context handed to `fetch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchContext {
    /// Meeting date to request.
    pub race_date: NaiveDate,
}

impl FetchContext {
    pub fn today() -> Self {
        Self {
            race_date: Utc::now().date_naive(),
        }
    }
}

/// Raw response body as returned by a source, before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

impl RawPayload {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            fetched_at: Utc::now(),
        }
    }
}

/// Contract every race-card source implements.
///
/// `parse` must tolerate partial or garbled data: skip what it cannot read
/// and return the rest. Returning `Err` is reserved for payloads that are
/// unusable as a whole.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceCollector: Send + Sync {
    /// Stable identifier used for priority, provenance and breaker state.
    fn id(&self) -> SourceId;

    /// Fetch the raw race card. May be slow or fail.
    async fn fetch(&self, ctx: &FetchContext) -> Result<RawPayload, CollectorError>;

    /// Turn a raw payload into normalised races.
    fn parse(&self, raw: RawPayload) -> Result<Vec<NormalizedRace>, CollectorError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Constructor for one source kind.
pub type CollectorFactory = fn(&SourceConfig) -> Result<Arc<dyn SourceCollector>, CollectorError>;

/// Maps a configured `kind` to its constructor.
pub struct SourceRegistry {
    factories: HashMap<String, CollectorFactory>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl SourceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with every built-in collector kind.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(json_feed::KIND, json_feed::JsonFeedCollector::from_config);
        registry.register(fixture::KIND, fixture::FixtureCollector::from_config);
        registry
    }

    pub fn register(&mut self, kind: &str, factory: CollectorFactory) {
        self.factories.insert(kind.to_string(), factory);
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build one collector per enabled source, in configuration order.
    ///
    /// A source that cannot be constructed is not dropped: it is replaced
    /// by a collector that reports the configuration problem every cycle,
    /// so the failure shows up in that source's status.
    pub fn build(&self, configs: &[SourceConfig]) -> Vec<Arc<dyn SourceCollector>> {
        let mut collectors: Vec<Arc<dyn SourceCollector>> = Vec::with_capacity(configs.len());

        for cfg in configs {
            if !cfg.enabled {
                info!(source = %cfg.id, "Source disabled, skipping");
                continue;
            }

            let built = match self.factories.get(&cfg.kind) {
                Some(factory) => factory(cfg),
                None => Err(CollectorError::Configuration(
                    EngineError::UnknownSourceKind {
                        source_id: cfg.id.to_string(),
                        kind: cfg.kind.clone(),
                        known: self.kinds().join(", "),
                    }
                    .to_string(),
                )),
            };

            match built {
                Ok(collector) => {
                    info!(source = %cfg.id, kind = %cfg.kind, "Source registered");
                    collectors.push(collector);
                }
                Err(e) => {
                    warn!(source = %cfg.id, kind = %cfg.kind, error = %e, "Source misconfigured");
                    collectors.push(Arc::new(MisconfiguredCollector::new(cfg.id.clone(), e)));
                }
            }
        }

        collectors
    }
}

/// Stand-in for a source whose construction failed.
pub struct MisconfiguredCollector {
    id: SourceId,
    error: CollectorError,
}

impl MisconfiguredCollector {
    pub fn new(id: SourceId, error: CollectorError) -> Self {
        Self { id, error }
    }
}

#[async_trait]
impl SourceCollector for MisconfiguredCollector {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    async fn fetch(&self, _ctx: &FetchContext) -> Result<RawPayload, CollectorError> {
        Err(self.error.clone())
    }

    fn parse(&self, _raw: RawPayload) -> Result<Vec<NormalizedRace>, CollectorError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
