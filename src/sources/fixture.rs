//! Offline fixture source.
//!
//! Reads a race card in the feed format from a local file. Useful for
//! demos and for running the engine without network access.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use super::feed::parse_feed;
use super::{FetchContext, RawPayload, SourceCollector};
use crate::config::SourceConfig;
use crate::types::{CollectorError, NormalizedRace, SourceId};

pub const KIND: &str = "fixture";

pub struct FixtureCollector {
    id: SourceId,
    path: Option<PathBuf>,
}

impl FixtureCollector {
    pub fn new(id: SourceId, path: Option<PathBuf>) -> Self {
        Self { id, path }
    }

    /// Factory registered under `fixture`. A missing path is accepted here
    /// and reported as `NotSupported` at fetch time.
    pub fn from_config(cfg: &SourceConfig) -> Result<Arc<dyn SourceCollector>, CollectorError> {
        Ok(Arc::new(Self::new(cfg.id.clone(), cfg.path.as_ref().map(PathBuf::from))))
    }
}

#[async_trait]
impl SourceCollector for FixtureCollector {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    async fn fetch(&self, _ctx: &FetchContext) -> Result<RawPayload, CollectorError> {
        let path = self.path.as_ref().ok_or_else(|| {
            CollectorError::NotSupported(format!("fixture source {} has no path to read", self.id))
        })?;

        debug!(source = %self.id, path = %path.display(), "Reading fixture");
        let body = tokio::fs::read_to_string(path).await.map_err(|e| {
            CollectorError::Configuration(format!("cannot read fixture {}: {e}", path.display()))
        })?;
        Ok(RawPayload::new(body))
    }

    fn parse(&self, raw: RawPayload) -> Result<Vec<NormalizedRace>, CollectorError> {
        parse_feed(&self.id, &raw.body, raw.fetched_at)
    }
}
