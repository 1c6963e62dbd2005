//! Core engine: the fetch → merge → score cycle.

pub mod breaker;
pub mod cache;
pub mod merge;
pub mod orchestrator;
pub mod resilience;
pub mod scorer;

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::sources::SourceCollector;
use crate::types::{CycleReport, EngineError, SourceId};
use orchestrator::Orchestrator;
use scorer::RuleSet;

/// Long-lived aggregation engine. Holds the configured sources, the
/// orchestrator (and with it every source's breaker and cache) and the
/// qualification rules.
pub struct AggregationEngine {
    sources: Vec<Arc<dyn SourceCollector>>,
    orchestrator: Orchestrator,
    priority: Vec<SourceId>,
    rules: RuleSet,
}

impl AggregationEngine {
    pub fn new(
        sources: Vec<Arc<dyn SourceCollector>>,
        orchestrator: Orchestrator,
        priority: Vec<SourceId>,
        rules: RuleSet,
    ) -> Result<Self, EngineError> {
        rules.validate()?;
        Ok(Self {
            sources,
            orchestrator,
            priority,
            rules,
        })
    }

    /// Build from configuration and an already-built source list.
    pub fn from_config(cfg: &AppConfig, sources: Vec<Arc<dyn SourceCollector>>) -> Result<Self, EngineError> {
        cfg.resilience.validate()?;
        Self::new(
            sources,
            Orchestrator::new(cfg.resilience.clone()),
            cfg.source_priority.clone(),
            cfg.rules()?.clone(),
        )
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Run one full cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let (_tx, rx) = watch::channel(false);
        self.run_cycle_with_shutdown(rx).await
    }

    /// Run one full cycle, abandoning in-flight source calls on shutdown.
    pub async fn run_cycle_with_shutdown(&self, shutdown: watch::Receiver<bool>) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(cycle = %cycle_id, sources = self.sources.len(), "Starting cycle");

        // 1. Fan out to every source
        let outcome = self
            .orchestrator
            .run_cycle_with_shutdown(&self.sources, shutdown)
            .await;
        let raw_races = outcome.races.len();

        // 2. Merge same-identity races
        let merged = merge::merge(outcome.races, &self.priority);

        // 3. Score
        let races = scorer::score_all(merged, &self.rules);
        let health = self.orchestrator.health_snapshot().await;

        let report = CycleReport {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            statuses: outcome.statuses,
            raw_races,
            races,
            health,
        };

        info!(
            cycle = %report.cycle_id,
            sources_ok = report.sources_ok(),
            sources = report.statuses.len(),
            raw = report.raw_races,
            merged = report.races.len(),
            qualified = report.qualified().count(),
            "Cycle complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResilienceConfig;
    use crate::sources::fixture::FixtureCollector;
    use crate::types::SourceOutcome;
    use rust_decimal_macros::dec;
    use crate::engine::scorer::{FieldSizeBand, FieldSizeRule, OddsRule};
    use std::path::PathBuf;

    fn rules() -> RuleSet {
        RuleSet {
            threshold: dec!(20),
            field_size: FieldSizeRule {
                bands: vec![FieldSizeBand { min: 2, max: 8, points: dec!(10) }],
                miss_points: dec!(0),
            },
            favorite: OddsRule { min: Some(dec!(1.5)), max: None, points: dec!(10) },
            second_favorite: OddsRule { min: Some(dec!(3.0)), max: None, points: dec!(10) },
        }
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let mut bad = rules();
        bad.field_size.bands.clear();
        let result = AggregationEngine::new(Vec::new(), Orchestrator::new(ResilienceConfig::default()), Vec::new(), bad);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cycle_over_sample_fixture() {
        let path = PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/sample_races.json"));
        let sources: Vec<Arc<dyn SourceCollector>> = vec![
            Arc::new(FixtureCollector::new(SourceId::from("sample"), Some(path))),
            Arc::new(FixtureCollector::new(SourceId::from("offline"), None)),
        ];
        let engine = AggregationEngine::new(
            sources,
            Orchestrator::new(ResilienceConfig::default()),
            vec![SourceId::from("sample")],
            rules(),
        )
        .unwrap();

        let report = engine.run_cycle().await;
        assert_eq!(report.statuses.len(), 2);
        assert_eq!(report.statuses[0].outcome, SourceOutcome::Ok);
        assert_eq!(report.statuses[1].outcome, SourceOutcome::Error);
        assert!(report.raw_races > 0);
        assert!(!report.races.is_empty());
        assert!(report.finished_at >= report.started_at);

        let ids: Vec<&str> = report.health.iter().map(|h| h.source_id.as_str()).collect();
        assert_eq!(ids, vec!["offline", "sample"]);
        assert_eq!(report.health[0].failed_requests, 1);
        assert_eq!(report.health[1].successful_requests, 1);
    }
}
