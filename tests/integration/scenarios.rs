//! End-to-end scenarios.
//!
//! Drives the public API with in-memory sources: resilience behaviour
//! across cycles, merge properties, and the full fetch → merge → score
//! path.

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use paddock::config::{AppConfig, ResilienceConfig};
use paddock::engine::merge::merge;
use paddock::engine::orchestrator::Orchestrator;
use paddock::engine::scorer::{score, FieldSizeBand, FieldSizeRule, OddsRule, RuleSet};
use paddock::engine::AggregationEngine;
use paddock::sources::{SourceCollector, SourceRegistry};
use paddock::types::*;

use crate::mock_source::{at, race, MockSource};

fn resilience() -> ResilienceConfig {
    ResilienceConfig {
        failure_threshold: 3,
        cooldown_secs: 0.4,
        cache_ttl_secs: 0.0,
        timeout_secs: 2.0,
        max_attempts: 1,
        base_backoff_ms: 1,
    }
}

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

fn priority() -> Vec<SourceId> {
    vec![SourceId::from("A"), SourceId::from("B"), SourceId::from("C")]
}

fn meadow_a() -> NormalizedRace {
    race("A", "Meadow Park", 3, at(14, 30), &[(1, Some(dec!(2.0))), (2, Some(dec!(5.0)))])
}

fn meadow_b() -> NormalizedRace {
    race("B", "meadow park", 3, at(14, 30), &[(1, Some(dec!(2.1))), (3, Some(dec!(9.0)))])
}

fn dyn_sources(sources: &[Arc<MockSource>]) -> Vec<Arc<dyn SourceCollector>> {
    sources.iter().map(|s| Arc::clone(s) as Arc<dyn SourceCollector>).collect()
}

// -- End to end ------------------------------------------------------------

#[tokio::test]
async fn test_meadow_park_end_to_end() {
    let a = MockSource::new("A", vec![meadow_a()]);
    let b = MockSource::new("B", vec![meadow_b()]);

    let engine = AggregationEngine::new(
        dyn_sources(&[b, a]),
        Orchestrator::new(resilience()),
        priority(),
        rules(),
    )
    .unwrap();
    let report = engine.run_cycle().await;

    assert_eq!(report.sources_ok(), 2);
    assert_eq!(report.raw_races, 2);
    assert_eq!(report.races.len(), 1);

    let scored = &report.races[0];
    let merged = &scored.race;
    assert_eq!(merged.venue, "Meadow Park");
    assert_eq!(merged.sources, vec![SourceId::from("A"), SourceId::from("B")]);
    assert_eq!(merged.runners.len(), 3);

    let one = merged.runner(&RunnerKey::Number(1)).unwrap();
    assert_eq!(one.odds_by_source[&SourceId::from("A")].value, Some(dec!(2.0)));
    assert_eq!(one.odds_by_source[&SourceId::from("B")].value, Some(dec!(2.1)));

    assert!(scored.qualification.qualified);
    assert_eq!(scored.qualification.total_score, dec!(30));
    assert_eq!(report.qualified().count(), 1);
}

#[tokio::test]
async fn test_venue_aliases_dedupe_across_sources() {
    let a = MockSource::new("A", vec![race("A", "Haydock Park", 2, at(15, 10), &[(1, Some(dec!(3.0)))])]);
    let b = MockSource::new("B", vec![race("B", "HAYDOCK", 2, at(15, 10), &[(2, Some(dec!(4.5)))])]);

    let engine = AggregationEngine::new(
        dyn_sources(&[a, b]),
        Orchestrator::new(resilience()),
        priority(),
        rules(),
    )
    .unwrap();
    let report = engine.run_cycle().await;

    assert_eq!(report.raw_races, 2);
    assert_eq!(report.races.len(), 1);
    assert_eq!(report.races[0].race.venue, "Haydock Park");
    assert_eq!(report.races[0].race.runners.len(), 2);
    assert_eq!(report.health.len(), 2);
    assert!(report.health.iter().all(|h| h.successful_requests == 1));
}

// -- Resilience --------------------------------------------------------------

#[tokio::test]
async fn test_breaker_opens_and_recovers() {
    let x = MockSource::new("X", vec![race("X", "Ascot", 1, at(13, 0), &[])]);
    x.set_error(CollectorError::Transient("connection reset".into()));
    let sources = dyn_sources(&[x.clone()]);
    let orch = Orchestrator::new(resilience());

    for _ in 0..3 {
        let out = orch.run_cycle(&sources).await;
        assert_eq!(out.statuses[0].outcome, SourceOutcome::Error);
    }
    assert!(orch.breaker_state(&SourceId::from("X")).await.unwrap().is_open);

    // Fourth call inside the cooldown: no network attempt.
    let out = orch.run_cycle(&sources).await;
    assert_eq!(out.statuses[0].outcome, SourceOutcome::CircuitOpen);
    assert_eq!(x.fetch_count(), 3);

    // After the cooldown the call goes out again.
    x.clear_error();
    tokio::time::sleep(Duration::from_millis(450)).await;
    let out = orch.run_cycle(&sources).await;
    assert_eq!(out.statuses[0].outcome, SourceOutcome::Ok);
    assert_eq!(out.races.len(), 1);
    assert_eq!(x.fetch_count(), 4);
}

#[tokio::test]
async fn test_circuit_open_skip_leaves_other_sources_alone() {
    let x = MockSource::new("X", vec![race("X", "Ascot", 1, at(13, 0), &[])]);
    let y = MockSource::new("Y", vec![race("Y", "Kingsfield", 2, at(13, 30), &[])]);
    x.set_error(CollectorError::Configuration("missing credential".into()));
    let orch = Orchestrator::new(ResilienceConfig {
        cooldown_secs: 60.0,
        ..resilience()
    });

    for _ in 0..3 {
        orch.run_cycle(&dyn_sources(&[x.clone()])).await;
    }

    let out = orch.run_cycle(&dyn_sources(&[x.clone(), y.clone()])).await;
    assert_eq!(out.statuses.len(), 2);
    assert_eq!(out.statuses[0].source_id, SourceId::from("X"));
    assert_eq!(out.statuses[0].outcome, SourceOutcome::CircuitOpen);
    assert_eq!(out.statuses[0].races_found, 0);
    assert_eq!(out.statuses[1].outcome, SourceOutcome::Ok);
    assert!(out.races.iter().all(|r| r.sources == vec![SourceId::from("Y")]));
    assert_eq!(out.races.len(), 1);
}

#[tokio::test]
async fn test_cache_short_circuits_network() {
    let a = MockSource::new("A", vec![meadow_a()]);
    let sources = dyn_sources(&[a.clone()]);
    let orch = Orchestrator::new(ResilienceConfig {
        cache_ttl_secs: 60.0,
        ..resilience()
    });

    let first = orch.run_cycle(&sources).await;
    // The source changes upstream, but the cached result is still served.
    a.set_races(Vec::new());
    let second = orch.run_cycle(&sources).await;

    assert_eq!(a.fetch_count(), 1);
    assert_eq!(first.races, second.races);
    assert_eq!(second.statuses[0].outcome, SourceOutcome::Ok);
}

#[tokio::test]
async fn test_cache_hit_bypasses_open_breaker() {
    let a = MockSource::new("A", vec![meadow_a()]);
    let orch = Orchestrator::new(ResilienceConfig {
        cache_ttl_secs: 60.0,
        ..resilience()
    });
    let sources = dyn_sources(&[a.clone()]);

    let first = orch.run_cycle(&sources).await;
    a.set_error(CollectorError::Transient("down".into()));
    let second = orch.run_cycle(&sources).await;
    assert_eq!(second.statuses[0].outcome, SourceOutcome::Ok);
    assert_eq!(first.races, second.races);
}

#[tokio::test]
async fn test_misconfigured_source_reports_error() {
    let config = AppConfig::from_toml(
        r#"
        source_priority = ["feed", "sample"]

        [[sources]]
        id = "feed"
        kind = "json_feed"
        url = "https://racecards.example.com/v1/races"
        api_key_env = "PADDOCK_INTEGRATION_KEY_NEVER_SET"

        [[sources]]
        id = "sample"
        kind = "fixture"
        path = "fixtures/sample_races.json"

        [qualification]
        threshold = 20
        field_size = { bands = [{ min = 2, max = 8, points = 10 }] }
        favorite = { min = 1.5, points = 10 }
        second_favorite = { min = 3.0, points = 10 }
        "#,
    )
    .unwrap();

    let sources = SourceRegistry::with_builtin().build(&config.sources);
    let engine = AggregationEngine::from_config(&config, sources).unwrap();
    let report = engine.run_cycle().await;

    assert_eq!(report.statuses[0].outcome, SourceOutcome::Error);
    assert!(report.statuses[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("PADDOCK_INTEGRATION_KEY_NEVER_SET"));
    assert_eq!(report.statuses[1].outcome, SourceOutcome::Ok);
    assert!(!report.races.is_empty());
}

// -- Merge properties ----------------------------------------------------------

#[test]
fn test_merge_idempotent() {
    let x = vec![
        meadow_b(),
        meadow_a(),
        race("C", "Kingsfield", 1, at(13, 15), &[(1, Some(dec!(2.0)))]),
    ];
    let once = merge(x, &priority());
    assert_eq!(merge(once.clone(), &priority()), once);
}

#[test]
fn test_merge_associative_modulo_priority() {
    let c = race("C", "MEADOW PARK", 3, at(14, 30), &[(3, None), (4, Some(dec!(12.0)))]);
    let p = priority();

    let direct = merge(vec![meadow_a(), meadow_b(), c.clone()], &p);
    let mut stepwise = merge(vec![meadow_a(), meadow_b()], &p);
    stepwise.push(c);
    assert_eq!(merge(stepwise, &p), direct);
}

#[test]
fn test_odds_union_never_loses_quote() {
    let a = race("A", "Ascot", 1, at(14, 0), &[(3, Some(dec!(4.0)))]);
    let b = race("B", "Ascot", 1, at(14, 0), &[(3, None)]);
    let merged = merge(vec![a, b], &priority());
    let runner = merged[0].runner(&RunnerKey::Number(3)).unwrap();
    assert_eq!(runner.odds_by_source[&SourceId::from("A")].value, Some(dec!(4.0)));
    assert!(runner.odds_by_source.contains_key(&SourceId::from("B")));
}

// -- Scoring -------------------------------------------------------------------

#[test]
fn test_scorer_determinism() {
    let merged = merge(vec![meadow_a(), meadow_b()], &priority());
    let first = serde_json::to_vec(&score(&merged[0], &rules())).unwrap();
    let second = serde_json::to_vec(&score(&merged[0], &rules())).unwrap();
    assert_eq!(first, second);
}
