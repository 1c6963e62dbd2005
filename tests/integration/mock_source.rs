//! Mock source for integration testing.
//!
//! Provides a deterministic `SourceCollector` that returns a fixed set of
//! races, counts network calls and can be switched into failure mode, all
//! in-memory with no external dependencies.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use paddock::sources::{FetchContext, RawPayload, SourceCollector};
use paddock::types::*;

/// A mock race-card source. Races and failure mode are controllable from
/// test code; `fetch_count` reports how many network calls were made.
pub struct MockSource {
    id: SourceId,
    races: Arc<Mutex<Vec<NormalizedRace>>>,
    fetches: AtomicUsize,
    /// If set, every fetch returns this error.
    force_error: Arc<Mutex<Option<CollectorError>>>,
}

impl MockSource {
    pub fn new(id: &str, races: Vec<NormalizedRace>) -> Arc<Self> {
        Arc::new(Self {
            id: SourceId::from(id),
            races: Arc::new(Mutex::new(races)),
            fetches: AtomicUsize::new(0),
            force_error: Arc::new(Mutex::new(None)),
        })
    }

    /// Force all subsequent fetches to fail with `err`.
    pub fn set_error(&self, err: CollectorError) {
        *self.force_error.lock().unwrap() = Some(err);
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn set_races(&self, races: Vec<NormalizedRace>) {
        *self.races.lock().unwrap() = races;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceCollector for MockSource {
    fn id(&self) -> SourceId {
        self.id.clone()
    }

    async fn fetch(&self, _ctx: &FetchContext) -> Result<RawPayload, CollectorError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.force_error.lock().unwrap().clone() {
            return Err(err);
        }
        let races = self.races.lock().unwrap().clone();
        let body = serde_json::to_string(&races).map_err(|e| CollectorError::Malformed(e.to_string()))?;
        Ok(RawPayload::new(body))
    }

    fn parse(&self, raw: RawPayload) -> Result<Vec<NormalizedRace>, CollectorError> {
        serde_json::from_str(&raw.body).map_err(|e| CollectorError::Malformed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, h, m, 0).unwrap()
}

/// Build a race from `(program number, decimal odds)` pairs, all quoted by
/// `source`.
pub fn race(source: &str, venue: &str, number: u32, start: DateTime<Utc>, runners: &[(u32, Option<Decimal>)]) -> NormalizedRace {
    let mut race = NormalizedRace::new(source, venue, number, Some(start));
    for (n, odds) in runners {
        race.upsert_runner(
            NormalizedRunner::new(format!("Runner {n}"), Some(*n))
                .with_quote(source, OddsQuote::new(*odds, at(12, 0))),
        );
    }
    race
}
