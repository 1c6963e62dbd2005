//! Shared types for the PADDOCK engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that source, engine and storage
//! modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Text normalisation
// ---------------------------------------------------------------------------

/// Trim and collapse internal whitespace. Case is preserved.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Case-folded, whitespace-collapsed form used for identity comparisons.
pub fn fold_text(text: &str) -> String {
    clean_text(text).to_lowercase()
}

/// Racecourse aliases seen across feeds, keyed by folded spelling.
const VENUE_ALIASES: &[(&str, &str)] = &[
    ("bangor-on-dee", "Bangor-on-Dee"),
    ("catterick bridge", "Catterick"),
    ("chelmsford city", "Chelmsford"),
    ("epsom downs", "Epsom"),
    ("fontwell", "Fontwell Park"),
    ("haydock", "Haydock Park"),
    ("kempton", "Kempton Park"),
    ("lingfield", "Lingfield Park"),
    ("newmarket (rowley)", "Newmarket"),
    ("newmarket (july)", "Newmarket"),
    ("sandown", "Sandown Park"),
    ("stratford", "Stratford-on-Avon"),
    ("yarmouth", "Great Yarmouth"),
    ("the curragh", "Curragh"),
];

/// Canonical display name for a racecourse. Known aliases map to one
/// spelling; anything else is only whitespace-cleaned.
pub fn canonical_venue(name: &str) -> String {
    let folded = fold_text(name);
    VENUE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == folded)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| clean_text(name))
}

// ---------------------------------------------------------------------------
// Source identity
// ---------------------------------------------------------------------------

/// Identifier of an external data source ("fanduel", "timeform", ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Odds
// ---------------------------------------------------------------------------

/// A single source's price for a runner at a point in time.
///
/// `value` is decimal odds. Anything at or below evens-money-stake (1.0)
/// is not a price and is stored as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OddsQuote {
    pub value: Option<Decimal>,
    pub observed_at: DateTime<Utc>,
}

impl OddsQuote {
    pub fn new(value: Option<Decimal>, observed_at: DateTime<Utc>) -> Self {
        Self {
            value: value.filter(|v| *v > Decimal::ONE),
            observed_at,
        }
    }

    /// A quote recording that the source listed the runner without a price.
    pub fn unpriced(observed_at: DateTime<Utc>) -> Self {
        Self { value: None, observed_at }
    }

    /// The price, re-checked so that hand-built or deserialised quotes
    /// can never leak an invalid value into scoring.
    pub fn price(&self) -> Option<Decimal> {
        self.value.filter(|v| *v > Decimal::ONE)
    }
}

impl fmt::Display for OddsQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.price() {
            Some(v) => write!(f, "{v}"),
            None => write!(f, "-"),
        }
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Identity of a runner within one race.
///
/// Numbered runners sort before name-keyed ones, so ordering a race's
/// runners by key yields saddle-cloth order followed by the rest.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RunnerKey {
    Number(u32),
    Name(String),
}

impl fmt::Display for RunnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerKey::Number(n) => write!(f, "#{n}"),
            RunnerKey::Name(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRunner {
    pub name: String,
    pub program_number: Option<u32>,
    #[serde(default)]
    pub scratched: bool,
    /// One quote per contributing source.
    #[serde(default)]
    pub odds_by_source: BTreeMap<SourceId, OddsQuote>,
}

impl NormalizedRunner {
    pub fn new(name: impl AsRef<str>, program_number: Option<u32>) -> Self {
        Self {
            name: clean_text(name.as_ref()),
            program_number,
            scratched: false,
            odds_by_source: BTreeMap::new(),
        }
    }

    /// Builder-style helper: record a quote and return self.
    pub fn with_quote(mut self, source: impl Into<SourceId>, quote: OddsQuote) -> Self {
        self.record_quote(source.into(), quote);
        self
    }

    /// Record a source's quote. A later quote from the same source replaces
    /// the earlier one; quotes from other sources are untouched.
    pub fn record_quote(&mut self, source: SourceId, quote: OddsQuote) {
        self.odds_by_source.insert(source, quote);
    }

    pub fn key(&self) -> RunnerKey {
        match self.program_number {
            Some(n) => RunnerKey::Number(n),
            None => RunnerKey::Name(fold_text(&self.name)),
        }
    }

    /// Lowest valid price across all sources.
    pub fn best_odds(&self) -> Option<Decimal> {
        self.odds_by_source.values().filter_map(OddsQuote::price).min()
    }

    pub fn has_odds(&self) -> bool {
        self.best_odds().is_some()
    }
}

impl fmt::Display for NormalizedRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(n) = self.program_number {
            write!(f, "#{n} ")?;
        }
        write!(f, "{}", self.name)?;
        match self.best_odds() {
            Some(o) => write!(f, " @ {o}"),
            None => write!(f, " (no odds)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Race
// ---------------------------------------------------------------------------

/// Normalised tuple deciding that two listings describe the same race.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct IdentityKey {
    pub venue: String,
    pub race_number: u32,
    /// Start time truncated to whole minutes since the Unix epoch.
    pub start_minute: Option<i64>,
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.start_minute {
            Some(m) => write!(f, "{}|R{}|{}", self.venue, self.race_number, m),
            None => write!(f, "{}|R{}|-", self.venue, self.race_number),
        }
    }
}

/// Which source supplied each top-level scalar of a merged race.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceProvenance {
    pub venue: Option<SourceId>,
    pub start_time: Option<SourceId>,
    pub race_type: Option<SourceId>,
    pub distance: Option<SourceId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRace {
    pub venue: String,
    pub race_number: u32,
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub race_type: Option<String>,
    #[serde(default)]
    pub distance: Option<String>,
    #[serde(default)]
    pub runners: Vec<NormalizedRunner>,
    /// Contributing sources, most trusted first.
    #[serde(default)]
    pub sources: Vec<SourceId>,
    #[serde(default)]
    pub provenance: RaceProvenance,
}

impl NormalizedRace {
    pub fn new(
        source: impl Into<SourceId>,
        venue: impl AsRef<str>,
        race_number: u32,
        start_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            venue: clean_text(venue.as_ref()),
            race_number,
            start_time,
            race_type: None,
            distance: None,
            runners: Vec::new(),
            sources: vec![source.into()],
            provenance: RaceProvenance::default(),
        }
    }

    /// Builder-style helper: add a runner and return self.
    pub fn with_runner(mut self, runner: NormalizedRunner) -> Self {
        self.upsert_runner(runner);
        self
    }

    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey {
            venue: fold_text(&canonical_venue(&self.venue)),
            race_number: self.race_number,
            start_minute: self.start_time.map(|t| t.timestamp().div_euclid(60)),
        }
    }

    /// Insert a runner, or fold it into the existing runner with the same key.
    ///
    /// Folding unions the quote maps (same-source quotes are replaced by the
    /// incoming one) and keeps the existing display name.
    pub fn upsert_runner(&mut self, runner: NormalizedRunner) {
        let key = runner.key();
        match self.runners.iter_mut().find(|r| r.key() == key) {
            Some(existing) => {
                existing.scratched |= runner.scratched;
                for (source, quote) in runner.odds_by_source {
                    existing.record_quote(source, quote);
                }
            }
            None => self.runners.push(runner),
        }
    }

    pub fn runner(&self, key: &RunnerKey) -> Option<&NormalizedRunner> {
        self.runners.iter().find(|r| &r.key() == key)
    }

    /// Runners eligible for scoring: not scratched, carrying a valid price.
    pub fn priced_runners(&self) -> impl Iterator<Item = &NormalizedRunner> {
        self.runners.iter().filter(|r| !r.scratched && r.has_odds())
    }

    /// The source that produced this race before any merge.
    pub fn primary_source(&self) -> Option<&SourceId> {
        self.sources.first()
    }

    /// Clean up a collector's output. Returns `None` when the race cannot
    /// be identified (empty venue, race number zero). Runners with blank
    /// names are dropped and duplicates folded together.
    pub fn sanitize(self) -> Option<Self> {
        let venue = canonical_venue(&self.venue);
        if venue.is_empty() || self.race_number == 0 {
            return None;
        }

        let mut race = Self {
            venue,
            race_type: self.race_type.map(|s| clean_text(&s)).filter(|s| !s.is_empty()),
            distance: self.distance.map(|s| clean_text(&s)).filter(|s| !s.is_empty()),
            runners: Vec::with_capacity(self.runners.len()),
            ..self
        };
        for mut runner in self.runners {
            runner.name = clean_text(&runner.name);
            if !runner.name.is_empty() {
                race.upsert_runner(runner);
            }
        }
        Some(race)
    }
}

impl fmt::Display for NormalizedRace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let start = self
            .start_time
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "--:--".to_string());
        let sources: Vec<&str> = self.sources.iter().map(SourceId::as_str).collect();
        write!(
            f,
            "{} R{} {} ({} runners, sources: {})",
            self.venue,
            self.race_number,
            start,
            self.runners.len(),
            sources.join(",")
        )
    }
}

// ---------------------------------------------------------------------------
// Source status
// ---------------------------------------------------------------------------

/// Outcome of one collector invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceOutcome {
    Ok,
    Error,
    CircuitOpen,
    Timeout,
}

impl fmt::Display for SourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceOutcome::Ok => write!(f, "OK"),
            SourceOutcome::Error => write!(f, "ERROR"),
            SourceOutcome::CircuitOpen => write!(f, "CIRCUIT_OPEN"),
            SourceOutcome::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Per-source report for one aggregation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source_id: SourceId,
    pub outcome: SourceOutcome,
    pub races_found: usize,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl SourceStatus {
    pub fn ok(source_id: SourceId, races_found: usize, duration_ms: u64) -> Self {
        Self {
            source_id,
            outcome: SourceOutcome::Ok,
            races_found,
            error_message: None,
            duration_ms,
        }
    }

    pub fn failed(
        source_id: SourceId,
        outcome: SourceOutcome,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            source_id,
            outcome,
            races_found: 0,
            error_message: Some(message.into()),
            duration_ms,
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} races={} {}ms",
            self.source_id, self.outcome, self.races_found, self.duration_ms
        )?;
        if let Some(msg) = &self.error_message {
            write!(f, " ({msg})")?;
        }
        Ok(())
    }
}

/// Cumulative reliability of one source over the life of the process.
///
/// Only attempts that reached the collector are counted: cache hits and
/// circuit-open skips leave the record unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source_id: SourceId,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Running mean over all counted attempts.
    pub avg_response_ms: f64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl SourceHealth {
    pub fn new(source_id: SourceId) -> Self {
        Self {
            source_id,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            avg_response_ms: 0.0,
            last_success_at: None,
            last_failure_at: None,
        }
    }

    pub fn record(&mut self, success: bool, duration_ms: u64, at: DateTime<Utc>) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
            self.last_success_at = Some(at);
        } else {
            self.failed_requests += 1;
            self.last_failure_at = Some(at);
        }
        let n = self.total_requests as f64;
        self.avg_response_ms += (duration_ms as f64 - self.avg_response_ms) / n;
    }

    /// Share of counted attempts that succeeded, `None` before the first.
    pub fn success_rate(&self) -> Option<f64> {
        (self.total_requests > 0).then(|| self.successful_requests as f64 / self.total_requests as f64)
    }
}

impl fmt::Display for SourceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}/{} ok, avg {:.0}ms",
            self.source_id, self.successful_requests, self.total_requests, self.avg_response_ms
        )
    }
}

// ---------------------------------------------------------------------------
// Qualification
// ---------------------------------------------------------------------------

/// Outcome of a single scoring factor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorResult {
    pub points: Decimal,
    /// Human-readable description of the rule bound that was tested.
    pub threshold: String,
    pub applicable: bool,
    pub passed: bool,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualificationResult {
    pub qualified: bool,
    pub total_score: Decimal,
    /// Factors in evaluation order.
    pub factors: IndexMap<String, FactorResult>,
}

impl fmt::Display for QualificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (score {})",
            if self.qualified { "QUALIFIED" } else { "not qualified" },
            self.total_score
        )?;
        for (name, factor) in &self.factors {
            write!(f, " | {name}: {}", factor.explanation)?;
        }
        Ok(())
    }
}

/// A merged race together with its qualification verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRace {
    pub race: NormalizedRace,
    pub qualification: QualificationResult,
}

// ---------------------------------------------------------------------------
// Cycle report
// ---------------------------------------------------------------------------

/// Everything one aggregation cycle produced, handed to the reporting sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub statuses: Vec<SourceStatus>,
    /// Race listings received before merge.
    pub raw_races: usize,
    pub races: Vec<ScoredRace>,
    /// Cumulative per-source health as of the end of the cycle.
    #[serde(default)]
    pub health: Vec<SourceHealth>,
}

impl CycleReport {
    pub fn qualified(&self) -> impl Iterator<Item = &ScoredRace> {
        self.races.iter().filter(|r| r.qualification.qualified)
    }

    pub fn sources_ok(&self) -> usize {
        self.statuses
            .iter()
            .filter(|s| s.outcome == SourceOutcome::Ok)
            .count()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cycle {} | sources {}/{} OK | raw {} | merged {} | qualified {}",
            self.cycle_id,
            self.sources_ok(),
            self.statuses.len(),
            self.raw_races,
            self.races.len(),
            self.qualified().count()
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure taxonomy for a single collector call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectorError {
    /// The source cannot be fetched live at all (e.g. offline sample data).
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Timeouts, connection resets, rate limits, 5xx responses.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Operator-fixable problem: missing credential, bad URL, rejected auth.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The payload arrived but could not be understood at all.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Collector panicked: {0}")]
    Panicked(String),
}

impl CollectorError {
    /// Only transport-level failures are retried inside one invocation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CollectorError::Transient(_))
    }

    /// Whether this failure counts toward the source's circuit breaker.
    pub fn trips_breaker(&self) -> bool {
        !matches!(self, CollectorError::NotSupported(_))
    }
}

/// Engine-level errors. Unlike collector failures these abort a cycle.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Rule set error: {0}")]
    RuleSet(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown source kind '{kind}' for source {source_id} (known kinds: {known})")]
    UnknownSourceKind {
        source_id: String,
        kind: String,
        known: String,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
