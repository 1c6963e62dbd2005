//! Resilience wrapper around one collector call.
//!
//! `SourceGuard` owns a source's circuit breaker and result cache behind a
//! single async mutex. The lock is held for the whole invocation, so a
//! source never has more than one call in flight: a concurrent caller
//! waits and then, normally, hits the freshly stored cache entry.
//!
//! Order of checks: cache, breaker, then the collector under a timeout
//! with bounded exponential-backoff retries for transient failures.

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::breaker::{BreakerDecision, CircuitBreakerState};
use super::cache::{CacheEntry, ResultCache};
use crate::config::ResilienceConfig;
use crate::sources::{FetchContext, SourceCollector};
use crate::types::{CollectorError, NormalizedRace, SourceHealth, SourceId, SourceOutcome, SourceStatus};

#[derive(Debug)]
struct GuardState {
    breaker: CircuitBreakerState,
    cache: ResultCache,
    health: SourceHealth,
}

/// Breaker and cache state for one source.
#[derive(Debug)]
pub struct SourceGuard {
    id: SourceId,
    state: Mutex<GuardState>,
}

impl SourceGuard {
    pub fn new(id: SourceId) -> Self {
        Self {
            state: Mutex::new(GuardState {
                breaker: CircuitBreakerState::default(),
                cache: ResultCache::default(),
                health: SourceHealth::new(id.clone()),
            }),
            id,
        }
    }

    pub fn id(&self) -> &SourceId {
        &self.id
    }

    /// Snapshot of the breaker. Waits for any in-flight invocation.
    pub async fn breaker_state(&self) -> CircuitBreakerState {
        self.state.lock().await.breaker.clone()
    }

    /// Snapshot of the cumulative health record.
    pub async fn health(&self) -> SourceHealth {
        self.state.lock().await.health.clone()
    }

    /// Run one guarded collector call.
    ///
    /// Never fails: every outcome is expressed in the returned status, with
    /// zero races on anything but `OK`. Dropping the returned future before
    /// it completes leaves the breaker and health record untouched.
    pub async fn invoke(
        &self,
        collector: &dyn SourceCollector,
        ctx: &FetchContext,
        config: &ResilienceConfig,
    ) -> (Vec<NormalizedRace>, SourceStatus) {
        let started = Instant::now();
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let ttl = to_chrono(config.cache_ttl());

        if let Some(entry) = state.cache.get(now, ttl) {
            debug!(
                source = %self.id,
                age_ms = (now - entry.fetched_at).num_milliseconds(),
                races = entry.payload.len(),
                "Cache hit"
            );
            let races = entry.payload.clone();
            let status = SourceStatus::ok(self.id.clone(), races.len(), elapsed_ms(started));
            return (races, status);
        }
        state.cache.evict_expired(now, ttl);

        let cooldown = to_chrono(config.cooldown());
        match state.breaker.check(now, cooldown) {
            BreakerDecision::Reject => {
                let left = state
                    .breaker
                    .remaining_cooldown(now, cooldown)
                    .map(|d| d.num_seconds())
                    .unwrap_or(0);
                debug!(source = %self.id, retry_in_secs = left, "Circuit open, skipping call");
                let status = SourceStatus::failed(
                    self.id.clone(),
                    SourceOutcome::CircuitOpen,
                    format!("circuit open, retry in {left}s"),
                    elapsed_ms(started),
                );
                return (Vec::new(), status);
            }
            BreakerDecision::HalfOpen => {
                info!(source = %self.id, "Circuit breaker cooldown expired, allowing trial call");
            }
            BreakerDecision::Allow => {}
        }

        let timeout = config.timeout();
        let result = tokio::time::timeout(timeout, self.call_with_retry(collector, ctx, config)).await;

        match result {
            Ok(Ok(races)) => {
                let races = self.sanitize(races);
                let finished = Utc::now();
                if state.breaker.is_open {
                    info!(source = %self.id, "Trial call succeeded, circuit breaker closed");
                }
                state.breaker.record_success();
                state
                    .cache
                    .store(CacheEntry::new(self.id.clone(), races.clone(), finished));
                let status = SourceStatus::ok(self.id.clone(), races.len(), elapsed_ms(started));
                state.health.record(true, status.duration_ms, finished);
                (races, status)
            }
            Ok(Err(e)) => {
                if e.trips_breaker() {
                    self.count_failure(&mut state.breaker, config);
                }
                let status = SourceStatus::failed(
                    self.id.clone(),
                    SourceOutcome::Error,
                    e.to_string(),
                    elapsed_ms(started),
                );
                state.health.record(false, status.duration_ms, Utc::now());
                (Vec::new(), status)
            }
            Err(_) => {
                warn!(source = %self.id, timeout_secs = timeout.as_secs_f64(), "Collector timed out");
                self.count_failure(&mut state.breaker, config);
                let status = SourceStatus::failed(
                    self.id.clone(),
                    SourceOutcome::Timeout,
                    format!("timed out after {:.1}s", timeout.as_secs_f64()),
                    elapsed_ms(started),
                );
                state.health.record(false, status.duration_ms, Utc::now());
                (Vec::new(), status)
            }
        }
    }

    /// Fetch and parse, retrying transient failures with exponential backoff.
    async fn call_with_retry(
        &self,
        collector: &dyn SourceCollector,
        ctx: &FetchContext,
        config: &ResilienceConfig,
    ) -> Result<Vec<NormalizedRace>, CollectorError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let call = async {
                let raw = collector.fetch(ctx).await?;
                collector.parse(raw)
            };
            let result = AssertUnwindSafe(call)
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(CollectorError::Panicked(panic_message(panic.as_ref()))));

            match result {
                Ok(races) => return Ok(races),
                Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                    let delay = backoff_delay(config.base_backoff(), attempt);
                    warn!(source = %self.id, attempt, error = %e, "Collector attempt failed");
                    debug!(source = %self.id, attempt, delay_ms = delay.as_millis() as u64, "Retrying collector call");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(source = %self.id, attempt, error = %e, "Collector call failed");
                    return Err(e);
                }
            }
        }
    }

    fn count_failure(&self, breaker: &mut CircuitBreakerState, config: &ResilienceConfig) {
        let was_open = breaker.is_open;
        if breaker.record_failure(Utc::now(), config.failure_threshold) {
            if was_open {
                warn!(source = %self.id, "Trial call failed, circuit breaker re-opened");
                return;
            }
            warn!(
                source = %self.id,
                failures = breaker.failure_count,
                cooldown_secs = config.cooldown_secs,
                "Circuit breaker opened"
            );
        }
    }

    /// Stamp attribution on the collector's output and drop races that
    /// cannot be identified.
    fn sanitize(&self, races: Vec<NormalizedRace>) -> Vec<NormalizedRace> {
        let received = races.len();
        let cleaned: Vec<NormalizedRace> = races
            .into_iter()
            .filter_map(|mut race| {
                race.sources = vec![self.id.clone()];
                race.sanitize()
            })
            .collect();
        if cleaned.len() < received {
            debug!(
                source = %self.id,
                dropped = received - cleaned.len(),
                "Dropped unidentifiable races"
            );
        }
        cleaned
    }
}

/// `base * 2^(attempt - 1)`, saturating.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
