//! Concurrent fan-out over all sources.
//!
//! One tokio task per source per cycle. Each task runs the source through
//! its `SourceGuard`; a task that dies is reported as an `ERROR` status for
//! that source only. Statuses come back in input order regardless of
//! completion order.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, warn};

use super::breaker::CircuitBreakerState;
use super::resilience::SourceGuard;
use crate::config::ResilienceConfig;
use crate::sources::{FetchContext, SourceCollector};
use crate::types::{NormalizedRace, SourceHealth, SourceId, SourceOutcome, SourceStatus};

/// Everything gathered in one fan-out, before merging.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub races: Vec<NormalizedRace>,
    /// One per source, in the order the sources were given.
    pub statuses: Vec<SourceStatus>,
}

/// Owns per-source breaker, cache and health state for the life of the
/// process.
pub struct Orchestrator {
    config: ResilienceConfig,
    guards: Mutex<HashMap<SourceId, Arc<SourceGuard>>>,
}

impl Orchestrator {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            config,
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// The guard for `id`, created on first use.
    pub fn guard(&self, id: &SourceId) -> Arc<SourceGuard> {
        let mut guards = self.guards.lock();
        Arc::clone(
            guards
                .entry(id.clone())
                .or_insert_with(|| Arc::new(SourceGuard::new(id.clone()))),
        )
    }

    /// Breaker snapshot for a source that has been invoked at least once.
    pub async fn breaker_state(&self, id: &SourceId) -> Option<CircuitBreakerState> {
        let guard = self.guards.lock().get(id).cloned();
        match guard {
            Some(g) => Some(g.breaker_state().await),
            None => None,
        }
    }

    /// Cumulative health of every source invoked so far, ordered by id.
    pub async fn health_snapshot(&self) -> Vec<SourceHealth> {
        let mut guards: Vec<Arc<SourceGuard>> = self.guards.lock().values().cloned().collect();
        guards.sort_by(|a, b| a.id().cmp(b.id()));

        let mut health = Vec::with_capacity(guards.len());
        for guard in guards {
            health.push(guard.health().await);
        }
        health
    }

    /// Run every source once, concurrently.
    pub async fn run_cycle(&self, sources: &[Arc<dyn SourceCollector>]) -> CycleOutcome {
        let (_tx, rx) = watch::channel(false);
        self.run_cycle_with_shutdown(sources, rx).await
    }

    /// Like `run_cycle`, but in-flight invocations are abandoned once
    /// `shutdown` flips to `true`. Abandoned invocations report `ERROR`
    /// and leave breaker and cache state as it was.
    pub async fn run_cycle_with_shutdown(
        &self,
        sources: &[Arc<dyn SourceCollector>],
        shutdown: watch::Receiver<bool>,
    ) -> CycleOutcome {
        let started = Instant::now();
        let ctx = FetchContext::today();

        let handles: Vec<_> = sources
            .iter()
            .map(|collector| {
                let id = collector.id();
                let guard = self.guard(&id);
                let collector = Arc::clone(collector);
                let config = self.config.clone();
                let ctx = ctx.clone();
                let shutdown = shutdown.clone();
                let task_id = id.clone();

                let handle = tokio::spawn(async move {
                    let invoked = Instant::now();
                    tokio::select! {
                        result = guard.invoke(collector.as_ref(), &ctx, &config) => result,
                        _ = wait_for_shutdown(shutdown) => {
                            warn!(source = %task_id, "Invocation cancelled by shutdown");
                            let status = SourceStatus::failed(
                                task_id,
                                SourceOutcome::Error,
                                "cancelled: shutdown requested",
                                elapsed_ms(invoked),
                            );
                            (Vec::new(), status)
                        }
                    }
                });
                (id, handle)
            })
            .collect();

        let mut outcome = CycleOutcome::default();
        for (id, handle) in handles {
            let (races, status) = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    let reason = if e.is_panic() { "source task panicked" } else { "source task aborted" };
                    warn!(source = %id, error = %e, "{reason}");
                    let status = SourceStatus::failed(id, SourceOutcome::Error, reason, elapsed_ms(started));
                    (Vec::new(), status)
                }
            };

            info!(
                source = %status.source_id,
                outcome = %status.outcome,
                races = status.races_found,
                duration_ms = status.duration_ms,
                "Source finished"
            );
            outcome.races.extend(races);
            outcome.statuses.push(status);
        }

        info!(
            sources = outcome.statuses.len(),
            ok = outcome.statuses.iter().filter(|s| s.outcome == SourceOutcome::Ok).count(),
            races = outcome.races.len(),
            elapsed_ms = elapsed_ms(started),
            "Fan-out complete"
        );
        outcome
    }
}

/// Resolves once shutdown is requested. Never resolves if the sender is
/// dropped without requesting it.
async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
