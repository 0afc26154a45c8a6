//! The worker loop: sweep, claim a batch, process each profile, repeat.
//!
//! Each profile goes through a governor gate, a jittered delay, the fetch
//! adapter and, when collected, the ingestion API. Its resolution is
//! buffered and written in bulk. The loop ends when no unclaimed profiles
//! remain, when the governor asks for a restart, on interrupt, or on a
//! store error. Every one of those paths flushes the buffer first.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

use super::EXIT_RESTART;
use crate::buffer::UpdateBuffer;
use crate::config::{ClaimStrategy, Config, SweepPolicy, UnknownErrorPolicy};
use crate::error::Result;
use crate::fetch::{FetchAdapter, Outcome};
use crate::governor::{GovernorConfig, RateGovernor, RestartReason};
use crate::ingest::Ingestor;
use crate::lease::LeaseStore;
use crate::model::{Owner, PendingUpdate, Status};
use crate::rotation::{IdentityRotator, Rotation, egress_ip};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_outcome, record_status_transition, start_profile_span};

/// Configuration for the worker loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Profiles requested per claim round.
    pub claim_limit: usize,
    pub claim_strategy: ClaimStrategy,
    pub sweep: SweepPolicy,
    /// Pending updates that trigger a flush.
    pub batch_size: usize,
    /// Inclusive range of the delay before each fetch.
    pub sleep_range: (Duration, Duration),
    pub governor: GovernorConfig,
    pub unknown_error_policy: UnknownErrorPolicy,
    /// Logged after each in-place rotation when set.
    pub egress_ip_url: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            claim_limit: 100,
            claim_strategy: ClaimStrategy::Sample,
            sweep: SweepPolicy::OlderThan(Duration::from_secs(30 * 60)),
            batch_size: 10,
            sleep_range: (Duration::from_secs(2), Duration::from_secs(5)),
            governor: GovernorConfig::default(),
            unknown_error_policy: UnknownErrorPolicy::Retry,
            egress_ip_url: None,
        }
    }
}

impl From<&Config> for WorkerConfig {
    fn from(config: &Config) -> Self {
        Self {
            claim_limit: config.claim_limit,
            claim_strategy: config.claim_strategy,
            sweep: config.sweep,
            batch_size: config.batch_size,
            sleep_range: config.sleep_range,
            governor: GovernorConfig {
                max_cost: config.max_cost,
                max_consecutive_rate_limits: config.max_consecutive_rate_limits,
            },
            unknown_error_policy: config.unknown_error_policy,
            egress_ip_url: config.egress_ip_url.clone(),
        }
    }
}

/// How a run ended, when it ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// No unclaimed profiles left.
    Completed,
    /// The governor tripped and identity could not be rotated in place.
    Restart(RestartReason),
    /// Shutdown was requested.
    Interrupted,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed | RunOutcome::Interrupted => 0,
            RunOutcome::Restart(_) => EXIT_RESTART,
        }
    }
}

/// Counters for one run, logged at exit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub claimed: u64,
    pub collected: u64,
    /// Resolved to a done status other than collected.
    pub done: u64,
    /// Sent back to `not_collected`.
    pub retried: u64,
    pub forward_failures: u64,
    pub rotations: u64,
    pub flushes: u64,
}

enum Step {
    Continue,
    Stop(RunOutcome),
}

pub struct Worker {
    store: Arc<dyn LeaseStore>,
    adapter: FetchAdapter,
    ingestor: Arc<dyn Ingestor>,
    rotator: Arc<dyn IdentityRotator>,
    owner: Owner,
    config: WorkerConfig,
    shutdown: CancellationToken,
    governor: RateGovernor,
    buffer: UpdateBuffer,
    stats: RunStats,
}

impl Worker {
    pub fn new(
        store: Arc<dyn LeaseStore>,
        adapter: FetchAdapter,
        ingestor: Arc<dyn Ingestor>,
        rotator: Arc<dyn IdentityRotator>,
        owner: Owner,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            adapter,
            ingestor,
            rotator,
            owner,
            governor: RateGovernor::new(config.governor),
            buffer: UpdateBuffer::new(config.batch_size),
            config,
            shutdown: CancellationToken::new(),
            stats: RunStats::default(),
        }
    }

    /// Stop on an externally owned token instead of a private one.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Token that stops the loop after the in-flight profile.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Run until there is no work left, a restart is due, or shutdown.
    ///
    /// Store failures end the run with an error, after the final flush.
    pub async fn run(&mut self) -> Result<RunOutcome> {
        info!(owner = %self.owner, strategy = ?self.config.claim_strategy, "worker starting");

        let released = self.store.reset_stale_claims(self.config.sweep).await?;
        metrics::sweep_resets().add(released, &[]);
        info!(released, policy = ?self.config.sweep, "stale claims released");

        let result = self.drive().await;

        if !self.buffer.is_empty() {
            info!(pending = self.buffer.len(), "final flush");
        }
        self.buffer.flush(self.store.as_ref()).await;
        self.stats.flushes = self.buffer.flushes();

        match &result {
            Ok(outcome) => info!(?outcome, stats = ?self.stats, "worker finished"),
            Err(e) => error!(error = %e, stats = ?self.stats, "worker aborted"),
        }
        result
    }

    async fn drive(&mut self) -> Result<RunOutcome> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(RunOutcome::Interrupted);
            }

            // A tripped governor must not take a fresh batch.
            if let Some(outcome) = self.gate().await {
                return Ok(outcome);
            }

            let keys = self
                .store
                .claim_batch(&self.owner, self.config.claim_strategy, self.config.claim_limit)
                .await?;

            if keys.is_empty() {
                // Buffered retries are not visible to the claim until flushed.
                if self.buffer.pending().iter().any(|u| u.status == Status::NotCollected) {
                    self.buffer.flush(self.store.as_ref()).await;
                    continue;
                }
                info!("no unclaimed profiles left");
                return Ok(RunOutcome::Completed);
            }

            self.stats.claimed += keys.len() as u64;
            metrics::claims().add(keys.len() as u64, &[]);
            info!(count = keys.len(), owner = %self.owner, "claimed profiles");

            let mut queue: VecDeque<String> = keys.into();
            while let Some(key) = queue.pop_front() {
                if let Step::Stop(outcome) = self.process(&key).await {
                    self.release(std::iter::once(key).chain(queue.drain(..)));
                    return Ok(outcome);
                }
            }
        }
    }

    /// Handle one claimed profile. `Stop` means it was left unprocessed.
    async fn process(&mut self, key: &str) -> Step {
        if self.shutdown.is_cancelled() {
            return Step::Stop(RunOutcome::Interrupted);
        }

        if let Some(outcome) = self.gate().await {
            return Step::Stop(outcome);
        }

        let delay = jitter(self.config.sleep_range);
        if !delay.is_zero() {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Step::Stop(RunOutcome::Interrupted),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let span = start_profile_span(key, &self.owner);
        let update = self.fetch_and_resolve(key).instrument(span.clone()).await;
        record_status_transition(&span, Status::Processing.as_str(), update.status.as_str());

        if self.buffer.enqueue(update) {
            self.buffer.flush(self.store.as_ref()).await;
        }
        Step::Continue
    }

    /// Fetch, forward when collected, and decide the resulting status.
    async fn fetch_and_resolve(&mut self, key: &str) -> PendingUpdate {
        let result = self.adapter.fetch(key).await;
        self.governor.record_cost(result.cost);
        self.governor.record_outcome(result.outcome);
        record_outcome(&tracing::Span::current(), result.outcome.as_str());

        let update = match (result.outcome, result.record) {
            (Outcome::Collected, Some(record)) => {
                if self.ingestor.submit(&record).await {
                    info!(username = key, "profile collected and forwarded");
                    self.stats.collected += 1;
                    return PendingUpdate::resolve(key, Status::Collected, &self.owner)
                        .profile(record);
                }
                warn!(username = key, "forward failed, profile goes back to the queue");
                self.stats.forward_failures += 1;
                PendingUpdate::resolve(key, Status::NotCollected, &self.owner)
            }
            (outcome, _) => {
                PendingUpdate::resolve(key, self.status_for(outcome), &self.owner)
            }
        };

        if update.status == Status::NotCollected {
            self.stats.retried += 1;
        } else {
            self.stats.done += 1;
        }
        update
    }

    /// Resulting status for every outcome except a forwarded collection.
    fn status_for(&self, outcome: Outcome) -> Status {
        match outcome {
            Outcome::NotFound => Status::NotFound,
            Outcome::Private => Status::Private,
            Outcome::UnknownError => match self.config.unknown_error_policy {
                UnknownErrorPolicy::Retry => Status::NotCollected,
                UnknownErrorPolicy::Terminal => Status::Error,
            },
            // Collected without a record cannot be forwarded; retry it.
            Outcome::Collected | Outcome::TransientError | Outcome::RateLimited => {
                Status::NotCollected
            }
        }
    }

    /// Rotate when the governor has tripped. `Some` means the run must end.
    async fn gate(&mut self) -> Option<RunOutcome> {
        let reason = self.governor.should_restart()?;
        match self.rotate(reason).await {
            Rotation::Rotated => None,
            Rotation::Restart => Some(RunOutcome::Restart(reason)),
        }
    }

    async fn rotate(&mut self, reason: RestartReason) -> Rotation {
        warn!(%reason, state = ?self.governor.state(), "rate governor tripped, rotating identity");

        let rotation = match self.rotator.rotate().await {
            Ok(rotation) => rotation,
            Err(e) => {
                error!(error = %e, "identity rotation failed, falling back to restart");
                Rotation::Restart
            }
        };

        let result = match rotation {
            Rotation::Rotated => "rotated",
            Rotation::Restart => "restart",
        };
        metrics::rotations().add(
            1,
            &[
                KeyValue::new("reason", reason.to_string()),
                KeyValue::new("result", result),
            ],
        );

        if rotation == Rotation::Rotated {
            self.stats.rotations += 1;
            self.governor.reset();
            if let Some(ref url) = self.config.egress_ip_url {
                if let Some(ip) = egress_ip(url, Duration::from_secs(5)).await {
                    info!(ip = %ip, "egress address after rotation");
                }
            }
        }
        rotation
    }

    /// Hand claimed but unprocessed profiles back to the queue.
    fn release(&mut self, keys: impl Iterator<Item = String>) {
        let mut released = 0;
        for key in keys {
            self.buffer
                .enqueue(PendingUpdate::resolve(key, Status::NotCollected, &self.owner));
            released += 1;
        }
        if released > 0 {
            info!(released, "releasing unprocessed claims");
        }
    }
}

/// Random delay within the inclusive range.
fn jitter((min, max): (Duration, Duration)) -> Duration {
    if max <= min {
        return min;
    }
    rand::rng().random_range(min..=max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_in_range() {
        let range = (Duration::from_millis(10), Duration::from_millis(20));
        for _ in 0..100 {
            let delay = jitter(range);
            assert!(delay >= range.0 && delay <= range.1);
        }
    }

    #[test]
    fn degenerate_range_returns_minimum() {
        let delay = jitter((Duration::from_secs(3), Duration::from_secs(1)));
        assert_eq!(delay, Duration::from_secs(3));
    }

    #[test]
    fn exit_codes() {
        assert_eq!(RunOutcome::Completed.exit_code(), 0);
        assert_eq!(RunOutcome::Interrupted.exit_code(), 0);
        let restart = RunOutcome::Restart(RestartReason::CostCeiling { cost: 120 });
        assert_eq!(restart.exit_code(), 2);
    }
}
