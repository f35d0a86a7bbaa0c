// src/ingest/orchestrator.rs
//! Provider scheduling loop.
//!
//! Registered providers sit in a due-time queue. A single control loop polls
//! the queue on a fixed tick, spawns a fetch for every due job, collects the
//! outcomes over a bounded channel and puts each provider back into the queue,
//! either after its own interval or after the retry delay. A provider is
//! therefore always either queued or in flight, never both and never twice.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::ingest::error::RegisterError;
use crate::ingest::options::OrchestratorOptions;
use crate::ingest::queue::{Due, DueQueue};
use crate::ingest::registry::{ProviderId, ProviderRegistry, RegisteredProvider};
use crate::ingest::types::{ExchangeRate, RateProvider};
use crate::ingest::worker::{self, WorkerInfo, WorkerResponse};
use crate::storage::RateSink;

/// Upper bound on how far ahead a job is parked (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + delay` without overflowing on huge intervals or retry delays.
fn due_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(FAR_FUTURE)).unwrap_or(now)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// A pending fetch for one provider.
#[derive(Debug)]
pub(crate) struct ScheduledIngest {
    at: Instant,
    provider_id: ProviderId,
    provider: RegisteredProvider,
    failures: u32,
}

impl Due for ScheduledIngest {
    fn due_at(&self) -> Instant {
        self.at
    }
}

/// Lifecycle of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Running,
    Draining,
    Stopped,
}

pub struct Orchestrator {
    storage: Arc<dyn RateSink>,
    options: OrchestratorOptions,
    registry: ProviderRegistry,
    queue: Mutex<DueQueue<ScheduledIngest>>,
    state: Mutex<OrchestratorState>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("options", &self.options)
            .field("registered", &self.registry.len())
            .field("queued", &self.queued())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(storage: Arc<dyn RateSink>) -> Self {
        Self::with_options(storage, OrchestratorOptions::default())
    }

    pub fn with_options(storage: Arc<dyn RateSink>, options: OrchestratorOptions) -> Self {
        crate::ingest::ensure_metrics_described();
        Self {
            storage,
            options,
            registry: ProviderRegistry::new(),
            queue: Mutex::new(DueQueue::new()),
            state: Mutex::new(OrchestratorState::Idle),
        }
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.lock()
    }

    /// Number of registered providers.
    pub fn registered(&self) -> usize {
        self.registry.len()
    }

    /// Number of jobs waiting in the queue (in-flight fetches excluded).
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Registers a provider and queues its first fetch for right now.
    ///
    /// Safe to call before or while [`Orchestrator::start`] runs.
    pub fn register(&self, provider: Arc<dyn RateProvider>) -> Result<ProviderId, RegisterError> {
        let name = provider.name().to_string();
        if name.is_empty() {
            return Err(RegisterError::InvalidProvider);
        }

        let interval = provider.interval();
        if interval.is_zero() {
            return Err(RegisterError::InvalidInterval);
        }

        let entry = RegisteredProvider {
            name,
            interval,
            provider,
        };
        let id = self.registry.insert(entry.clone());

        tracing::info!(
            target: "ingest",
            provider = %entry.name,
            id = %id,
            interval_ms = millis(interval),
            "registered new provider"
        );

        self.schedule_ingest(Instant::now(), id, entry, 0);
        Ok(id)
    }

    /// Runs the scheduling loop until `shutdown` is cancelled. [BLOCKING]
    ///
    /// Returns `Ok(())` on shutdown. Fetches still running at that point are
    /// not awaited and their outcomes are dropped.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != OrchestratorState::Idle {
                bail!("orchestrator cannot start from state {:?}", *state);
            }
            *state = OrchestratorState::Running;
        }

        let (tx, mut rx) = mpsc::channel::<WorkerResponse>(self.options.collector_capacity);

        let mut ticker = tokio::time::interval(self.options.query_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            target: "ingest",
            providers = self.registry.len(),
            query_interval_ms = millis(self.options.query_interval),
            "orchestrator started"
        );

        // Kick off everything registered before start without waiting a tick.
        self.dispatch_due(&shutdown, &tx);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.dispatch_due(&shutdown, &tx),
                Some(response) = rx.recv() => self.handle_response(response, &shutdown).await,
            }
        }

        *self.state.lock() = OrchestratorState::Draining;
        rx.close();
        drop(rx);

        tracing::info!(target: "ingest", "orchestrator service shut down");
        *self.state.lock() = OrchestratorState::Stopped;
        Ok(())
    }

    fn schedule_ingest(
        &self,
        at: Instant,
        provider_id: ProviderId,
        provider: RegisteredProvider,
        failures: u32,
    ) {
        let mut queue = self.queue.lock();
        queue.insert(ScheduledIngest {
            at,
            provider_id,
            provider,
            failures,
        });
        gauge!("ingest_queue_depth").set(queue.len() as f64);
    }

    /// Pops the earliest job if it is due now.
    fn next_ingest(&self) -> Option<ScheduledIngest> {
        let mut queue = self.queue.lock();
        let next = queue.pop_due(Instant::now());
        if next.is_some() {
            gauge!("ingest_queue_depth").set(queue.len() as f64);
        }
        next
    }

    /// Spawns a fetch for every job that is currently due.
    fn dispatch_due(&self, shutdown: &CancellationToken, tx: &mpsc::Sender<WorkerResponse>) {
        while !shutdown.is_cancelled() {
            let Some(job) = self.next_ingest() else {
                return;
            };

            tracing::debug!(
                target: "ingest",
                provider = %job.provider.name,
                attempt = job.failures + 1,
                "scheduling ingest"
            );

            worker::dispatch(
                shutdown.clone(),
                WorkerInfo {
                    provider: job.provider.provider.clone(),
                    provider_id: job.provider_id,
                    name: job.provider.name.clone(),
                    failures: job.failures,
                    results: tx.clone(),
                },
            );
        }
    }

    /// Applies the reschedule policy to one fetch outcome.
    async fn handle_response(&self, response: WorkerResponse, shutdown: &CancellationToken) {
        let now = Instant::now();

        let Some(provider) = self.registry.resolve(&response.provider_id) else {
            tracing::error!(
                target: "ingest",
                id = %response.provider_id,
                "unable to load registered provider"
            );
            counter!("ingest_unknown_provider_total").increment(1);
            return;
        };

        match response.result {
            Err(e) => {
                let failures = response.failures.saturating_add(1);
                let delay = self.options.retry.delay(failures);

                tracing::warn!(
                    target: "ingest",
                    provider = %provider.name,
                    id = %response.provider_id,
                    error = ?e,
                    failures,
                    retry_in_ms = millis(delay),
                    "error encountered during rate fetch"
                );
                counter!("ingest_fetch_errors_total").increment(1);

                self.schedule_ingest(
                    due_after(now, delay),
                    response.provider_id,
                    provider,
                    failures,
                );
            }
            Ok(rates) => {
                self.save_rates(&provider.name, rates, shutdown).await;

                let at = due_after(now, provider.interval);
                self.schedule_ingest(at, response.provider_id, provider, 0);
            }
        }
    }

    /// Saves each rate on its own timeout. Failures are logged and skipped.
    async fn save_rates(&self, provider: &str, rates: Vec<ExchangeRate>, shutdown: &CancellationToken) {
        let total = rates.len();
        for (i, rate) in rates.into_iter().enumerate() {
            if shutdown.is_cancelled() {
                tracing::warn!(
                    target: "ingest",
                    provider,
                    dropped = total - i,
                    "shutdown in progress, dropping unsaved rates"
                );
                return;
            }

            match self.save_one(&rate, shutdown).await {
                Ok(()) => {
                    counter!("ingest_rates_saved_total").increment(1);
                    tracing::debug!(
                        target: "ingest",
                        provider,
                        base = %rate.base,
                        quote = %rate.target,
                        source = %rate.source,
                        rate = rate.rate,
                        rate_type = %rate.rate_type,
                        effective_date = %rate.as_of,
                        "saved exchange rate"
                    );
                }
                Err(e) => {
                    counter!("ingest_save_errors_total").increment(1);
                    tracing::error!(
                        target: "ingest",
                        provider,
                        base = %rate.base,
                        quote = %rate.target,
                        source = %rate.source,
                        error = ?e,
                        "unable to save exchange rate"
                    );
                }
            }
        }
    }

    async fn save_one(&self, rate: &ExchangeRate, shutdown: &CancellationToken) -> Result<()> {
        let timeout = self.options.save_timeout;
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(anyhow!("save aborted by shutdown")),
            res = tokio::time::timeout(timeout, self.storage.save_exchange_rate(rate)) => match res {
                Ok(inner) => inner,
                Err(_) => Err(anyhow!("save timed out after {} ms", timeout.as_millis())),
            },
        }
    }
}
