// tests/orchestrator_run.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use fxrates_ingest::ingest::types::{Currency, ExchangeRate, RateProvider, RateType, Source};
use fxrates_ingest::ingest::{Orchestrator, OrchestratorOptions, OrchestratorState, RetryPolicy};
use fxrates_ingest::storage::RateSink;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn rate(base: Currency, value: f64, source: &str) -> ExchangeRate {
    let now = Utc::now();
    ExchangeRate {
        as_of: now,
        fetched_at: now,
        base,
        target: Currency::Ves,
        rate_type: RateType::Mid,
        source: Source::new(source),
        rate: value,
    }
}

/// Returns the same rates on every call and records when it was called.
struct StaticProvider {
    name: &'static str,
    interval: Duration,
    rates: Vec<ExchangeRate>,
    fail: bool,
    calls: Arc<Mutex<Vec<Instant>>>,
}

impl StaticProvider {
    fn new(name: &'static str, interval: Duration, rates: Vec<ExchangeRate>) -> Self {
        Self {
            name,
            interval,
            rates,
            fail: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn failing(name: &'static str, interval: Duration) -> Self {
        Self {
            fail: true,
            ..Self::new(name, interval, vec![])
        }
    }
}

#[async_trait]
impl RateProvider for StaticProvider {
    fn name(&self) -> &str {
        self.name
    }
    fn interval(&self) -> Duration {
        self.interval
    }
    async fn fetch(&self, _cancel: &CancellationToken) -> Result<Vec<ExchangeRate>> {
        self.calls.lock().unwrap().push(Instant::now());
        if self.fail {
            bail!("fetch error");
        }
        Ok(self.rates.clone())
    }
}

/// Never finishes a fetch on its own.
struct HangingProvider {
    entered: Arc<AtomicUsize>,
}

#[async_trait]
impl RateProvider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }
    fn interval(&self) -> Duration {
        Duration::from_secs(3600)
    }
    async fn fetch(&self, _cancel: &CancellationToken) -> Result<Vec<ExchangeRate>> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        bail!("unreachable")
    }
}

#[derive(Default)]
struct RecordingSink {
    saved: Mutex<Vec<ExchangeRate>>,
    attempts: AtomicUsize,
    fail_sources: Vec<&'static str>,
    hang: bool,
}

impl RecordingSink {
    fn saved(&self) -> Vec<ExchangeRate> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl RateSink for RecordingSink {
    async fn save_exchange_rate(&self, rate: &ExchangeRate) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail_sources.contains(&rate.source.as_str()) {
            bail!("storage error");
        }
        self.saved.lock().unwrap().push(rate.clone());
        Ok(())
    }
}

fn fast_options() -> OrchestratorOptions {
    OrchestratorOptions::default().with_query_interval(Duration::from_millis(10))
}

fn spawn(o: &Arc<Orchestrator>, shutdown: &CancellationToken) -> JoinHandle<Result<()>> {
    let o = o.clone();
    let shutdown = shutdown.clone();
    tokio::spawn(async move { o.start(shutdown).await })
}

async fn wait_until(mut cond: impl FnMut() -> bool, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

async fn stop(shutdown: CancellationToken, task: JoinHandle<Result<()>>) {
    shutdown.cancel();
    let res = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("orchestrator did not shut down in time")
        .expect("orchestrator task panicked");
    assert!(res.is_ok());
}

#[tokio::test]
async fn cancel_without_providers_returns_ok() {
    let o = Arc::new(Orchestrator::with_options(
        Arc::new(RecordingSink::default()),
        fast_options(),
    ));
    let shutdown = CancellationToken::new();
    let task = spawn(&o, &shutdown);
    stop(shutdown, task).await;
    assert_eq!(o.state(), OrchestratorState::Stopped);
}

#[tokio::test]
async fn first_fetch_is_saved_once() {
    let sink = Arc::new(RecordingSink::default());
    let o = Arc::new(Orchestrator::with_options(sink.clone(), fast_options()));
    let expected = rate(Currency::Usd, 100.0, "p1");
    o.register(Arc::new(StaticProvider::new(
        "p1",
        Duration::from_secs(3600),
        vec![expected.clone()],
    )))
    .unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&o, &shutdown);

    assert!(wait_until(|| !sink.saved().is_empty(), Duration::from_secs(1)).await);
    // give a potential duplicate the chance to show up
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop(shutdown, task).await;

    let saved = sink.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0], expected);
    assert_eq!(saved[0].base, Currency::Usd);
    assert_eq!(saved[0].target, Currency::Ves);
    assert_eq!(saved[0].rate_type, RateType::Mid);
}

#[tokio::test(start_paused = true)]
async fn short_interval_provider_runs_periodically() {
    let sink = Arc::new(RecordingSink::default());
    let o = Arc::new(Orchestrator::with_options(sink.clone(), fast_options()));
    let p = StaticProvider::new(
        "fast",
        Duration::from_millis(50),
        vec![rate(Currency::Usd, 1.0, "fast")],
    );
    let calls = p.calls.clone();
    o.register(Arc::new(p)).unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&o, &shutdown);
    tokio::time::sleep(Duration::from_millis(150)).await;
    stop(shutdown, task).await;

    assert!(calls.lock().unwrap().len() >= 2);
}

#[tokio::test(start_paused = true)]
async fn successful_fetch_waits_for_interval() {
    let o = Arc::new(Orchestrator::with_options(
        Arc::new(RecordingSink::default()),
        fast_options(),
    ));
    let interval = Duration::from_secs(5);
    let p = StaticProvider::new("every-5s", interval, vec![]);
    let calls = p.calls.clone();
    o.register(Arc::new(p)).unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&o, &shutdown);
    tokio::time::sleep(Duration::from_secs(16)).await;
    stop(shutdown, task).await;

    let calls = calls.lock().unwrap().clone();
    assert!(calls.len() >= 3, "got {} calls", calls.len());
    for pair in calls.windows(2) {
        assert!(pair[1] - pair[0] >= interval);
    }
}

#[tokio::test(start_paused = true)]
async fn failing_fetch_is_retried_after_fixed_delay() {
    // default options: 1s tick, 10s retry
    let o = Arc::new(Orchestrator::new(Arc::new(RecordingSink::default())));
    let p = StaticProvider::failing("broken", Duration::from_secs(3600));
    let calls = p.calls.clone();
    o.register(Arc::new(p)).unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&o, &shutdown);
    tokio::time::sleep(Duration::from_secs(25)).await;
    stop(shutdown, task).await;

    let calls = calls.lock().unwrap().clone();
    assert!(calls.len() >= 2, "got {} calls", calls.len());
    for pair in calls.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(10));
        // retried long before the hourly interval
        assert!(pair[1] - pair[0] < Duration::from_secs(60));
    }
}

#[tokio::test]
async fn providers_are_saved_independently() {
    let sink = Arc::new(RecordingSink::default());
    let o = Arc::new(Orchestrator::with_options(sink.clone(), fast_options()));
    o.register(Arc::new(StaticProvider::new(
        "provider-1",
        Duration::from_secs(3600),
        vec![rate(Currency::Usd, 100.0, "source-1")],
    )))
    .unwrap();
    o.register(Arc::new(StaticProvider::new(
        "provider-2",
        Duration::from_secs(3600),
        vec![rate(Currency::Eur, 110.0, "source-2")],
    )))
    .unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&o, &shutdown);
    assert!(wait_until(|| sink.saved().len() >= 2, Duration::from_secs(5)).await);
    stop(shutdown, task).await;

    let sources: Vec<String> = sink
        .saved()
        .iter()
        .map(|r| r.source.to_string())
        .collect();
    assert!(sources.contains(&"source-1".to_string()));
    assert!(sources.contains(&"source-2".to_string()));
}

#[tokio::test]
async fn hanging_provider_does_not_block_others() {
    let sink = Arc::new(RecordingSink::default());
    let o = Arc::new(Orchestrator::with_options(sink.clone(), fast_options()));
    let entered = Arc::new(AtomicUsize::new(0));
    o.register(Arc::new(HangingProvider {
        entered: entered.clone(),
    }))
    .unwrap();
    o.register(Arc::new(StaticProvider::new(
        "provider-2",
        Duration::from_secs(3600),
        vec![rate(Currency::Eur, 110.0, "source-2")],
    )))
    .unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&o, &shutdown);
    assert!(wait_until(|| entered.load(Ordering::SeqCst) == 1, Duration::from_secs(5)).await);
    assert!(wait_until(|| sink.saved().len() == 1, Duration::from_secs(5)).await);
    stop(shutdown, task).await;

    let saved = sink.saved();
    assert_eq!(saved[0].source.as_str(), "source-2");
    // the hanging fetch is still outstanding, so only its sibling was requeued
    assert_eq!(o.queued(), 1);
}

#[tokio::test]
async fn max_interval_provider_keeps_loop_running() {
    let sink = Arc::new(RecordingSink::default());
    let o = Arc::new(Orchestrator::with_options(
        sink.clone(),
        fast_options().with_retry(RetryPolicy::Fixed(Duration::MAX)),
    ));
    let p = StaticProvider::new("forever", Duration::MAX, vec![]);
    let calls = p.calls.clone();
    o.register(Arc::new(p)).unwrap();
    let failing = StaticProvider::failing("broken", Duration::MAX);
    let failing_calls = failing.calls.clone();
    o.register(Arc::new(failing)).unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&o, &shutdown);
    let both_requeued = || {
        calls.lock().unwrap().len() == 1
            && failing_calls.lock().unwrap().len() == 1
            && o.queued() == 2
    };
    assert!(wait_until(both_requeued, Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(failing_calls.lock().unwrap().len(), 1);
    assert_eq!(o.state(), OrchestratorState::Running);
    stop(shutdown, task).await;
}

#[tokio::test]
async fn failed_save_does_not_block_siblings_or_schedule() {
    let sink = Arc::new(RecordingSink {
        fail_sources: vec!["bad"],
        ..Default::default()
    });
    let o = Arc::new(Orchestrator::with_options(sink.clone(), fast_options()));
    let p = StaticProvider::new(
        "mixed",
        Duration::from_millis(50),
        vec![
            rate(Currency::Usd, 1.0, "bad"),
            rate(Currency::Eur, 2.0, "good"),
            rate(Currency::Cny, 3.0, "good"),
        ],
    );
    let calls = p.calls.clone();
    o.register(Arc::new(p)).unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&o, &shutdown);
    // a second fetch proves the provider was rescheduled on its interval
    assert!(wait_until(|| calls.lock().unwrap().len() >= 2, Duration::from_secs(5)).await);
    stop(shutdown, task).await;

    let saved = sink.saved();
    assert!(saved.len() >= 2);
    assert!(saved.iter().all(|r| r.source.as_str() == "good"));
    assert!(sink.attempts.load(Ordering::SeqCst) >= 3);
}

#[tokio::test(start_paused = true)]
async fn hung_save_times_out_per_rate() {
    let sink = Arc::new(RecordingSink {
        hang: true,
        ..Default::default()
    });
    let o = Arc::new(Orchestrator::with_options(
        sink.clone(),
        fast_options().with_save_timeout(Duration::from_millis(100)),
    ));
    let p = StaticProvider::new(
        "slow-store",
        Duration::from_secs(3600),
        vec![rate(Currency::Usd, 1.0, "a"), rate(Currency::Eur, 2.0, "b")],
    );
    o.register(Arc::new(p)).unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&o, &shutdown);
    tokio::time::sleep(Duration::from_secs(1)).await;

    // both saves were attempted and the provider went back into the queue
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(o.queued(), 1);
    stop(shutdown, task).await;
}

#[tokio::test]
async fn shutdown_does_not_wait_for_in_flight_fetch() {
    let o = Arc::new(Orchestrator::with_options(
        Arc::new(RecordingSink::default()),
        fast_options(),
    ));
    let entered = Arc::new(AtomicUsize::new(0));
    o.register(Arc::new(HangingProvider {
        entered: entered.clone(),
    }))
    .unwrap();

    let shutdown = CancellationToken::new();
    let task = spawn(&o, &shutdown);
    assert!(wait_until(|| entered.load(Ordering::SeqCst) == 1, Duration::from_secs(5)).await);

    stop(shutdown, task).await;
    assert_eq!(o.state(), OrchestratorState::Stopped);
}

#[tokio::test]
async fn provider_registered_while_running_is_fetched() {
    let sink = Arc::new(RecordingSink::default());
    let o = Arc::new(Orchestrator::with_options(sink.clone(), fast_options()));
    let shutdown = CancellationToken::new();
    let task = spawn(&o, &shutdown);

    assert!(wait_until(|| o.state() == OrchestratorState::Running, Duration::from_secs(5)).await);
    o.register(Arc::new(StaticProvider::new(
        "late",
        Duration::from_secs(3600),
        vec![rate(Currency::Rub, 0.5, "late")],
    )))
    .unwrap();

    assert!(wait_until(|| sink.saved().len() == 1, Duration::from_secs(5)).await);
    stop(shutdown, task).await;
}

#[tokio::test]
async fn orchestrators_do_not_share_providers() {
    let sink_a = Arc::new(RecordingSink::default());
    let sink_b = Arc::new(RecordingSink::default());
    let a = Arc::new(Orchestrator::with_options(sink_a.clone(), fast_options()));
    let b = Arc::new(Orchestrator::with_options(sink_b.clone(), fast_options()));
    a.register(Arc::new(StaticProvider::new(
        "only-a",
        Duration::from_secs(3600),
        vec![rate(Currency::Usd, 1.0, "a")],
    )))
    .unwrap();
    assert_eq!(a.registered(), 1);
    assert_eq!(b.registered(), 0);

    let shutdown = CancellationToken::new();
    let ta = spawn(&a, &shutdown);
    let tb = spawn(&b, &shutdown);
    assert!(wait_until(|| sink_a.saved().len() == 1, Duration::from_secs(5)).await);
    shutdown.cancel();
    ta.await.unwrap().unwrap();
    tb.await.unwrap().unwrap();

    assert!(sink_b.saved().is_empty());
}
