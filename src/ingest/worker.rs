// src/ingest/worker.rs
use std::sync::Arc;

use anyhow::Result;
use metrics::{counter, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ingest::registry::ProviderId;
use crate::ingest::types::{ExchangeRate, RateProvider};

/// Everything a spawned fetch needs.
pub(crate) struct WorkerInfo {
    pub provider: Arc<dyn RateProvider>,
    pub provider_id: ProviderId,
    pub name: String,
    pub failures: u32, // consecutive failures before this attempt
    pub results: mpsc::Sender<WorkerResponse>,
}

/// Outcome of one fetch, tagged with the provider it belongs to.
#[derive(Debug)]
pub(crate) struct WorkerResponse {
    pub provider_id: ProviderId,
    pub failures: u32,
    pub result: Result<Vec<ExchangeRate>>,
}

/// Spawns the fetch for one due job. Never blocks the caller.
pub(crate) fn dispatch(cancel: CancellationToken, info: WorkerInfo) {
    tokio::spawn(handle_job(cancel, info));
}

/// Runs a single fetch and forwards the outcome to the collector.
///
/// If shutdown begins while the fetch or the send is pending the outcome is
/// dropped instead of waiting on a loop that is no longer reading.
pub(crate) async fn handle_job(cancel: CancellationToken, info: WorkerInfo) {
    let WorkerInfo {
        provider,
        provider_id,
        name,
        failures,
        results,
    } = info;

    let t0 = std::time::Instant::now();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(target: "ingest", provider = %name, "fetch abandoned on shutdown");
            return;
        }
        res = provider.fetch(&cancel) => res,
    };

    histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("ingest_fetch_total").increment(1);

    let response = WorkerResponse {
        provider_id,
        failures,
        result,
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(target: "ingest", provider = %name, "outcome dropped on shutdown");
        }
        sent = results.send(response) => {
            if sent.is_err() {
                tracing::debug!(target: "ingest", provider = %name, "collector closed, outcome dropped");
            }
        }
    }
}
