// src/ingest/mod.rs
pub mod config;
pub mod error;
pub mod options;
pub mod orchestrator;
pub mod providers;
pub mod queue;
pub mod registry;
pub mod types;
mod worker;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub use error::{ParseCodeError, RegisterError};
pub use options::{OrchestratorOptions, RetryPolicy};
pub use orchestrator::{Orchestrator, OrchestratorState};
pub use registry::ProviderId;
pub use types::{Currency, ExchangeRate, RateProvider, RateType, Source};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_fetch_total", "Provider fetches that completed.");
        describe_counter!(
            "ingest_fetch_errors_total",
            "Provider fetches that returned an error."
        );
        describe_counter!(
            "ingest_rates_saved_total",
            "Exchange rates written to storage."
        );
        describe_counter!(
            "ingest_save_errors_total",
            "Exchange rates that failed or timed out on save."
        );
        describe_counter!(
            "ingest_unknown_provider_total",
            "Fetch outcomes for a provider id missing from the registry."
        );
        describe_histogram!("ingest_fetch_ms", "Provider fetch time in milliseconds.");
        describe_gauge!("ingest_queue_depth", "Jobs waiting in the due-time queue.");
    });
}
