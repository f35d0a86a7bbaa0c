use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::ingest::OrchestratorOptions;

fn millis_f64(d: std::time::Duration) -> f64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX) as f64
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and publish the static scheduler
    /// settings as gauges. Fails if a recorder is already installed.
    pub fn init(options: &OrchestratorOptions) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;

        crate::ingest::ensure_metrics_described();
        gauge!("ingest_query_interval_ms").set(millis_f64(options.query_interval));
        gauge!("ingest_save_timeout_ms").set(millis_f64(options.save_timeout));

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
