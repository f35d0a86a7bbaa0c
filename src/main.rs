//! fxrates-ingest - Binary Entrypoint
//! Loads config, wires providers into the orchestrator, serves the query API
//! and runs both until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fxrates_ingest::ingest::config::{load_config_default, IngestConfig};
use fxrates_ingest::api;
use fxrates_ingest::ingest::providers::{BcvBanksProvider, BcvProvider, BinanceP2pProvider};
use fxrates_ingest::ingest::{Orchestrator, RateProvider};
use fxrates_ingest::metrics::Metrics;
use fxrates_ingest::storage::{MemoryStorage, RateStore};

/// Compact logs filtered by RUST_LOG, defaulting to ingest events at info.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fxrates_ingest=info,ingest=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn default_providers(cfg: &IngestConfig) -> Result<Vec<Arc<dyn RateProvider>>> {
    let mut providers: Vec<Arc<dyn RateProvider>> = Vec::new();

    let binance = &cfg.providers.binance_p2p;
    if binance.enabled {
        let p = BinanceP2pProvider::new(Duration::from_secs(binance.timeout_secs))?
            .with_interval(Duration::from_secs(binance.interval_secs));
        providers.push(Arc::new(p));
    }

    let bcv = &cfg.providers.bcv;
    if bcv.enabled {
        let p = BcvProvider::new(Duration::from_secs(bcv.timeout_secs), bcv.insecure_tls)?
            .with_interval(Duration::from_secs(bcv.interval_secs));
        providers.push(Arc::new(p));
    }

    let banks = &cfg.providers.bcv_banks;
    if banks.enabled {
        let p = BcvBanksProvider::new(Duration::from_secs(banks.timeout_secs), banks.insecure_tls)?
            .with_interval(Duration::from_secs(banks.interval_secs));
        providers.push(Arc::new(p));
    }

    Ok(providers)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = load_config_default().context("loading ingest config")?;
    let options = cfg.orchestrator_options()?;
    let listen = cfg.listen_addr()?;

    let storage = Arc::new(MemoryStorage::new());
    let mut app = api::router(storage.clone() as Arc<dyn RateStore>);
    if cfg.metrics.enabled {
        app = app.merge(Metrics::init(&options)?.router());
    }

    let orchestrator = Orchestrator::with_options(storage, options);

    for p in default_providers(&cfg)? {
        let name = p.name().to_string();
        orchestrator
            .register(p)
            .with_context(|| format!("registering provider {name:?}"))?;
    }
    if orchestrator.registered() == 0 {
        tracing::warn!("no providers enabled; the orchestrator will idle");
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("shutdown signal received");
                    shutdown.cancel();
                }
                Err(e) => tracing::error!(error = ?e, "unable to listen for shutdown signal"),
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    tracing::info!(%listen, "query api listening");
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned());

    let (ran, served) = tokio::join!(orchestrator.start(shutdown.clone()), async {
        let res = server.await;
        // a dead server takes the orchestrator down with it
        shutdown.cancel();
        res
    });
    served.context("query api")?;
    ran
}
