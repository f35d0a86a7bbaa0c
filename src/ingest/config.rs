// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingest::options::{OrchestratorOptions, RetryPolicy};
use crate::ingest::providers::{bcv, binance_p2p};

pub const ENV_PATH: &str = "FXRATES_CONFIG";
pub const DEFAULT_PATH: &str = "config/fxrates.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub orchestrator: OrchestratorSection,
    pub server: ServerSection,
    pub metrics: MetricsSection,
    pub providers: ProvidersSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorSection {
    pub query_interval_ms: u64,
    pub save_timeout_secs: u64,
    pub collector_capacity: usize,
    pub retry: RetrySection,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            query_interval_ms: 1_000,
            save_timeout_secs: 10,
            collector_capacity: 100,
            retry: RetrySection::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub strategy: RetryStrategy,
    pub delay_secs: u64,
    /// Cap for the exponential strategy; ignored by `fixed`.
    pub max_delay_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::Fixed,
            delay_secs: 10,
            max_delay_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// Address of the HTTP query API.
    pub listen: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8545".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsSection {
    /// Serve `/metrics` next to the query API.
    pub enabled: bool,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvidersSection {
    pub binance_p2p: BinanceP2pSection,
    pub bcv: BcvSection,
    pub bcv_banks: BcvSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BinanceP2pSection {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub interval_secs: u64,
}

impl Default for BinanceP2pSection {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 30,
            interval_secs: binance_p2p::DEFAULT_INTERVAL.as_secs(),
        }
    }
}

/// Shared by the BCV official and per-bank scrapers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BcvSection {
    pub enabled: bool,
    pub timeout_secs: u64,
    pub interval_secs: u64,
    /// Accept the site's broken certificate chain.
    pub insecure_tls: bool,
}

impl Default for BcvSection {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 30,
            interval_secs: bcv::DEFAULT_INTERVAL.as_secs(),
            insecure_tls: true,
        }
    }
}

impl IngestConfig {
    pub fn orchestrator_options(&self) -> Result<OrchestratorOptions> {
        let o = &self.orchestrator;
        let r = &o.retry;
        if o.save_timeout_secs == 0 {
            return Err(anyhow!("orchestrator.save_timeout_secs must be greater than zero"));
        }
        if r.delay_secs == 0 {
            return Err(anyhow!("orchestrator.retry.delay_secs must be greater than zero"));
        }
        let retry = match r.strategy {
            RetryStrategy::Fixed => RetryPolicy::Fixed(Duration::from_secs(r.delay_secs)),
            RetryStrategy::Exponential => {
                if r.max_delay_secs < r.delay_secs {
                    return Err(anyhow!(
                        "orchestrator.retry.max_delay_secs ({}) is below delay_secs ({})",
                        r.max_delay_secs,
                        r.delay_secs
                    ));
                }
                RetryPolicy::Exponential {
                    initial: Duration::from_secs(r.delay_secs),
                    max: Duration::from_secs(r.max_delay_secs),
                }
            }
        };

        Ok(OrchestratorOptions::default()
            .with_query_interval(Duration::from_millis(o.query_interval_ms))
            .with_save_timeout(Duration::from_secs(o.save_timeout_secs))
            .with_collector_capacity(o.collector_capacity)
            .with_retry(retry))
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let s = self.server.listen.trim();
        s.parse::<SocketAddr>()
            .with_context(|| format!("invalid server.listen address {s:?}"))
    }
}

/// Load config from an explicit TOML path.
pub fn load_config_from(path: &Path) -> Result<IngestConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    parse_config(&content).with_context(|| format!("parsing config {}", path.display()))
}

/// Load config using env var + fallbacks:
/// 1) $FXRATES_CONFIG
/// 2) config/fxrates.toml
/// 3) built-in defaults
pub fn load_config_default() -> Result<IngestConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        } else {
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
    }
    let default_p = PathBuf::from(DEFAULT_PATH);
    if default_p.exists() {
        return load_config_from(&default_p);
    }
    Ok(IngestConfig::default())
}

fn parse_config(s: &str) -> Result<IngestConfig> {
    Ok(toml::from_str(s)?)
}
