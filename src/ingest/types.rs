// src/ingest/types.rs
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::ingest::error::ParseCodeError;

/// Variants are declared alphabetically so `Ord` matches the ISO code order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Cny,
    Eur,
    Rub,
    Try,
    Usd,
    Usdt,
    Ves,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Cny => "CNY",
            Currency::Eur => "EUR",
            Currency::Rub => "RUB",
            Currency::Try => "TRY",
            Currency::Usd => "USD",
            Currency::Usdt => "USDT",
            Currency::Ves => "VES",
        }
    }
}

impl FromStr for Currency {
    type Err = ParseCodeError;

    /// Case-insensitive ISO code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CNY" => Ok(Currency::Cny),
            "EUR" => Ok(Currency::Eur),
            "RUB" => Ok(Currency::Rub),
            "TRY" => Ok(Currency::Try),
            "USD" => Ok(Currency::Usd),
            "USDT" => Ok(Currency::Usdt),
            "VES" => Ok(Currency::Ves),
            _ => Err(ParseCodeError::Currency(s.to_string())),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of quote: official mid-market, or one side of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RateType {
    Mid,
    Buy,
    Sell,
}

impl RateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateType::Mid => "MID",
            RateType::Buy => "BUY",
            RateType::Sell => "SELL",
        }
    }
}

impl FromStr for RateType {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MID" => Ok(RateType::Mid),
            "BUY" => Ok(RateType::Buy),
            "SELL" => Ok(RateType::Sell),
            _ => Err(ParseCodeError::RateType(s.to_string())),
        }
    }
}

impl fmt::Display for RateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form tag naming where a rate came from, e.g. "BCV" or "BinanceP2P".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Source(String);

impl Source {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Source {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Source {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A single observed exchange rate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExchangeRate {
    pub as_of: DateTime<Utc>,      // effective date published by the source
    pub fetched_at: DateTime<Utc>, // when we observed it
    pub base: Currency,
    pub target: Currency,
    pub rate_type: RateType,
    pub source: Source,
    pub rate: f64,
}

/// A periodically polled exchange-rate source.
///
/// `fetch` receives the orchestrator's shutdown token and should abandon
/// outstanding I/O once it is cancelled. Every error is handled the same way
/// by the orchestrator (retry after the configured delay).
#[async_trait::async_trait]
pub trait RateProvider: Send + Sync {
    /// Human-readable name, used in logs only. Must not be empty.
    fn name(&self) -> &str;

    /// Delay between two successful fetches. Must be non-zero.
    fn interval(&self) -> Duration;

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<ExchangeRate>>;
}
