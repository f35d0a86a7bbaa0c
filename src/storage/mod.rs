// src/storage/mod.rs
pub mod memory;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::types::{Currency, ExchangeRate, RateType, Source};

pub use memory::MemoryStorage;

/// Write side used by the orchestrator. Implementations must tolerate
/// concurrent calls.
#[async_trait::async_trait]
pub trait RateSink: Send + Sync {
    async fn save_exchange_rate(&self, rate: &ExchangeRate) -> Result<()>;
}

/// Read side over persisted rates.
#[async_trait::async_trait]
pub trait RateStore: RateSink {
    /// Latest rate effective at or before `at` for every series (target,
    /// source, rate type) matching `query`, ordered by series. `limit == 0`
    /// means no limit.
    async fn rates_as_of(
        &self,
        query: &RateQuery,
        at: DateTime<Utc>,
        limit: u32,
        offset: u64,
    ) -> Result<Page<ExchangeRate>>;

    /// Rates effective within `[from, to]`, oldest first. `limit == 0` means no limit.
    async fn rates_in_range(
        &self,
        query: &RateQuery,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: u32,
        offset: u64,
    ) -> Result<Page<ExchangeRate>>;

    async fn list_sources(&self) -> Result<Vec<Source>>;

    async fn list_currencies(&self) -> Result<Vec<Currency>>;
}

/// Filter over stored rates; `None` fields match anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateQuery {
    pub base: Currency,
    #[serde(default)]
    pub target: Option<Currency>,
    #[serde(default)]
    pub rate_type: Option<RateType>,
    #[serde(default)]
    pub source: Option<Source>,
}

impl RateQuery {
    pub fn new(base: Currency) -> Self {
        Self {
            base,
            target: None,
            rate_type: None,
            source: None,
        }
    }

    pub fn target(mut self, target: Currency) -> Self {
        self.target = Some(target);
        self
    }

    pub fn rate_type(mut self, rate_type: RateType) -> Self {
        self.rate_type = Some(rate_type);
        self
    }

    pub fn source(mut self, source: impl Into<Source>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn matches(&self, r: &ExchangeRate) -> bool {
        r.base == self.base
            && self.target.map_or(true, |t| t == r.target)
            && self.rate_type.map_or(true, |t| t == r.rate_type)
            && self.source.as_ref().map_or(true, |s| *s == r.source)
    }
}

/// One page of results plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    /// Cuts `[offset, offset + limit)` out of an already ordered list.
    pub fn slice(mut items: Vec<T>, limit: u32, offset: u64) -> Self {
        let total = items.len() as u64;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(items.len());
        let end = if limit == 0 {
            items.len()
        } else {
            start.saturating_add(limit as usize).min(items.len())
        };
        Self {
            results: items.drain(start..end).collect(),
            total,
        }
    }
}
