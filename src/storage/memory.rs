// src/storage/memory.rs
//! In-memory rate store. Everything is lost on restart.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{Page, RateQuery, RateSink, RateStore};
use crate::ingest::types::{Currency, ExchangeRate, RateType, Source};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    base: Currency,
    target: Currency,
    source: Source,
    rate_type: RateType,
    as_of_nanos: i64,
}

impl Key {
    fn of(r: &ExchangeRate) -> Self {
        Self {
            base: r.base,
            target: r.target,
            source: r.source.clone(),
            rate_type: r.rate_type,
            // out-of-range dates collapse to micros precision
            as_of_nanos: r
                .as_of
                .timestamp_nanos_opt()
                .unwrap_or_else(|| r.as_of.timestamp_micros().saturating_mul(1_000)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<Key, ExchangeRate>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

fn newer(a: &ExchangeRate, b: &ExchangeRate) -> bool {
    a.as_of > b.as_of || (a.as_of == b.as_of && a.fetched_at > b.fetched_at)
}

#[async_trait::async_trait]
impl RateSink for MemoryStorage {
    async fn save_exchange_rate(&self, rate: &ExchangeRate) -> Result<()> {
        let key = Key::of(rate);
        self.data.write().insert(key, rate.clone());
        Ok(())
    }
}

#[async_trait::async_trait]
impl RateStore for MemoryStorage {
    async fn rates_as_of(
        &self,
        query: &RateQuery,
        at: DateTime<Utc>,
        limit: u32,
        offset: u64,
    ) -> Result<Page<ExchangeRate>> {
        let latest: Vec<ExchangeRate> = {
            let data = self.data.read();
            let mut best: BTreeMap<(Currency, Source, RateType), &ExchangeRate> = BTreeMap::new();
            for r in data.values() {
                if !query.matches(r) || r.as_of > at {
                    continue;
                }
                let series = (r.target, r.source.clone(), r.rate_type);
                match best.get(&series) {
                    Some(b) if !newer(r, b) => {}
                    _ => {
                        best.insert(series, r);
                    }
                }
            }
            best.into_values().cloned().collect()
        };

        Ok(Page::slice(latest, limit, offset))
    }

    async fn rates_in_range(
        &self,
        query: &RateQuery,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: u32,
        offset: u64,
    ) -> Result<Page<ExchangeRate>> {
        let mut matches: Vec<ExchangeRate> = {
            let data = self.data.read();
            data.values()
                .filter(|r| query.matches(r) && r.as_of >= from && r.as_of <= to)
                .cloned()
                .collect()
        };

        matches.sort_by(|a, b| a.as_of.cmp(&b.as_of).then(a.fetched_at.cmp(&b.fetched_at)));

        Ok(Page::slice(matches, limit, offset))
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let data = self.data.read();
        let set: BTreeSet<Source> = data.keys().map(|k| k.source.clone()).collect();
        Ok(set.into_iter().collect())
    }

    async fn list_currencies(&self) -> Result<Vec<Currency>> {
        let data = self.data.read();
        let set: BTreeSet<Currency> = data
            .keys()
            .flat_map(|k| [k.base, k.target])
            .collect();
        Ok(set.into_iter().collect())
    }
}
