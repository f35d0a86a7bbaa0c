// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod ingest;
pub mod metrics;
pub mod storage;

// ---- Re-exports for stable public API ----
pub use crate::ingest::{
    ExchangeRate, Orchestrator, OrchestratorOptions, ProviderId, RateProvider, RegisterError,
    RetryPolicy,
};
pub use crate::storage::{MemoryStorage, RateSink, RateStore};
