// src/ingest/error.rs
use thiserror::Error;

/// Why a provider was refused by [`crate::ingest::Orchestrator::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("invalid provider: name must not be empty")]
    InvalidProvider,
    #[error("invalid interval: must be greater than zero")]
    InvalidInterval,
}

/// A currency or rate-type code that is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCodeError {
    #[error("unsupported currency {0:?}")]
    Currency(String),
    #[error("unsupported rate type {0:?}")]
    RateType(String),
}
