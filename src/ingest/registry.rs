// src/ingest/registry.rs
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use uuid::Uuid;

use crate::ingest::types::RateProvider;

/// Opaque handle assigned to a provider when it is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProviderId(Uuid);

impl ProviderId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A provider together with the name and interval validated at registration.
#[derive(Clone)]
pub struct RegisteredProvider {
    pub name: String,
    pub interval: Duration,
    pub provider: Arc<dyn RateProvider>,
}

impl fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Providers known to one orchestrator. Entries are never removed.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: DashMap<ProviderId, RegisteredProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the provider under a fresh id. Validation is the caller's job.
    pub fn insert(&self, entry: RegisteredProvider) -> ProviderId {
        let id = ProviderId::new();
        self.providers.insert(id, entry);
        id
    }

    pub fn resolve(&self, id: &ProviderId) -> Option<RegisteredProvider> {
        self.providers.get(id).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
