//! process wide provider schema cache
//!
//! Schemas are large and fetching one means starting a provider, so every schema is fetched once
//! and shared by every caller through one [SchemaCache]. The whole response is kept, fetch errors
//! included, so concurrent callers asking for a broken provider all see the same error.
//!
//! No operation holds the lock while fetching: [cached_schema] fetches first, then sets. Two
//! callers missing the same provider at the same time may both fetch; the later `set` wins.
use crate::addrs::Provider;
use crate::schema::ProviderSchema;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A cached fetch outcome
pub type CachedSchema = Result<Arc<ProviderSchema>, SchemaFetchError>;

#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: Mutex<HashMap<Provider, CachedSchema>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, provider: Provider, schema: CachedSchema) {
        self.entries.lock().insert(provider, schema);
    }

    pub fn get(&self, provider: &Provider) -> Option<CachedSchema> {
        self.entries.lock().get(provider).cloned()
    }

    pub fn remove(&self, provider: &Provider) {
        self.entries.lock().remove(provider);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Retrieves the schema of a provider, usually by asking the provider itself
pub trait SchemaFetcher {
    fn fetch_schema(&self, provider: &Provider) -> Result<ProviderSchema, SchemaFetchError>;
}

impl<F> SchemaFetcher for F
where
    F: Fn(&Provider) -> Result<ProviderSchema, SchemaFetchError>,
{
    fn fetch_schema(&self, provider: &Provider) -> Result<ProviderSchema, SchemaFetchError> {
        self(provider)
    }
}

/// Cached schema of `provider`, fetched and cached on a miss
pub fn cached_schema(
    cache: &SchemaCache,
    fetcher: &dyn SchemaFetcher,
    provider: &Provider,
) -> CachedSchema {
    if let Some(cached) = cache.get(provider) {
        tracing::trace!(%provider, "schema cache hit");
        return cached;
    }

    tracing::debug!(%provider, "fetching provider schema");
    let fetched = fetcher.fetch_schema(provider).map(Arc::new);
    if let Err(err) = &fetched {
        tracing::warn!(%provider, %err, "provider schema unavailable, caching the error");
    }
    cache.set(provider.clone(), fetched.clone());
    fetched
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SchemaFetchError {
    #[error("no schema available for provider {0}")]
    NotAvailable(Provider),
    #[error("failed to retrieve schema for provider {provider}: {message}")]
    Failed { provider: Provider, message: String },
}
