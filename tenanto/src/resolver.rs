use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tenanto_store::{ConnectionDescriptor, Store, StoreError, TenantRecord, TenantState};
use tracing::debug;
use uuid::Uuid;

use crate::{config::ResolverConfig, error::ResolveError, routing::RoutingKey};

#[derive(Debug, Clone)]
struct Entry {
    tenant_id: Uuid,
    descriptor: ConnectionDescriptor,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Cache {
    entries: HashMap<String, Entry>,
    /// Bumped by every invalidation so that a lookup started before it is not cached.
    epoch: u64,
}

impl Cache {
    fn insert(&mut self, key: String, entry: Entry, capacity: usize) {
        if self.entries.len() >= capacity && !self.entries.contains_key(&key) {
            let now = Instant::now();
            self.entries.retain(|_, entry| entry.expires_at > now);
        }

        if self.entries.len() >= capacity && !self.entries.contains_key(&key) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(key, _)| key.to_owned());

            if let Some(oldest) = oldest {
                self.entries.remove(&oldest);
            }
        }

        self.entries.insert(key, entry);
    }
}

/// Maps routing keys to the connection descriptor of an active tenant.
///
/// Descriptors are cached for `cache_ttl`; state changes invalidate them explicitly.
#[derive(Clone)]
pub struct Resolver {
    store: Store,
    config: ResolverConfig,
    cache: Arc<RwLock<Cache>>,
}

impl Resolver {
    pub fn new(store: Store, config: ResolverConfig) -> Self {
        Self {
            store,
            config,
            cache: Arc::default(),
        }
    }

    /// Accepts a tenant id, a routing code or a host name.
    pub async fn resolve(&self, key: &str) -> Result<ConnectionDescriptor, ResolveError> {
        let routing_key = RoutingKey::parse(key, &self.config.base_domain)
            .ok_or_else(|| ResolveError::NotFound(key.to_owned()))?;

        self.resolve_key(&routing_key).await
    }

    pub async fn resolve_key(&self, key: &RoutingKey) -> Result<ConnectionDescriptor, ResolveError> {
        let cache_key = key.cache_key();

        let epoch = {
            let cache = self.cache.read();

            if let Some(entry) = cache.entries.get(&cache_key) {
                if entry.expires_at > Instant::now() {
                    return Ok(entry.descriptor.clone());
                }
            }

            cache.epoch
        };

        let tenant = self.lookup(key).await?;

        match tenant.state {
            TenantState::Active => {}
            TenantState::Suspended => return Err(ResolveError::TenantSuspended(tenant.id)),
            state => {
                return Err(ResolveError::TenantNotActive {
                    tenant_id: tenant.id,
                    state,
                })
            }
        }

        let mut cache = self.cache.write();
        if cache.epoch == epoch {
            let entry = Entry {
                tenant_id: tenant.id,
                descriptor: tenant.connection.clone(),
                expires_at: Instant::now() + self.ttl(),
            };

            cache.insert(cache_key, entry, self.config.cache_capacity);
        }

        Ok(tenant.connection)
    }

    /// Drops every cached descriptor of the tenant.
    pub fn invalidate(&self, tenant_id: Uuid) {
        let mut cache = self.cache.write();
        cache.epoch += 1;
        cache.entries.retain(|_, entry| entry.tenant_id != tenant_id);

        debug!(%tenant_id, "resolver cache invalidated");
    }

    pub fn invalidate_all(&self) {
        let mut cache = self.cache.write();
        cache.epoch += 1;
        cache.entries.clear();
    }

    pub fn cached(&self) -> usize {
        self.cache.read().entries.len()
    }

    fn ttl(&self) -> Duration {
        self.config.cache_ttl
    }

    async fn lookup(&self, key: &RoutingKey) -> Result<TenantRecord, ResolveError> {
        let res = match key {
            RoutingKey::Id(id) => self.store.find(*id).await,
            RoutingKey::Subdomain(code) | RoutingKey::Code(code) => {
                self.store.find_by_routing_key(code).await
            }
        };

        match res {
            Ok(tenant) => Ok(tenant),
            Err(StoreError::NotFound(_)) => Err(ResolveError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
