// src/core/tenant_cache.rs

//! A short-TTL cache in front of the tenant catalog lookup, so a burst of
//! connecting clients for the same tenant doesn't hammer whatever backs
//! `TenantCatalog::fetch`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::core::errors::FanoutError;
use crate::core::types::{Tenant, TenantId};

#[async_trait]
pub trait TenantCatalog: Send + Sync {
    async fn fetch(&self, id: &TenantId) -> Result<Tenant, FanoutError>;
}

struct CachedTenant {
    tenant: Tenant,
    fetched_at: Instant,
}

/// Wraps a `TenantCatalog` with a short-TTL read-through cache.
pub struct TenantCache<C: TenantCatalog> {
    inner: C,
    ttl: Duration,
    entries: DashMap<TenantId, CachedTenant>,
}

impl<C: TenantCatalog> TenantCache<C> {
    pub fn new(inner: C, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: DashMap::new(),
        }
    }

    pub async fn get(&self, id: &TenantId) -> Result<Tenant, FanoutError> {
        if let Some(cached) = self.entries.get(id) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.tenant.clone());
            }
        }

        let tenant = self.inner.fetch(id).await?;
        self.entries.insert(
            id.clone(),
            CachedTenant {
                tenant: tenant.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(tenant)
    }

    /// Forces the next `get` for this tenant to bypass the cache. Used when
    /// an operations-bus signal (suspend/unsuspend) changes tenant state
    /// out from under the cache's TTL.
    pub fn invalidate(&self, id: &TenantId) {
        self.entries.remove(id);
    }
}

pub mod fakes {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct FakeTenantCatalog {
        pub tenants: Mutex<HashMap<TenantId, Tenant>>,
    }

    impl FakeTenantCatalog {
        pub fn with(tenant: Tenant) -> Self {
            let mut map = HashMap::new();
            map.insert(tenant.id.clone(), tenant);
            Self {
                tenants: Mutex::new(map),
            }
        }
    }

    #[async_trait]
    impl TenantCatalog for FakeTenantCatalog {
        async fn fetch(&self, id: &TenantId) -> Result<Tenant, FanoutError> {
            self.tenants
                .lock()
                .get(id)
                .cloned()
                .ok_or_else(|| FanoutError::TenantNotFound(id.to_string()))
        }
    }
}
