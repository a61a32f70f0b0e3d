use core::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use compact_str::CompactString;
use hashbrown::HashMap;

use super::grant::{CapabilityOracle, Grant, PermissionKind};
use crate::config::PermissionConfig;
use crate::error::Result;

/// Time source for cache expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

type Key = (CompactString, CompactString, PermissionKind);

#[derive(Debug, Clone, Copy)]
struct Entry {
    grant: Grant,
    fetched: Instant,
}

/// Process-wide grant cache in front of another oracle.
///
/// Entries expire after the TTL and are refetched on the next lookup. There is no other
/// invalidation, so a changed grant may be served stale for up to one TTL.
#[derive(Debug)]
pub struct CachedOracle<O, C = SystemClock> {
    inner: O,
    clock: C,
    ttl: Duration,
    entries: Mutex<HashMap<Key, Entry>>,
}

impl<O: CapabilityOracle> CachedOracle<O> {
    pub fn new(inner: O, ttl: Duration) -> Self {
        Self::with_clock(inner, ttl, SystemClock)
    }

    pub fn from_config(inner: O, config: &PermissionConfig) -> Self {
        Self::new(inner, config.cache_ttl())
    }
}

impl<O: CapabilityOracle, C: Clock> CachedOracle<O, C> {
    pub fn with_clock(inner: O, ttl: Duration, clock: C) -> Self {
        Self {
            inner,
            clock,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    fn cached(&self, key: &Key) -> Option<Grant> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| self.clock.now().duration_since(entry.fetched) < self.ttl)
            .map(|entry| entry.grant)
    }

    fn store(&self, key: Key, grant: Grant) {
        let fetched = self.clock.now();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Entry { grant, fetched });
    }
}

impl<O: CapabilityOracle, C: Clock> CapabilityOracle for CachedOracle<O, C> {
    fn grant(
        &self,
        role: &str,
        entity: &str,
        kind: PermissionKind,
    ) -> impl Future<Output = Result<Grant>> + Send {
        let key: Key = (CompactString::from(role), CompactString::from(entity), kind);
        async move {
            if let Some(grant) = self.cached(&key) {
                return Ok(grant);
            }
            crate::crudql_trace_cache_miss!(key.0, key.1, kind);
            let grant = self.inner.grant(&key.0, &key.1, kind).await?;
            self.store(key, grant);
            Ok(grant)
        }
    }
}
