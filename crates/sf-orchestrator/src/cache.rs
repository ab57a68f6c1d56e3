//! Org-scoped cache for slow-changing reference data.
//!
//! Entries are keyed by `(org, kind)` and never expire; an entry is only
//! replaced by an explicit [`OrgCache::refresh`]. Each key holds a
//! single-flight cell, so concurrent first populations share one fetch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use busbar_sf_client::OrgIdentity;
use tokio::sync::OnceCell;
use tracing::debug;

/// What a cache entry holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Users,
    Classes,
    SObjectDescribe,
    RecordTypes,
    Other(String),
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Users => f.write_str("users"),
            ResourceKind::Classes => f.write_str("classes"),
            ResourceKind::SObjectDescribe => f.write_str("sobjects_describe"),
            ResourceKind::RecordTypes => f.write_str("recordtypes"),
            ResourceKind::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub org: OrgIdentity,
    pub kind: ResourceKind,
}

impl CacheKey {
    pub fn new(org: &OrgIdentity, kind: ResourceKind) -> Self {
        Self {
            org: org.clone(),
            kind,
        }
    }
}

pub struct OrgCache<V> {
    entries: Mutex<HashMap<CacheKey, Arc<OnceCell<V>>>>,
}

impl<V> Default for OrgCache<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> std::fmt::Debug for OrgCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrgCache")
            .field("entries", &self.len())
            .finish()
    }
}

impl<V> OrgCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Arc<OnceCell<V>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cell(&self, key: CacheKey) -> Arc<OnceCell<V>> {
        self.entries().entry(key).or_default().clone()
    }

    /// Number of populated entries.
    pub fn len(&self) -> usize {
        self.entries()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, org: &OrgIdentity, kind: &ResourceKind) -> bool {
        self.entries()
            .get(&CacheKey::new(org, kind.clone()))
            .is_some_and(|cell| cell.initialized())
    }

    /// Drop one entry.
    pub fn invalidate(&self, org: &OrgIdentity, kind: &ResourceKind) {
        self.entries().remove(&CacheKey::new(org, kind.clone()));
    }

    /// Drop every entry of an org.
    pub fn invalidate_org(&self, org: &OrgIdentity) {
        self.entries().retain(|key, _| &key.org != org);
    }
}

impl<V: Clone> OrgCache<V> {
    pub fn get(&self, org: &OrgIdentity, kind: &ResourceKind) -> Option<V> {
        self.entries()
            .get(&CacheKey::new(org, kind.clone()))
            .and_then(|cell| cell.get().cloned())
    }

    /// Store a value, replacing whatever was there.
    pub fn insert(&self, org: &OrgIdentity, kind: ResourceKind, value: V) {
        self.entries()
            .insert(CacheKey::new(org, kind), Arc::new(OnceCell::from(value)));
    }

    /// Return the cached value, fetching it first if absent.
    ///
    /// `fetch` is not called when the entry exists. Concurrent callers for
    /// the same key wait on a single fetch. A failed fetch leaves the entry
    /// empty so a later call retries.
    pub async fn populate<F, Fut, E>(&self, org: &OrgIdentity, kind: ResourceKind, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = self.cell(CacheKey::new(org, kind.clone()));
        let value = cell
            .get_or_try_init(|| {
                debug!(org = %org, kind = %kind, "Populating cache entry");
                fetch()
            })
            .await?;
        Ok(value.clone())
    }

    /// Fetch unconditionally and overwrite the entry on success.
    pub async fn refresh<F, Fut, E>(&self, org: &OrgIdentity, kind: ResourceKind, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        debug!(org = %org, kind = %kind, "Refreshing cache entry");
        let value = fetch().await?;
        self.insert(org, kind, value.clone());
        Ok(value)
    }
}
