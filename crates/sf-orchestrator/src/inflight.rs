//! Per-request in-flight guard.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use busbar_sf_client::OrgIdentity;

/// Identity of a request that must not run twice concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub org: OrgIdentity,
    pub component: String,
}

impl RequestKey {
    pub fn new(org: &OrgIdentity, component: impl Into<String>) -> Self {
        Self {
            org: org.clone(),
            component: component.into(),
        }
    }
}

impl std::fmt::Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.org, self.component)
    }
}

/// Set of keys currently in flight.
pub struct InFlight<K> {
    keys: Arc<Mutex<HashSet<K>>>,
}

impl<K> Clone for InFlight<K> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
        }
    }
}

impl<K> Default for InFlight<K> {
    fn default() -> Self {
        Self {
            keys: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

impl<K> std::fmt::Debug for InFlight<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlight").finish_non_exhaustive()
    }
}

impl<K: Eq + Hash + Clone> InFlight<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. Returns `None` when it is already claimed; the claim
    /// is released when the guard drops.
    pub fn try_begin(&self, key: K) -> Option<InFlightGuard<K>> {
        let inserted = self
            .keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        inserted.then(|| InFlightGuard {
            keys: self.keys.clone(),
            key,
        })
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

#[must_use = "dropping the guard releases the claim"]
pub struct InFlightGuard<K: Eq + Hash> {
    keys: Arc<Mutex<HashSet<K>>>,
    key: K,
}

impl<K: Eq + Hash> InFlightGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash> Drop for InFlightGuard<K> {
    fn drop(&mut self) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_is_refused_until_release() {
        let inflight = InFlight::new();
        let key = RequestKey::new(&OrgIdentity::new("a@example.com"), "ApexClass.Foo");

        let guard = inflight.try_begin(key.clone()).unwrap();
        assert!(inflight.try_begin(key.clone()).is_none());
        assert!(inflight.is_in_flight(&key));

        drop(guard);
        assert!(!inflight.is_in_flight(&key));
        assert!(inflight.try_begin(key).is_some());
    }

    #[test]
    fn test_orgs_do_not_collide() {
        let inflight = InFlight::new();
        let _a = inflight
            .try_begin(RequestKey::new(&OrgIdentity::new("a@example.com"), "Foo"))
            .unwrap();
        assert!(inflight
            .try_begin(RequestKey::new(&OrgIdentity::new("b@example.com"), "Foo"))
            .is_some());
    }
}
