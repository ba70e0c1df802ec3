//! Hold the descriptors a node knows about.
//!
//! A node has at most one descriptor of its own (the one it would
//! publish), and any number of descriptors for other relays, keyed by
//! fingerprint.  Descriptors are never changed in place: replacing one
//! means building a new [`RouterDesc`] and swapping the `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use onion_netdoc::doc::routerdesc::RouterDesc;
use onion_netdoc::types::Fingerprint;

/// Map from fingerprint to descriptor.
pub type PeerMap = HashMap<Fingerprint, Arc<RouterDesc>>;

/// A thread-safe store for this node's descriptor and its peers'.
///
/// Readers get `Arc` snapshots and never hold a lock while using them.
#[derive(Debug, Default)]
pub struct DescriptorStore {
    /// Our own descriptor, if we have built one.
    current: Mutex<Option<Arc<RouterDesc>>>,
    /// Descriptors for other relays.
    ///
    /// Writers clone the map, change the clone, and swap it in.
    peers: Mutex<Arc<PeerMap>>,
}

/// Lock `m`, recovering the value if another thread panicked while
/// holding it.
///
/// Every critical section in this module is a single assignment, so a
/// poisoned lock never guards a half-updated value.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DescriptorStore {
    /// Construct a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return our current descriptor, if there is one.
    pub fn current(&self) -> Option<Arc<RouterDesc>> {
        lock(&self.current).clone()
    }

    /// Install `desc` as our current descriptor, and return the one it
    /// replaced.
    pub fn replace_current(&self, desc: Arc<RouterDesc>) -> Option<Arc<RouterDesc>> {
        lock(&self.current).replace(desc)
    }

    /// Forget our current descriptor, and return it.
    pub fn clear_current(&self) -> Option<Arc<RouterDesc>> {
        lock(&self.current).take()
    }

    /// Return a snapshot of every peer descriptor.
    pub fn peers(&self) -> Arc<PeerMap> {
        Arc::clone(&lock(&self.peers))
    }

    /// Return the peer descriptor with fingerprint `fp`, if we have one.
    pub fn peer(&self, fp: &Fingerprint) -> Option<Arc<RouterDesc>> {
        self.peers().get(fp).cloned()
    }

    /// Return the number of peer descriptors we hold.
    pub fn n_peers(&self) -> usize {
        self.peers().len()
    }

    /// Apply `f` to a copy of the peer map, and install the result.
    fn update_peers<R>(&self, f: impl FnOnce(&mut PeerMap) -> R) -> R {
        let mut guard = lock(&self.peers);
        let mut map = PeerMap::clone(&guard);
        let result = f(&mut map);
        *guard = Arc::new(map);
        result
    }

    /// Add `desc` to our peers, replacing any descriptor with the same
    /// fingerprint.  Return the one it replaced.
    pub fn insert_peer(&self, desc: Arc<RouterDesc>) -> Option<Arc<RouterDesc>> {
        let fp = *desc.fingerprint();
        self.update_peers(|map| map.insert(fp, desc))
    }

    /// Remove the peer descriptor with fingerprint `fp`, and return it.
    pub fn remove_peer(&self, fp: &Fingerprint) -> Option<Arc<RouterDesc>> {
        self.update_peers(|map| map.remove(fp))
    }
}
