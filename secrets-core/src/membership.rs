//! Cluster membership: immutable snapshots swapped as a whole.
//!
//! The discovery feed never edits a snapshot in place. Each update builds a
//! new [`Topology`] (snapshot plus the ring derived from it) and publishes it
//! behind a single `Arc`, so a lookup that started before the update keeps
//! using a consistent pair until it finishes.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use crate::ring::HashRing;

/// Normalise an endpoint so `http://a:5000/` and `http://a:5000` compare equal.
pub fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim().trim_end_matches('/').to_string()
}

/// Peer set as seen by one node at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipSnapshot {
    self_endpoint: String,
    peers: BTreeSet<String>,
}

impl MembershipSnapshot {
    pub fn new<I, S>(self_endpoint: impl AsRef<str>, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            self_endpoint: normalize_endpoint(self_endpoint.as_ref()),
            peers: peers
                .into_iter()
                .map(|p| normalize_endpoint(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Snapshot of a node that knows no peers yet.
    pub fn single(self_endpoint: impl AsRef<str>) -> Self {
        Self::new(self_endpoint, std::iter::empty::<&str>())
    }

    pub fn self_endpoint(&self) -> &str {
        &self.self_endpoint
    }

    pub fn peers(&self) -> &BTreeSet<String> {
        &self.peers
    }

    /// Copy of this snapshot with a different peer set and the same self.
    pub fn with_peers<I, S>(&self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(&self.self_endpoint, peers)
    }
}

/// A snapshot together with the ownership ring built from it.
#[derive(Debug, Clone)]
pub struct Topology {
    snapshot: MembershipSnapshot,
    ring: HashRing,
    generation: u64,
}

impl Topology {
    pub fn new(snapshot: MembershipSnapshot, replicas: usize, generation: u64) -> Self {
        let ring = HashRing::new(snapshot.peers().iter().cloned(), replicas);
        Self {
            snapshot,
            ring,
            generation,
        }
    }

    /// Endpoint that owns `key`. An empty peer set makes this node the owner.
    pub fn owner_of(&self, key: &str) -> &str {
        self.ring
            .owner(key)
            .unwrap_or_else(|| self.snapshot.self_endpoint())
    }

    /// True when `endpoint` is this node.
    pub fn is_self(&self, endpoint: &str) -> bool {
        endpoint == self.snapshot.self_endpoint()
    }

    pub fn snapshot(&self) -> &MembershipSnapshot {
        &self.snapshot
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    /// Monotonic counter bumped on every published update.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Ownership of a key under an explicit snapshot, without a cached ring.
pub fn owner_of(key: &str, snapshot: &MembershipSnapshot, replicas: usize) -> String {
    Topology::new(snapshot.clone(), replicas, 0)
        .owner_of(key)
        .to_string()
}

/// Current membership of this node, updated by the discovery feed.
#[derive(Debug)]
pub struct MembershipView {
    current: RwLock<Arc<Topology>>,
    replicas: usize,
}

impl MembershipView {
    pub fn new(snapshot: MembershipSnapshot, replicas: usize) -> Self {
        Self {
            current: RwLock::new(Arc::new(Topology::new(snapshot, replicas, 0))),
            replicas,
        }
    }

    /// Topology in force right now.
    pub fn current(&self) -> Arc<Topology> {
        // The guarded value is a single Arc, so a poisoned lock still holds
        // a complete topology.
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*guard)
    }

    /// Replace the whole snapshot.
    pub fn replace(&self, snapshot: MembershipSnapshot) -> Arc<Topology> {
        // Generation is read under the write lock so publication order and
        // generation order always agree.
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let generation = guard.generation() + 1;
        let topology = Arc::new(Topology::new(snapshot, self.replicas, generation));
        *guard = Arc::clone(&topology);
        topology
    }

    /// Update hook for discovery: publish a new peer set, keeping self.
    pub fn update_peers<I, S>(&self, peers: I) -> Arc<Topology>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let next = self.current().snapshot().with_peers(peers);
        self.replace(next)
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }
}
