//! Peer-aware read-through cache group.
//!
//! A group resolves a key in one of two ways. When this node owns the key it
//! consults its [`LocalStore`] and, on a miss, runs the [`Loader`] inside a
//! single flight. When another node owns it the group asks that owner over
//! the peer protocol, falling back to local resolution only if the owner
//! cannot be reached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use secrets_core::{CacheError, CacheResult, Loaded, MembershipView};
use tracing::{debug, warn};

use crate::flight::SingleFlight;
use crate::store::LocalStore;
use crate::traits::{Loader, NoPeers, PeerFetcher};

/// Snapshot of a group's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Calls to [`CacheGroup::get`] and [`CacheGroup::get_local`].
    pub gets: u64,
    /// Lookups answered straight from the local store.
    pub local_hits: u64,
    /// Loader invocations.
    pub loads: u64,
    pub load_errors: u64,
    /// Fetches sent to the owning peer.
    pub peer_fetches: u64,
    pub peer_errors: u64,
    /// Remote lookups resolved locally because the owner was unreachable.
    pub fallbacks: u64,
}

#[derive(Debug, Default)]
struct Counters {
    gets: AtomicU64,
    local_hits: AtomicU64,
    loads: AtomicU64,
    load_errors: AtomicU64,
    peer_fetches: AtomicU64,
    peer_errors: AtomicU64,
    fallbacks: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> GroupStats {
        GroupStats {
            gets: self.gets.load(Ordering::Relaxed),
            local_hits: self.local_hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_errors: self.load_errors.load(Ordering::Relaxed),
            peer_fetches: self.peer_fetches.load(Ordering::Relaxed),
            peer_errors: self.peer_errors.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// A named cache group shared by every request on this node.
pub struct CacheGroup {
    name: String,
    store: Arc<LocalStore>,
    loader: Arc<dyn Loader>,
    peers: Arc<dyn PeerFetcher>,
    membership: Arc<MembershipView>,
    local_flights: SingleFlight<Loaded>,
    peer_flights: SingleFlight<Loaded>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for CacheGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheGroup")
            .field("name", &self.name)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl CacheGroup {
    /// Create a group with a store of `cache_bytes` and no peer transport.
    pub fn new(
        name: impl Into<String>,
        cache_bytes: usize,
        loader: Arc<dyn Loader>,
        membership: Arc<MembershipView>,
    ) -> Self {
        Self {
            name: name.into(),
            store: Arc::new(LocalStore::new(cache_bytes)),
            loader,
            peers: Arc::new(NoPeers),
            membership,
            local_flights: SingleFlight::new(),
            peer_flights: SingleFlight::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Set the peer transport used to reach key owners.
    pub fn with_peers(mut self, peers: Arc<dyn PeerFetcher>) -> Self {
        self.peers = peers;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn membership(&self) -> &Arc<MembershipView> {
        &self.membership
    }

    pub fn stats(&self) -> GroupStats {
        self.counters.snapshot()
    }

    /// Resolve `key`, forwarding to its owner when that is another node.
    #[tracing::instrument(skip(self), fields(group = %self.name))]
    pub async fn get(&self, key: &str) -> CacheResult<Loaded> {
        let topology = self.membership.current();
        let owner = topology.owner_of(key);
        if topology.is_self(owner) {
            return self.get_local(key).await;
        }

        Counters::bump(&self.counters.gets);
        match self.fetch_from_peer(owner, key).await {
            Ok(loaded) => Ok(loaded),
            Err(err) if err.is_transport() => {
                warn!(peer = %owner, error = %err, "Owner unreachable, resolving locally");
                Counters::bump(&self.counters.fallbacks);
                self.resolve_local(key).await
            }
            Err(err) => Err(err),
        }
    }

    /// Resolve `key` on this node only, as its owner. Never forwards.
    ///
    /// This is the path the peer protocol server takes, which keeps every
    /// forwarded lookup to a single hop.
    pub async fn get_local(&self, key: &str) -> CacheResult<Loaded> {
        Counters::bump(&self.counters.gets);
        self.resolve_local(key).await
    }

    async fn resolve_local(&self, key: &str) -> CacheResult<Loaded> {
        if let Some(hit) = self.store.get(key)? {
            Counters::bump(&self.counters.local_hits);
            return Ok(hit);
        }

        let store = Arc::clone(&self.store);
        let loader = Arc::clone(&self.loader);
        let counters = Arc::clone(&self.counters);
        let key_owned = key.to_string();
        self.local_flights
            .run(key, move || async move {
                // Another flight may have filled the store since our miss.
                if let Some(hit) = store.get(&key_owned)? {
                    return Ok(hit);
                }

                Counters::bump(&counters.loads);
                let output = match loader.load(&key_owned).await {
                    Ok(output) => output,
                    Err(err) => {
                        Counters::bump(&counters.load_errors);
                        return Err(err);
                    }
                };

                let loaded = Loaded::from_output(output, Utc::now());
                if let Err(err) = store.insert(&key_owned, loaded.clone()) {
                    warn!(key = %key_owned, error = %err, "Loaded value not cached");
                }
                debug!(key = %key_owned, expires_at = %loaded.expires_at(), "Loaded value");
                Ok(loaded)
            })
            .await
    }

    async fn fetch_from_peer(&self, owner: &str, key: &str) -> CacheResult<Loaded> {
        let peers = Arc::clone(&self.peers);
        let counters = Arc::clone(&self.counters);
        let owner_owned = owner.to_string();
        let group = self.name.clone();
        let key_owned = key.to_string();
        self.peer_flights
            .run(key, move || async move {
                Counters::bump(&counters.peer_fetches);
                let result = peers.fetch(&owner_owned, &group, &key_owned).await;
                match result {
                    Ok(loaded) if loaded.is_expired_at(Utc::now()) => {
                        Counters::bump(&counters.peer_errors);
                        Err(CacheError::encoding(
                            key_owned,
                            format!("peer {} returned an already expired value", owner_owned),
                        ))
                    }
                    Ok(loaded) => Ok(loaded),
                    Err(err) => {
                        Counters::bump(&counters.peer_errors);
                        Err(err)
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use futures_util::future::join_all;
    use secrets_core::{LoaderOutput, MembershipSnapshot, DEFAULT_REPLICAS};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    const SELF: &str = "http://10.0.0.1:5000";
    const OTHER: &str = "http://10.0.0.2:5000";

    struct MockLoader {
        calls: AtomicUsize,
        result: Mutex<CacheResult<LoaderOutput>>,
        delay: Duration,
    }

    impl MockLoader {
        fn ok(value: &str) -> Arc<Self> {
            Self::with(Ok(LoaderOutput::new(value, Duration::from_secs(600))), Duration::ZERO)
        }

        fn with(result: CacheResult<LoaderOutput>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result: Mutex::new(result),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set(&self, result: CacheResult<LoaderOutput>) {
            *self.result.lock().expect("mock lock") = result;
        }
    }

    #[async_trait]
    impl Loader for MockLoader {
        async fn load(&self, _key: &str) -> CacheResult<LoaderOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.result.lock().expect("mock lock").clone()
        }
    }

    struct MockPeer {
        calls: AtomicUsize,
        result: CacheResult<Loaded>,
    }

    impl MockPeer {
        fn new(result: CacheResult<Loaded>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result,
            })
        }
    }

    #[async_trait]
    impl PeerFetcher for MockPeer {
        async fn fetch(&self, _peer: &str, _group: &str, _key: &str) -> CacheResult<Loaded> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn single_node() -> Arc<MembershipView> {
        Arc::new(MembershipView::new(
            MembershipSnapshot::single(SELF),
            DEFAULT_REPLICAS,
        ))
    }

    /// Membership where every key is owned by the other node.
    fn owned_elsewhere() -> Arc<MembershipView> {
        Arc::new(MembershipView::new(
            MembershipSnapshot::new(SELF, [OTHER]),
            DEFAULT_REPLICAS,
        ))
    }

    fn group(loader: Arc<MockLoader>, membership: Arc<MembershipView>) -> CacheGroup {
        CacheGroup::new("secrets", 1 << 20, loader, membership)
    }

    #[tokio::test]
    async fn test_miss_loads_then_hit_skips_loader() {
        let loader = MockLoader::ok("s3cr3t");
        let group = group(Arc::clone(&loader), single_node());

        let first = group.get("db-password").await.expect("first get");
        let second = group.get("db-password").await.expect("second get");

        assert_eq!(first.value(), b"s3cr3t");
        assert_eq!(first, second);
        assert_eq!(loader.calls(), 1);

        let stats = group.stats();
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.local_hits, 1);
    }

    #[tokio::test]
    async fn test_loader_error_propagates_and_is_not_cached() {
        let loader = MockLoader::with(
            Err(CacheError::loader("api-key", "AccessDenied")),
            Duration::ZERO,
        );
        let group = group(Arc::clone(&loader), single_node());

        let err = group.get("api-key").await.expect_err("loader failed");
        assert_eq!(err, CacheError::loader("api-key", "AccessDenied"));
        assert!(group.store().get("api-key").expect("store").is_none());

        loader.set(Ok(LoaderOutput::new("recovered", Duration::from_secs(60))));
        let value = group.get("api-key").await.expect("retry");
        assert_eq!(value.value(), b"recovered");
        assert_eq!(loader.calls(), 2);
        assert_eq!(group.stats().load_errors, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_gets_load_once() {
        let loader = MockLoader::with(
            Ok(LoaderOutput::new("s3cr3t", Duration::from_secs(600))),
            Duration::from_millis(100),
        );
        let group = Arc::new(group(Arc::clone(&loader), single_node()));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let group = Arc::clone(&group);
                tokio::spawn(async move { group.get("db-password").await })
            })
            .collect();

        let results: Vec<_> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.expect("task joined").expect("get"))
            .collect();
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(loader.calls(), 1);
    }

    #[tokio::test]
    async fn test_remote_owner_answers() {
        let loader = MockLoader::ok("local");
        let remote = Loaded::new(b"remote".to_vec(), Utc::now() + TimeDelta::seconds(600));
        let peer = MockPeer::new(Ok(remote.clone()));
        let group = group(Arc::clone(&loader), owned_elsewhere()).with_peers(peer.clone());

        let value = group.get("db-password").await.expect("remote get");
        assert_eq!(value, remote);
        assert_eq!(loader.calls(), 0);
        assert_eq!(peer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.stats().peer_fetches, 1);
    }

    #[tokio::test]
    async fn test_unreachable_owner_falls_back_to_local() {
        let loader = MockLoader::ok("s3cr3t");
        let peer = MockPeer::new(Err(CacheError::transport(OTHER, "connection refused")));
        let group = group(Arc::clone(&loader), owned_elsewhere()).with_peers(peer);

        let value = group.get("db-password").await.expect("fallback get");
        assert_eq!(value.value(), b"s3cr3t");
        assert_eq!(loader.calls(), 1);
        // The fallback result is cached here with the loader's ttl.
        assert!(group.store().get("db-password").expect("store").is_some());

        let stats = group.stats();
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.peer_errors, 1);
    }

    #[tokio::test]
    async fn test_rejection_from_owner_is_not_a_fallback() {
        let loader = MockLoader::ok("s3cr3t");
        let rejected = CacheError::PeerRejected {
            peer: OTHER.to_string(),
            key: "db-password".to_string(),
            code: "LOADER_FAILED".to_string(),
            message: "AccessDenied".to_string(),
        };
        let peer = MockPeer::new(Err(rejected.clone()));
        let group = group(Arc::clone(&loader), owned_elsewhere()).with_peers(peer);

        let err = group.get("db-password").await.expect_err("rejected");
        assert_eq!(err, rejected);
        assert_eq!(loader.calls(), 0);
        assert_eq!(group.stats().fallbacks, 0);
    }

    #[tokio::test]
    async fn test_expired_peer_value_is_an_encoding_error() {
        let loader = MockLoader::ok("s3cr3t");
        let stale = Loaded::new(b"old".to_vec(), Utc::now() - TimeDelta::seconds(1));
        let group =
            group(Arc::clone(&loader), owned_elsewhere()).with_peers(MockPeer::new(Ok(stale)));

        let err = group.get("db-password").await.expect_err("stale");
        assert!(matches!(err, CacheError::Encoding { .. }));
    }

    #[tokio::test]
    async fn test_get_local_never_forwards() {
        let loader = MockLoader::ok("s3cr3t");
        let peer = MockPeer::new(Err(CacheError::transport(OTHER, "should not be called")));
        let group = group(Arc::clone(&loader), owned_elsewhere()).with_peers(peer.clone());

        let value = group.get_local("db-password").await.expect("local get");
        assert_eq!(value.value(), b"s3cr3t");
        assert_eq!(peer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_membership_change_applies_to_next_get() {
        let loader = MockLoader::ok("s3cr3t");
        let membership = owned_elsewhere();
        let peer = MockPeer::new(Err(CacheError::transport(OTHER, "connection refused")));
        let group = group(Arc::clone(&loader), Arc::clone(&membership)).with_peers(peer.clone());

        membership.update_peers(Vec::<String>::new());
        group.get("db-password").await.expect("get");
        assert_eq!(peer.calls.load(Ordering::SeqCst), 0);
    }
}
