//! Secrets Test Utilities
//!
//! Shared test infrastructure for the secrets workspace:
//! - Mock loaders and peer fetchers with call counters
//! - Proptest generators for keys, values and peer endpoints
//! - Fixtures for cache groups and throwaway HTTP servers
//! - Assertions over store invariants

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use secrets_cache::{Loader, PeerFetcher};
use secrets_core::{CacheError, CacheResult, Loaded, LoaderOutput};

// Re-export core types for convenience
pub use secrets_cache::{CacheGroup, LocalStore, NoPeers};
pub use secrets_core::{MembershipSnapshot, MembershipView, DEFAULT_REPLICAS};

// ============================================================================
// MOCK LOADERS
// ============================================================================

/// Loader returning a fixed value, counting every call.
///
/// Can be slowed down to widen single-flight windows and switched into a
/// failing mode between calls.
#[derive(Debug)]
pub struct CountingLoader {
    value: Vec<u8>,
    ttl: Duration,
    delay: Duration,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl CountingLoader {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: value.into(),
            ttl: Duration::from_secs(600),
            delay: Duration::ZERO,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Loader serving the secret-mode document for `secret_value`.
    pub fn secret(secret_value: &str) -> Self {
        Self::new(fixtures::secret_document(secret_value))
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Loader for CountingLoader {
    async fn load(&self, key: &str) -> CacheResult<LoaderOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::loader(key, "AccessDeniedException: not authorized"));
        }
        Ok(LoaderOutput::new(self.value.clone(), self.ttl))
    }
}

/// Loader that always fails with `reason`.
#[derive(Debug)]
pub struct FailingLoader {
    reason: String,
    calls: AtomicUsize,
}

impl FailingLoader {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Loader for FailingLoader {
    async fn load(&self, key: &str) -> CacheResult<LoaderOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::loader(key, &self.reason))
    }
}

// ============================================================================
// MOCK PEERS
// ============================================================================

/// Peer answering every fetch with the same value.
#[derive(Debug)]
pub struct StaticPeer {
    value: Vec<u8>,
    ttl: Duration,
    calls: AtomicUsize,
}

impl StaticPeer {
    pub fn new(value: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            ttl,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerFetcher for StaticPeer {
    async fn fetch(&self, _peer: &str, _group: &str, _key: &str) -> CacheResult<Loaded> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Loaded::from_output(
            LoaderOutput::new(self.value.clone(), self.ttl),
            Utc::now(),
        ))
    }
}

/// Peer that can never be reached.
#[derive(Debug, Default)]
pub struct UnreachablePeer {
    calls: AtomicUsize,
}

impl UnreachablePeer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerFetcher for UnreachablePeer {
    async fn fetch(&self, peer: &str, _group: &str, _key: &str) -> CacheResult<Loaded> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::transport(peer, "connection refused"))
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache inputs.

    use proptest::prelude::*;

    /// Secret names as clients send them.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,23}"
    }

    /// Peer endpoint in a pod network.
    pub fn arb_endpoint() -> impl Strategy<Value = String> {
        (1u8..=250, 5000u16..5010).prop_map(|(host, port)| format!("http://10.0.0.{}:{}", host, port))
    }

    /// A peer set of 1 to 8 distinct endpoints.
    pub fn arb_peer_set() -> impl Strategy<Value = Vec<String>> {
        proptest::collection::btree_set(arb_endpoint(), 1..8)
            .prop_map(|set| set.into_iter().collect())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built groups, documents and servers for common scenarios.

    use std::net::SocketAddr;

    use super::*;

    pub const SELF_ENDPOINT: &str = "http://127.0.0.1:5000";

    /// The cached secret-mode document for `secret_value`.
    pub fn secret_document(secret_value: &str) -> Vec<u8> {
        serde_json::json!({ "secret_value": secret_value }).to_string().into_bytes()
    }

    /// Membership of a node that is alone in the cluster.
    pub fn single_node() -> Arc<MembershipView> {
        Arc::new(MembershipView::new(
            MembershipSnapshot::single(SELF_ENDPOINT),
            DEFAULT_REPLICAS,
        ))
    }

    /// A group owning every key, backed by `loader`.
    pub fn local_group(loader: Arc<dyn Loader>) -> Arc<CacheGroup> {
        Arc::new(CacheGroup::new("secrets", 1_000_000, loader, single_node()))
    }

    /// Serve `router` on an ephemeral localhost port until the runtime stops.
    pub async fn spawn_server(router: axum::Router) -> std::io::Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        serve_on(listener, router)
    }

    /// Serve `router` on a listener bound earlier, for nodes that must know
    /// their own address before their router exists.
    pub fn serve_on(
        listener: tokio::net::TcpListener,
        router: axum::Router,
    ) -> std::io::Result<SocketAddr> {
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });
        Ok(addr)
    }

    /// An address nothing listens on.
    pub fn unused_addr() -> std::io::Result<SocketAddr> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        listener.local_addr()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over cache invariants.

    use super::*;

    /// The store never charges more than its budget and its stats agree with
    /// its key index.
    pub fn assert_store_consistent(store: &LocalStore) {
        let stats = store.stats().expect("store stats");
        let keys = store.keys_oldest_first().expect("store keys");
        assert!(
            stats.bytes <= stats.max_bytes,
            "store holds {} bytes over a {} byte budget",
            stats.bytes,
            stats.max_bytes
        );
        assert_eq!(stats.items as usize, keys.len(), "item count disagrees with key index");
    }
}
