//! Collaborator traits used by cache groups.
//!
//! These traits abstract over where values come from, allowing the group to
//! work with any backing store and any peer transport.

use async_trait::async_trait;
use secrets_core::{CacheError, CacheResult, Loaded, LoaderOutput};

/// Backing source consulted on a miss at the owning node.
///
/// # Implementation Requirements
///
/// - May be slow and may fail; the group never retries a failed load
/// - The returned ttl decides how long the value stays in the local store
/// - Implementations must be `Send + Sync` so one loader serves every request
#[async_trait]
pub trait Loader: Send + Sync {
    /// Load the value for `key` from the backing source.
    async fn load(&self, key: &str) -> CacheResult<LoaderOutput>;
}

/// Client side of the peer protocol.
///
/// Errors must keep transport failures ([`CacheError::PeerTransport`]) apart
/// from errors the owner reported, since only the former let the caller fall
/// back to loading locally.
#[async_trait]
pub trait PeerFetcher: Send + Sync {
    /// Ask `peer` for the value of `key` in `group`.
    async fn fetch(&self, peer: &str, group: &str, key: &str) -> CacheResult<Loaded>;
}

/// Peer fetcher for a node that has no peer transport wired in.
///
/// Every fetch fails as unreachable, which makes the group resolve locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPeers;

#[async_trait]
impl PeerFetcher for NoPeers {
    async fn fetch(&self, peer: &str, _group: &str, _key: &str) -> CacheResult<Loaded> {
        Err(CacheError::transport(peer, "no peer transport configured"))
    }
}
