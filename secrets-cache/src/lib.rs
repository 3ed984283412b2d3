//! Secrets Cache - Distributed Read-Through Cache
//!
//! Building blocks for resolving a key once per cluster:
//!
//! - [`LocalStore`]: byte-bounded in-memory store with per-entry expiry
//! - [`SingleFlight`]: coalesces concurrent loads of the same key
//! - [`CacheGroup`]: decides ownership and resolves locally or via a peer
//! - [`Loader`] / [`PeerFetcher`]: seams for the backing source and transport

pub mod flight;
pub mod group;
pub mod store;
pub mod traits;

pub use flight::SingleFlight;
pub use group::{CacheGroup, GroupStats};
pub use store::{LocalStore, StoreStats};
pub use traits::{Loader, NoPeers, PeerFetcher};
