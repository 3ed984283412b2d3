//! Peer discovery hook.
//!
//! Whatever watches the orchestrator (the kubegroup sidecar, a static
//! `GROUPCACHE_PEERS` list, an operator with curl) delivers the full peer set
//! here. Each delivery publishes a new topology in one swap; lookups already
//! in flight finish against the topology they started with.

use std::collections::BTreeSet;
use std::sync::Arc;

use secrets_core::{normalize_endpoint, MembershipView, Topology};
use serde::{Deserialize, Serialize};

/// Body of the membership hook and of its GET response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerUpdate {
    pub peers: Vec<String>,
}

/// Publish `peers` as the new peer set.
///
/// A non-empty set always includes this node, so a discovery source that only
/// lists the *other* pods cannot strip self of its share of the key space. An
/// empty set leaves this node owning every key.
pub fn apply_peer_update<I, S>(view: &MembershipView, peers: I) -> Arc<Topology>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let previous = view.current();
    let mut next: BTreeSet<String> = peers
        .into_iter()
        .map(|p| normalize_endpoint(p.as_ref()))
        .filter(|p| !p.is_empty())
        .collect();
    if !next.is_empty() {
        next.insert(previous.snapshot().self_endpoint().to_string());
    }

    let added: Vec<&String> = next.difference(previous.snapshot().peers()).collect();
    let removed: Vec<&String> = previous.snapshot().peers().difference(&next).collect();
    if !added.is_empty() || !removed.is_empty() {
        tracing::info!(?added, ?removed, peers = next.len(), "Peer set changed");
    }

    let topology = view.update_peers(&next);
    tracing::debug!(generation = topology.generation(), "Topology published");
    topology
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrets_core::{MembershipSnapshot, DEFAULT_REPLICAS};

    const SELF: &str = "http://10.0.0.1:5000";

    fn view() -> MembershipView {
        MembershipView::new(MembershipSnapshot::single(SELF), DEFAULT_REPLICAS)
    }

    #[test]
    fn test_update_adds_self() {
        let view = view();
        let topology = apply_peer_update(&view, ["http://10.0.0.2:5000/", "http://10.0.0.3:5000"]);

        let peers: Vec<&str> = topology.snapshot().peers().iter().map(String::as_str).collect();
        assert_eq!(
            peers,
            vec!["http://10.0.0.1:5000", "http://10.0.0.2:5000", "http://10.0.0.3:5000"]
        );
        assert_eq!(topology.generation(), 1);
    }

    #[test]
    fn test_empty_update_makes_self_owner_of_everything() {
        let view = view();
        apply_peer_update(&view, ["http://10.0.0.2:5000"]);
        let topology = apply_peer_update(&view, Vec::<String>::new());

        assert!(topology.snapshot().peers().is_empty());
        for key in ["a", "b", "db-password"] {
            assert!(topology.is_self(topology.owner_of(key)));
        }
    }

    #[test]
    fn test_blank_entries_ignored() {
        let view = view();
        let topology = apply_peer_update(&view, ["", "  "]);
        assert!(topology.snapshot().peers().is_empty());
    }
}
