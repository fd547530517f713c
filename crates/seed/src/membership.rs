//! Membership store.
//!
//! The set of peers currently considered alive, as replicated across the
//! seed cluster. Mutations happen only from the consensus commit path, from
//! a REMOVAL_NOTIFY issued by a committing seed, or from the sync merge of
//! committed members. Readers take consistent snapshots.

use chrono::{DateTime, Utc};
use gossipnet_core::NodeId;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// A peer admitted by consensus, with insertion metadata.
#[derive(Clone, Debug)]
pub struct MemberRecord {
    pub peer: NodeId,
    pub joined: DateTime<Utc>,
}

/// Peer set held by each seed.
#[derive(Default)]
pub struct MembershipStore {
    inner: RwLock<BTreeMap<NodeId, MemberRecord>>,
}

impl MembershipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer. Returns false if it was already a member.
    pub fn insert(&self, peer: NodeId) -> bool {
        let mut inner = self.inner.write();
        if inner.contains_key(&peer) {
            return false;
        }
        inner.insert(
            peer.clone(),
            MemberRecord {
                peer,
                joined: Utc::now(),
            },
        );
        true
    }

    /// Removes a peer. Returns false if it was not a member.
    pub fn remove(&self, peer: &NodeId) -> bool {
        self.inner.write().remove(peer).is_some()
    }

    pub fn contains(&self, peer: &NodeId) -> bool {
        self.inner.read().contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Consistent snapshot of the member identities, in canonical order.
    pub fn snapshot(&self) -> Vec<NodeId> {
        self.inner.read().keys().cloned().collect()
    }

    /// Unions `remote` (committed members observed at another seed) into
    /// this set. Returns the peers that were actually new here.
    pub fn merge(&self, remote: &[NodeId]) -> Vec<NodeId> {
        let mut inner = self.inner.write();
        let mut added = Vec::new();
        for peer in remote {
            if !inner.contains_key(peer) {
                inner.insert(
                    peer.clone(),
                    MemberRecord {
                        peer: peer.clone(),
                        joined: Utc::now(),
                    },
                );
                added.push(peer.clone());
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> NodeId {
        NodeId::new("127.0.0.1", port)
    }

    #[test]
    fn insert_is_idempotent_on_the_set() {
        let store = MembershipStore::new();
        assert!(store.insert(peer(7000)));
        assert!(!store.insert(peer(7000)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_of_absent_peer_is_a_noop() {
        let store = MembershipStore::new();
        store.insert(peer(7000));
        assert!(!store.remove(&peer(7001)));
        assert!(store.remove(&peer(7000)));
        assert!(store.is_empty());
    }

    #[test]
    fn snapshot_is_ordered_and_detached() {
        let store = MembershipStore::new();
        store.insert(peer(7002));
        store.insert(peer(7000));
        let snap = store.snapshot();
        assert_eq!(snap, vec![peer(7000), peer(7002)]);
        store.remove(&peer(7000));
        // The snapshot we took does not tear.
        assert_eq!(snap.len(), 2);
    }

    #[test]
    fn merge_adds_only_unknown_members() {
        let store = MembershipStore::new();
        store.insert(peer(7000));
        let added = store.merge(&[peer(7000), peer(7001)]);
        assert_eq!(added, vec![peer(7001)]);
        assert_eq!(store.len(), 2);
    }
}
