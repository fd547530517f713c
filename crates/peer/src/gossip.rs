//! Gossip engine.
//!
//! Generation is capped: each peer emits at most `MAX_GOSSIP_MESSAGES`
//! messages over its lifetime, one per interval, then stops permanently.
//! Reception deduplicates by content hash; a peer forwards a given hash at
//! most once per neighbor link because only the first receipt forwards.

use chrono::Utc;
use gossipnet_core::{gossip_hash, gossip_msg_id, Message, NodeId};
use parking_lot::Mutex;
use std::collections::HashSet;

/// What to do with an incoming gossip frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GossipDisposition {
    /// Hash does not match the content: drop, log at WARNING.
    Invalid,
    /// Already seen: drop silently.
    Duplicate,
    /// First receipt: record, log and forward.
    Fresh,
}

/// One generated gossip message, ready to send.
pub struct GeneratedGossip {
    pub seq: u32,
    pub msg_id: String,
    pub message: Message,
}

/// Per-peer gossip state: the generation counter and the seen-hash set.
pub struct GossipEngine {
    origin: NodeId,
    max_messages: u32,
    seq: Mutex<u32>,
    seen: Mutex<HashSet<String>>,
}

impl GossipEngine {
    pub fn new(origin: NodeId, max_messages: u32) -> Self {
        Self {
            origin,
            max_messages,
            seq: Mutex::new(0),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Produces the next outbound message, or `None` once the lifetime cap
    /// is reached. The message's own hash enters the seen set so a copy
    /// echoed back by a neighbor is not re-forwarded.
    pub fn next_message(&self) -> Option<GeneratedGossip> {
        let seq = {
            let mut seq = self.seq.lock();
            if *seq >= self.max_messages {
                return None;
            }
            *seq += 1;
            *seq
        };
        let msg_id = gossip_msg_id(Utc::now().timestamp_millis(), &self.origin, seq);
        let hash = gossip_hash(&msg_id, None);
        self.seen.lock().insert(hash.clone());
        Some(GeneratedGossip {
            seq,
            msg_id: msg_id.clone(),
            message: Message::Gossip {
                msg_id,
                body: None,
                hash,
                sender: Some(self.origin.clone()),
            },
        })
    }

    /// Classifies an incoming frame: hash validation first, then dedup.
    /// A fresh hash is recorded before this returns, so racing duplicates
    /// collapse to a single `Fresh`.
    pub fn observe(&self, msg_id: &str, body: Option<&str>, hash: &str) -> GossipDisposition {
        if gossip_hash(msg_id, body) != hash {
            return GossipDisposition::Invalid;
        }
        if self.seen.lock().insert(hash.to_string()) {
            GossipDisposition::Fresh
        } else {
            GossipDisposition::Duplicate
        }
    }

    /// Re-frames an incoming gossip for forwarding, with self as sender.
    pub fn forward_frame(&self, msg_id: String, body: Option<String>, hash: String) -> Message {
        Message::Gossip {
            msg_id,
            body,
            hash,
            sender: Some(self.origin.clone()),
        }
    }

    /// Messages generated so far (never exceeds the cap).
    pub fn generated(&self) -> u32 {
        *self.seq.lock()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> GossipEngine {
        GossipEngine::new(NodeId::new("127.0.0.1", 7000), 10)
    }

    #[test]
    fn generation_stops_at_the_cap() {
        let g = engine();
        let mut ids = Vec::new();
        while let Some(out) = g.next_message() {
            ids.push((out.seq, out.msg_id));
        }
        assert_eq!(ids.len(), 10);
        assert_eq!(ids[0].0, 1);
        assert_eq!(ids[9].0, 10);
        // Permanently stopped.
        assert!(g.next_message().is_none());
        assert_eq!(g.generated(), 10);
    }

    #[test]
    fn msg_id_has_required_shape() {
        let g = engine();
        let out = g.next_message().unwrap();
        let parts: Vec<&str> = out.msg_id.split(':').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1], "127.0.0.1");
        assert_eq!(parts[2], "7000");
        assert_eq!(parts[3], "1");
    }

    #[test]
    fn first_receipt_is_fresh_then_duplicate() {
        let g = engine();
        let id = "1:10.0.0.1:7001:1";
        let hash = gossip_hash(id, None);
        assert_eq!(g.observe(id, None, &hash), GossipDisposition::Fresh);
        assert_eq!(g.observe(id, None, &hash), GossipDisposition::Duplicate);
        assert_eq!(g.seen_count(), 1);
    }

    #[test]
    fn hash_mismatch_is_invalid_and_not_recorded() {
        let g = engine();
        let id = "1:10.0.0.1:7001:1";
        assert_eq!(
            g.observe(id, None, "deadbeef"),
            GossipDisposition::Invalid
        );
        // Bad frames leave no trace; the real message still gets through.
        let hash = gossip_hash(id, None);
        assert_eq!(g.observe(id, None, &hash), GossipDisposition::Fresh);
    }

    #[test]
    fn own_messages_are_not_reforwarded_when_echoed() {
        let g = engine();
        let out = g.next_message().unwrap();
        let (msg_id, hash) = match out.message {
            Message::Gossip { msg_id, hash, .. } => (msg_id, hash),
            _ => unreachable!(),
        };
        assert_eq!(
            g.observe(&msg_id, None, &hash),
            GossipDisposition::Duplicate
        );
    }

    #[test]
    fn body_participates_in_the_hash() {
        let g = engine();
        let id = "1:10.0.0.1:7001:2";
        let hash = gossip_hash(id, Some("hello"));
        assert_eq!(
            g.observe(id, Some("tampered"), &hash),
            GossipDisposition::Invalid
        );
        assert_eq!(
            g.observe(id, Some("hello"), &hash),
            GossipDisposition::Fresh
        );
    }
}
