//! Wire messages for seed-seed, seed-peer and peer-peer communication.
//!
//! Every message is a JSON object with a `type` discriminant, newline
//! terminated on the wire (see [`crate::codec`]).

use crate::types::NodeId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// A vote cast by a seed on a membership proposal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteChoice {
    Yes,
    No,
}

impl VoteChoice {
    pub fn is_yes(self) -> bool {
        matches!(self, VoteChoice::Yes)
    }

    pub fn from_bool(yes: bool) -> Self {
        if yes {
            VoteChoice::Yes
        } else {
            VoteChoice::No
        }
    }
}

/// A neighbor's opinion about a suspected peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Alive,
    Dead,
    Unknown,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Alive => "ALIVE",
            Verdict::Dead => "DEAD",
            Verdict::Unknown => "UNKNOWN",
        })
    }
}

/// All wire message types.
///
/// `members` arrays and `peer` fields carry `{host, port}` objects. Optional
/// fields are omitted from the encoded form when absent, so payloads carrying
/// only the required fields parse unchanged.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    // Peer -> seed
    RegisterRequest {
        peer: NodeId,
    },
    GetPeerList,
    DeadNodeReport {
        subject: NodeId,
        reporter: NodeId,
        timestamp: f64,
        body: String,
    },

    // Seed -> peer
    RegisterAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    RegisterNack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    PeerList {
        members: Vec<NodeId>,
        /// Identity of the responding seed, so peers can attribute lists.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<NodeId>,
    },

    // Seed <-> seed consensus
    ProposeRegister {
        proposal_id: Uuid,
        peer: NodeId,
        originator: NodeId,
    },
    ProposeRemove {
        proposal_id: Uuid,
        peer: NodeId,
        originator: NodeId,
    },
    Vote {
        proposal_id: Uuid,
        vote: VoteChoice,
        voter: NodeId,
    },
    RemovalNotify {
        peer: NodeId,
    },
    SyncMembership {
        members: Vec<NodeId>,
    },

    // Peer <-> peer
    Gossip {
        msg_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        hash: String,
        /// Identity of the forwarding peer; excluded from re-forwarding.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<NodeId>,
    },
    Ping,
    Pong,
    SuspectQuery {
        subject: NodeId,
    },
    SuspectResponse {
        subject: NodeId,
        verdict: Verdict,
    },
}

impl Message {
    /// Message type name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::RegisterRequest { .. } => "REGISTER_REQUEST",
            Message::GetPeerList => "GET_PEER_LIST",
            Message::DeadNodeReport { .. } => "DEAD_NODE_REPORT",
            Message::RegisterAck { .. } => "REGISTER_ACK",
            Message::RegisterNack { .. } => "REGISTER_NACK",
            Message::PeerList { .. } => "PEER_LIST",
            Message::ProposeRegister { .. } => "PROPOSE_REGISTER",
            Message::ProposeRemove { .. } => "PROPOSE_REMOVE",
            Message::Vote { .. } => "VOTE",
            Message::RemovalNotify { .. } => "REMOVAL_NOTIFY",
            Message::SyncMembership { .. } => "SYNC_MEMBERSHIP",
            Message::Gossip { .. } => "GOSSIP",
            Message::Ping => "PING",
            Message::Pong => "PONG",
            Message::SuspectQuery { .. } => "SUSPECT_QUERY",
            Message::SuspectResponse { .. } => "SUSPECT_RESPONSE",
        }
    }

    /// Every `type` string this protocol defines. Used by the codec to
    /// distinguish an unknown type (ignored) from a known type with a bad
    /// payload (warned about).
    pub const KNOWN_TYPES: &'static [&'static str] = &[
        "REGISTER_REQUEST",
        "GET_PEER_LIST",
        "DEAD_NODE_REPORT",
        "REGISTER_ACK",
        "REGISTER_NACK",
        "PEER_LIST",
        "PROPOSE_REGISTER",
        "PROPOSE_REMOVE",
        "VOTE",
        "REMOVAL_NOTIFY",
        "SYNC_MEMBERSHIP",
        "GOSSIP",
        "PING",
        "PONG",
        "SUSPECT_QUERY",
        "SUSPECT_RESPONSE",
    ];
}

/// Builds a gossip message id: `<ts>:<origin_host>:<origin_port>:<seq>`.
pub fn gossip_msg_id(ts_millis: i64, origin: &NodeId, seq: u32) -> String {
    format!("{}:{}:{}:{}", ts_millis, origin.host, origin.port, seq)
}

/// SHA-256 of `msg_id` concatenated with the optional body, hex encoded.
pub fn gossip_hash(msg_id: &str, body: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(msg_id.as_bytes());
    if let Some(body) = body {
        hasher.update(body.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Canonical dead-node report body:
/// `Dead Node:<host>:<port>:<ts>:<reporter-host>`.
pub fn dead_node_body(subject: &NodeId, ts: f64, reporter_host: &str) -> String {
    format!(
        "Dead Node:{}:{}:{}:{}",
        subject.host, subject.port, ts, reporter_host
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tags_match_wire_names() {
        let msg = Message::RegisterRequest {
            peer: NodeId::new("127.0.0.1", 7000),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "REGISTER_REQUEST");
        assert_eq!(json["peer"]["host"], "127.0.0.1");
        assert_eq!(json["peer"]["port"], 7000);

        let json = serde_json::to_value(Message::Ping).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "PING" }));
    }

    #[test]
    fn vote_round_trips() {
        let msg = Message::Vote {
            proposal_id: Uuid::new_v4(),
            vote: VoteChoice::No,
            voter: NodeId::new("127.0.0.1", 6001),
        };
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains("\"vote\":\"NO\""));
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        match decoded {
            Message::Vote { vote, voter, .. } => {
                assert_eq!(vote, VoteChoice::No);
                assert_eq!(voter.port, 6001);
            }
            other => panic!("decoded wrong variant: {}", other.type_name()),
        }
    }

    #[test]
    fn minimal_gossip_parses_without_optional_fields() {
        // A GOSSIP frame carrying only the required fields.
        let raw = r#"{"type":"GOSSIP","msg_id":"1:127.0.0.1:7000:1","hash":"aa"}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        match msg {
            Message::Gossip { body, sender, .. } => {
                assert!(body.is_none());
                assert!(sender.is_none());
            }
            other => panic!("decoded wrong variant: {}", other.type_name()),
        }
    }

    #[test]
    fn gossip_hash_covers_id_and_body() {
        let id = gossip_msg_id(1700000000000, &NodeId::new("127.0.0.1", 7000), 1);
        assert_eq!(id, "1700000000000:127.0.0.1:7000:1");
        let without = gossip_hash(&id, None);
        let with = gossip_hash(&id, Some("payload"));
        assert_ne!(without, with);
        assert_eq!(without.len(), 64);
        // Absent body hashes identically to the empty body.
        assert_eq!(without, gossip_hash(&id, Some("")));
    }

    #[test]
    fn dead_node_body_format() {
        let subject = NodeId::new("127.0.0.1", 7004);
        let body = dead_node_body(&subject, 1700000000.5, "127.0.0.1");
        assert_eq!(body, "Dead Node:127.0.0.1:7004:1700000000.5:127.0.0.1");
    }

    #[test]
    fn known_types_covers_every_variant() {
        for name in Message::KNOWN_TYPES {
            assert!(!name.is_empty());
        }
        assert_eq!(Message::KNOWN_TYPES.len(), 16);
    }
}
