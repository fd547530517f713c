//! Peer node: the data plane of the gossipnet overlay.
//!
//! Peers register with the seed cluster, build a power-law overlay from the
//! authoritative peer list, disseminate gossip with content-hash
//! deduplication, and watch their neighbors for failures.
//!
//! # Modules
//!
//! - `overlay` - Zipf-weighted neighbor selection
//! - `gossip` - capped generation, dedup and forwarding decisions
//! - `liveness` - probe bookkeeping, suspicion and peer-level tallies
//! - `node` - peer runtime wiring the workers together

pub mod gossip;
pub mod liveness;
pub mod node;
pub mod overlay;

pub use gossip::*;
pub use liveness::*;
pub use node::*;
pub use overlay::*;
