//! Core types and wire protocol for the gossipnet overlay network.
//!
//! Shared between seed nodes (membership authority) and peer nodes
//! (gossip data plane):
//!
//! - `types` - node identity
//! - `message` - typed wire messages
//! - `codec` - newline-delimited JSON framing
//! - `directory` - immutable seed directory loaded at startup
//! - `net` - short-lived TCP send / request helpers
//! - `eventlog` - append-only structured event log
//! - `constants` - protocol timing and limits

pub mod codec;
pub mod constants;
pub mod directory;
pub mod error;
pub mod eventlog;
pub mod message;
pub mod net;
pub mod types;

pub use codec::*;
pub use constants::*;
pub use directory::*;
pub use error::*;
pub use eventlog::*;
pub use message::*;
pub use types::*;
