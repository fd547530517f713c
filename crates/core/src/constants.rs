//! Protocol timing and limits.
//!
//! These are the network-wide defaults; nodes accept overrides through their
//! config structs so tests can run on compressed timescales.

use std::time::Duration;

/// Hard cap on gossip messages generated per peer over its lifetime.
pub const MAX_GOSSIP_MESSAGES: u32 = 10;

/// Interval between generated gossip messages.
pub const GOSSIP_INTERVAL: Duration = Duration::from_secs(5);

/// Interval between liveness probes of each neighbor.
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

/// How long to wait for a PONG before counting a miss.
pub const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Consecutive probe misses before a neighbor becomes a suspect.
pub const MISS_THRESHOLD: u32 = 3;

/// Deadline for collecting seed votes on a proposal.
pub const PROPOSAL_TIMEOUT: Duration = Duration::from_secs(3);

/// Interval between membership sync rounds across the seed cluster.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Default timeout applied to TCP connect / read / write operations.
pub const NET_TIMEOUT: Duration = Duration::from_secs(2);

/// Idle timeout after which an accepted connection is closed.
pub const CONN_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Sanity ceiling on a single wire frame; connections exceeding it are dropped.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Zipf exponent for overlay neighbor selection.
pub const ZIPF_ALPHA: f64 = 1.0;

/// Window within which a PONG or gossip receipt counts as evidence of life.
pub const ALIVE_WINDOW: Duration = Duration::from_secs(10);

/// Window within which duplicate consensus-outcome log lines for the same
/// `(kind, subject)` are suppressed.
pub const OUTCOME_DEDUP_WINDOW: Duration = Duration::from_secs(5);
