//! Liveness bookkeeping.
//!
//! Probe results, recent-evidence tracking and the peer-level suspect
//! tally. The async probing itself lives in the node runtime; this module
//! is the pure state so the tally rules are unit-testable.

use gossipnet_core::{NodeId, Verdict};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

/// Record of one suspicion in progress.
#[derive(Clone, Debug)]
pub struct SuspectRecord {
    pub subject: NodeId,
    pub first_suspected_at: Instant,
    pub responses: HashMap<NodeId, Verdict>,
}

impl SuspectRecord {
    pub fn new(subject: NodeId) -> Self {
        Self {
            subject,
            first_suspected_at: Instant::now(),
            responses: HashMap::new(),
        }
    }
}

/// Outcome of a peer-level tally.
#[derive(Clone, Copy, Debug)]
pub struct TallyResult {
    pub confirmed: bool,
    pub dead: usize,
    /// Voters with an opinion: non-UNKNOWN responders plus self.
    pub m: usize,
}

/// Tallies a suspect record. Self counts as one DEAD vote; UNKNOWN
/// responses carry no weight. Confirmed iff `dead > floor(m/2)`.
pub fn tally(record: &SuspectRecord) -> TallyResult {
    let opinions = record
        .responses
        .values()
        .filter(|v| **v != Verdict::Unknown)
        .count();
    let dead = 1 + record
        .responses
        .values()
        .filter(|v| **v == Verdict::Dead)
        .count();
    let m = 1 + opinions;
    TallyResult {
        confirmed: dead > m / 2,
        dead,
        m,
    }
}

/// Per-neighbor probe state.
pub struct LivenessDetector {
    miss_threshold: u32,
    alive_window: Duration,
    misses: Mutex<HashMap<NodeId, u32>>,
    last_seen: Mutex<HashMap<NodeId, Instant>>,
    /// Subjects with an active or completed suspicion, so one suspicion
    /// runs per failure episode.
    suspected: Mutex<HashSet<NodeId>>,
}

impl LivenessDetector {
    pub fn new(miss_threshold: u32, alive_window: Duration) -> Self {
        Self {
            miss_threshold,
            alive_window,
            misses: Mutex::new(HashMap::new()),
            last_seen: Mutex::new(HashMap::new()),
            suspected: Mutex::new(HashSet::new()),
        }
    }

    /// Positive evidence: a PONG or a gossip receipt from `peer`.
    pub fn record_alive(&self, peer: &NodeId) {
        self.last_seen.lock().insert(peer.clone(), Instant::now());
        self.misses.lock().remove(peer);
        self.suspected.lock().remove(peer);
    }

    /// One missed probe. Returns the consecutive-miss count.
    pub fn record_miss(&self, peer: &NodeId) -> u32 {
        let mut misses = self.misses.lock();
        let count = misses.entry(peer.clone()).or_insert(0);
        *count += 1;
        *count
    }

    /// Neighbors whose miss count crossed the threshold and which are not
    /// already under suspicion. Marks them suspected.
    pub fn ripe_suspects(&self) -> Vec<NodeId> {
        let misses = self.misses.lock();
        let mut suspected = self.suspected.lock();
        let mut ripe = Vec::new();
        for (peer, count) in misses.iter() {
            if *count >= self.miss_threshold && !suspected.contains(peer) {
                suspected.insert(peer.clone());
                ripe.push(peer.clone());
            }
        }
        ripe
    }

    /// This node's own evidence about `subject`, for answering a
    /// SUSPECT_QUERY: ALIVE on recent positive evidence, DEAD on its own
    /// consecutive misses, UNKNOWN otherwise.
    pub fn verdict_on(&self, subject: &NodeId) -> Verdict {
        if let Some(at) = self.last_seen.lock().get(subject) {
            if at.elapsed() < self.alive_window {
                return Verdict::Alive;
            }
        }
        match self.misses.lock().get(subject) {
            Some(count) if *count >= self.miss_threshold => Verdict::Dead,
            _ => Verdict::Unknown,
        }
    }

    /// Peer-level consensus said the subject is alive after all.
    pub fn cancel_suspicion(&self, peer: &NodeId) {
        self.suspected.lock().remove(peer);
        self.misses.lock().remove(peer);
    }

    /// Forget a peer entirely (it left the neighbor set).
    pub fn forget(&self, peer: &NodeId) {
        self.misses.lock().remove(peer);
        self.last_seen.lock().remove(peer);
        self.suspected.lock().remove(peer);
    }
}
