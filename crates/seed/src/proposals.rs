//! Proposal table and vote tallying.
//!
//! A proposal is the transient record a seed keeps while it collects votes
//! on a membership change. State moves PENDING -> APPROVED or REJECTED
//! exactly once; decided proposals are dropped from the table and late
//! votes for them are discarded.

use gossipnet_core::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// What a proposal asks the cluster to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProposalKind {
    Register,
    Remove,
}

impl fmt::Display for ProposalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProposalKind::Register => "register",
            ProposalKind::Remove => "remove",
        })
    }
}

/// One pending membership proposal.
#[derive(Clone, Debug)]
pub struct Proposal {
    pub id: Uuid,
    pub kind: ProposalKind,
    pub subject: NodeId,
    pub originator: NodeId,
    /// Votes received so far, the originator's self-vote included.
    pub votes: HashMap<NodeId, bool>,
    pub created_at: Instant,
}

impl Proposal {
    fn new(kind: ProposalKind, subject: NodeId, originator: NodeId) -> Self {
        let mut votes = HashMap::new();
        // The originator self-votes YES: for REGISTER it accepts the
        // request, for REMOVE it trusts its reporter.
        votes.insert(originator.clone(), true);
        Self {
            id: Uuid::new_v4(),
            kind,
            subject,
            originator,
            votes,
            created_at: Instant::now(),
        }
    }

    pub fn yes_count(&self) -> usize {
        self.votes.values().filter(|v| **v).count()
    }

    pub fn no_count(&self) -> usize {
        self.votes.values().filter(|v| !**v).count()
    }
}

/// Terminal result of a proposal.
#[derive(Clone, Debug)]
pub enum ProposalOutcome {
    Approved(Proposal),
    Rejected { proposal: Proposal, reason: String },
}

impl ProposalOutcome {
    pub fn proposal(&self) -> &Proposal {
        match self {
            ProposalOutcome::Approved(p) => p,
            ProposalOutcome::Rejected { proposal, .. } => proposal,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, ProposalOutcome::Approved(_))
    }
}

/// Pending proposals keyed by id, with quorum arithmetic.
pub struct ProposalTable {
    rounds: RwLock<HashMap<Uuid, Proposal>>,
    total_seeds: usize,
    quorum: usize,
    deadline: Duration,
}

impl ProposalTable {
    pub fn new(total_seeds: usize, quorum: usize, deadline: Duration) -> Self {
        Self {
            rounds: RwLock::new(HashMap::new()),
            total_seeds,
            quorum,
            deadline,
        }
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Opens a proposal with the originator's self-vote recorded.
    ///
    /// The outcome is decided immediately when the self-vote alone settles
    /// it (a single-seed cluster has quorum 1); such proposals never enter
    /// the table.
    pub fn start(
        &self,
        kind: ProposalKind,
        subject: NodeId,
        originator: NodeId,
    ) -> (Uuid, Option<ProposalOutcome>) {
        let proposal = Proposal::new(kind, subject, originator);
        let id = proposal.id;
        if let Some(outcome) = self.evaluate(&proposal) {
            return (id, Some(outcome));
        }
        self.rounds.write().insert(id, proposal);
        (id, None)
    }

    /// Records one vote. Returns the outcome when this vote settles the
    /// proposal; `None` for an unknown (or already decided) proposal id,
    /// per the discard rule.
    pub fn record_vote(&self, id: Uuid, voter: NodeId, yes: bool) -> Option<ProposalOutcome> {
        let mut rounds = self.rounds.write();
        let proposal = rounds.get_mut(&id)?;
        proposal.votes.insert(voter, yes);
        let outcome = self.evaluate(proposal);
        if outcome.is_some() {
            rounds.remove(&id);
        }
        outcome
    }

    /// Rejects a still-pending proposal whose deadline passed.
    pub fn expire(&self, id: Uuid) -> Option<ProposalOutcome> {
        let proposal = self.rounds.write().remove(&id)?;
        Some(ProposalOutcome::Rejected {
            proposal,
            reason: "vote deadline elapsed".into(),
        })
    }

    /// Sweeps every pending proposal past its deadline.
    pub fn check_timeouts(&self) -> Vec<ProposalOutcome> {
        let expired: Vec<Uuid> = {
            let rounds = self.rounds.read();
            rounds
                .iter()
                .filter(|(_, p)| p.created_at.elapsed() > self.deadline)
                .map(|(id, _)| *id)
                .collect()
        };
        expired.into_iter().filter_map(|id| self.expire(id)).collect()
    }

    pub fn is_pending(&self, id: Uuid) -> bool {
        self.rounds.read().contains_key(&id)
    }

    /// Id of a pending proposal with the same `(kind, subject)`, if any.
    /// Duplicates are treated as a repeat of the original request.
    pub fn pending_for(&self, kind: ProposalKind, subject: &NodeId) -> Option<Uuid> {
        self.rounds
            .read()
            .values()
            .find(|p| p.kind == kind && &p.subject == subject)
            .map(|p| p.id)
    }

    fn evaluate(&self, proposal: &Proposal) -> Option<ProposalOutcome> {
        let yes = proposal.yes_count();
        if yes >= self.quorum {
            return Some(ProposalOutcome::Approved(proposal.clone()));
        }
        // YES can no longer reach quorum given the voters still outstanding.
        if self.total_seeds - proposal.no_count() < self.quorum {
            return Some(ProposalOutcome::Rejected {
                proposal: proposal.clone(),
                reason: format!("quorum unreachable ({yes} YES of {} needed)", self.quorum),
            });
        }
        None
    }
}
