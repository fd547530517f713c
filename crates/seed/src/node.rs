//! Seed server and consensus coordinator.
//!
//! One TCP listener accepts both peer-facing traffic (registration, peer
//! list, dead-node reports) and seed-facing traffic (proposals, votes,
//! removal notifies, sync). Votes flow back over the same channel the
//! proposal arrived on; the originator solicits them over outgoing
//! connections it opens to every other seed.

use crate::membership::MembershipStore;
use crate::proposals::{ProposalKind, ProposalOutcome, ProposalTable};
use crate::sync;
use gossipnet_core::{
    constants, net, EventLog, GossipNetError, LineDecoder, Message, NodeId, NodeRole, Result,
    SeedDirectory, VoteChoice,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

/// Seed node configuration.
#[derive(Clone)]
pub struct SeedConfig {
    pub id: NodeId,
    pub directory: SeedDirectory,
    pub proposal_timeout: Duration,
    pub sync_interval: Duration,
    pub net_timeout: Duration,
    pub conn_idle_timeout: Duration,
    pub log_file: Option<PathBuf>,
}

impl SeedConfig {
    pub fn new(id: NodeId, directory: SeedDirectory) -> Self {
        Self {
            id,
            directory,
            proposal_timeout: constants::PROPOSAL_TIMEOUT,
            sync_interval: constants::SYNC_INTERVAL,
            net_timeout: constants::NET_TIMEOUT,
            conn_idle_timeout: constants::CONN_IDLE_TIMEOUT,
            log_file: None,
        }
    }
}

/// Membership authority node.
pub struct SeedNode {
    pub(crate) cfg: SeedConfig,
    pub(crate) others: Vec<NodeId>,
    pub(crate) membership: MembershipStore,
    pub(crate) proposals: ProposalTable,
    pub(crate) events: EventLog,
    /// Connections waiting on a pending proposal's decision (duplicate
    /// REGISTER_REQUESTs attach here instead of opening a second proposal).
    waiters: Mutex<HashMap<Uuid, broadcast::Sender<bool>>>,
    /// Recently logged consensus outcomes, for duplicate-line suppression.
    recent_outcomes: Mutex<HashMap<(ProposalKind, NodeId), Instant>>,
}

impl SeedNode {
    pub fn new(cfg: SeedConfig) -> Result<Arc<Self>> {
        if !cfg.directory.contains(&cfg.id) {
            return Err(GossipNetError::Config(format!(
                "{} is not listed in the seed directory",
                cfg.id
            )));
        }
        let events = EventLog::open(NodeRole::Seed, cfg.id.port, cfg.log_file.as_deref())?;
        let others = cfg.directory.others(&cfg.id);
        let proposals = ProposalTable::new(
            cfg.directory.len(),
            cfg.directory.quorum(),
            cfg.proposal_timeout,
        );
        Ok(Arc::new(Self {
            others,
            membership: MembershipStore::new(),
            proposals,
            events,
            waiters: Mutex::new(HashMap::new()),
            recent_outcomes: Mutex::new(HashMap::new()),
            cfg,
        }))
    }

    pub fn id(&self) -> &NodeId {
        &self.cfg.id
    }

    pub fn membership(&self) -> &MembershipStore {
        &self.membership
    }

    /// Binds the listener and serves until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = TcpListener::bind(self.cfg.id.addr())
            .await
            .map_err(|e| GossipNetError::Bind(format!("cannot bind {}: {e}", self.cfg.id)))?;

        self.events
            .info(format!("Seed node initialized at {}", self.cfg.id));
        self.events.info(format!(
            "Total seeds: {}, Quorum: {}",
            self.cfg.directory.len(),
            self.cfg.directory.quorum()
        ));
        self.events
            .info(format!("Seed node listening on {}", self.cfg.id));

        tokio::spawn(sync::run_sync_loop(self.clone(), shutdown.clone()));

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        let node = self.clone();
                        tokio::spawn(async move { node.handle_connection(stream).await });
                    }
                    Err(e) => warn!("accept failed: {e}"),
                },
                _ = shutdown.changed() => break,
            }
        }

        // Brief drain so in-flight handlers can finish their replies.
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.events.info("Seed node stopped");
        Ok(())
    }

    async fn handle_connection(self: Arc<Self>, mut stream: TcpStream) {
        let mut decoder = LineDecoder::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match timeout(self.cfg.conn_idle_timeout, stream.read(&mut buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => n,
                Ok(Err(_)) => break,
            };
            let msgs = match decoder.decode(&buf[..n]) {
                Ok(msgs) => msgs,
                Err(e) => {
                    warn!("dropping connection: {e}");
                    break;
                }
            };
            for msg in msgs {
                if let Err(e) = self.dispatch(msg, &mut stream).await {
                    debug!("handler error: {e}");
                }
            }
        }
    }

    async fn dispatch(&self, msg: Message, stream: &mut TcpStream) -> Result<()> {
        match msg {
            Message::RegisterRequest { peer } => self.on_register_request(peer, stream).await,
            Message::GetPeerList => self.on_get_peer_list(stream).await,
            Message::DeadNodeReport {
                subject,
                reporter,
                body,
                ..
            } => {
                self.on_dead_node_report(subject, reporter, body).await;
                Ok(())
            }
            Message::ProposeRegister {
                proposal_id,
                peer,
                originator,
            } => {
                self.on_propose(ProposalKind::Register, proposal_id, peer, originator, stream)
                    .await
            }
            Message::ProposeRemove {
                proposal_id,
                peer,
                originator,
            } => {
                self.on_propose(ProposalKind::Remove, proposal_id, peer, originator, stream)
                    .await
            }
            Message::Vote {
                proposal_id,
                vote,
                voter,
            } => {
                self.on_vote(proposal_id, vote, voter).await;
                Ok(())
            }
            Message::RemovalNotify { peer } => {
                if self.membership.remove(&peer) {
                    self.events
                        .info(format!("Removal notify: peer {peer} removed from Peer List"));
                }
                Ok(())
            }
            Message::SyncMembership { members } => {
                self.on_sync_membership(&members);
                Ok(())
            }
            other => {
                debug!("seed ignoring {} message", other.type_name());
                Ok(())
            }
        }
    }

    // ── Registration consensus (originator) ─────────────────────────────

    async fn on_register_request(&self, peer: NodeId, stream: &mut TcpStream) -> Result<()> {
        if self.membership.contains(&peer) {
            self.events
                .info(format!("Peer {peer} already registered - sending ACK"));
            return net::write_frame(
                stream,
                &Message::RegisterAck {
                    reason: Some("Already registered".into()),
                },
                self.cfg.net_timeout,
            )
            .await;
        }

        // A pending proposal for the same subject: this is a repeat of the
        // original request, so attach to its decision instead of opening a
        // second proposal.
        if let Some(pid) = self.proposals.pending_for(ProposalKind::Register, &peer) {
            if let Some(mut rx) = self.subscribe(pid) {
                self.events.info(format!(
                    "Repeat REGISTER_REQUEST for {peer} - awaiting proposal {pid}"
                ));
                let wait = self.cfg.proposal_timeout + self.cfg.net_timeout;
                // The decision may have been broadcast between the pending
                // check and the subscription; the membership read catches it.
                let approved = matches!(timeout(wait, rx.recv()).await, Ok(Ok(true)))
                    || self.membership.contains(&peer);
                return self.reply_registration(stream, &peer, approved, None).await;
            }
        }

        let approved = self.run_proposal(ProposalKind::Register, peer.clone()).await;
        self.reply_registration(stream, &peer, approved, None).await
    }

    async fn reply_registration(
        &self,
        stream: &mut TcpStream,
        _peer: &NodeId,
        approved: bool,
        reason: Option<String>,
    ) -> Result<()> {
        let reply = if approved {
            Message::RegisterAck {
                reason: reason.or_else(|| Some("Registration approved".into())),
            }
        } else {
            Message::RegisterNack {
                reason: reason.or_else(|| Some("Registration rejected - quorum not met".into())),
            }
        };
        net::write_frame(stream, &reply, self.cfg.net_timeout).await
    }

    // ── Dead-node removal consensus (originator) ────────────────────────

    async fn on_dead_node_report(&self, subject: NodeId, reporter: NodeId, body: String) {
        self.events
            .info(format!("Dead-node report received: {body}"));
        self.events.info(format!("Reporter={reporter}"));

        if !self.membership.contains(&subject) {
            self.events
                .warn(format!("Dead node {subject} not in Peer List - ignoring"));
            return;
        }
        if self
            .proposals
            .pending_for(ProposalKind::Remove, &subject)
            .is_some()
        {
            self.events
                .info(format!("Removal proposal for {subject} already pending"));
            return;
        }
        self.run_proposal(ProposalKind::Remove, subject).await;
    }

    /// Runs one proposal to completion as originator. Returns approval.
    async fn run_proposal(&self, kind: ProposalKind, subject: NodeId) -> bool {
        let (pid, mut outcome) =
            self.proposals
                .start(kind, subject.clone(), self.cfg.id.clone());

        match kind {
            ProposalKind::Register => self.events.info(format!(
                "PROPOSAL: Register peer {subject} [id={pid}, self-vote=YES, votes=1/{} needed]",
                self.proposals.quorum()
            )),
            ProposalKind::Remove => self.events.info(format!(
                "PROPOSAL: Remove dead peer {subject} [id={pid}, self-vote=YES, votes=1/{} needed]",
                self.proposals.quorum()
            )),
        }

        if outcome.is_none() {
            let (tx, _) = broadcast::channel(4);
            self.waiters.lock().insert(pid, tx);
            outcome = self.collect_votes(kind, pid, &subject).await;
        }

        let outcome = match outcome {
            Some(o) => o,
            None => match self.proposals.expire(pid) {
                Some(o) => o,
                // Decided concurrently on the listener path; the decision
                // was applied there, so only read the result.
                None => {
                    let member = self.membership.contains(&subject);
                    return match kind {
                        ProposalKind::Register => member,
                        ProposalKind::Remove => !member,
                    };
                }
            },
        };

        let approved = outcome.is_approved();
        self.apply_outcome(&outcome);
        approved
    }

    async fn collect_votes(
        &self,
        kind: ProposalKind,
        pid: Uuid,
        subject: &NodeId,
    ) -> Option<ProposalOutcome> {
        let propose = match kind {
            ProposalKind::Register => Message::ProposeRegister {
                proposal_id: pid,
                peer: subject.clone(),
                originator: self.cfg.id.clone(),
            },
            ProposalKind::Remove => Message::ProposeRemove {
                proposal_id: pid,
                peer: subject.clone(),
                originator: self.cfg.id.clone(),
            },
        };

        let mut set = JoinSet::new();
        for other in self.others.clone() {
            let msg = propose.clone();
            let net_timeout = self.cfg.net_timeout;
            let reply_timeout = self.cfg.proposal_timeout;
            set.spawn(async move {
                let vote = solicit_vote(&other, &msg, pid, net_timeout, reply_timeout).await;
                (other, vote)
            });
        }

        let deadline = tokio::time::Instant::now() + self.cfg.proposal_timeout;
        let mut outcome = None;
        while outcome.is_none() {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((voter, Some(vote))))) => {
                    let yes = vote.is_yes();
                    self.events.info(format!(
                        "Vote from {voter}: {} (proposal {pid})",
                        if yes { "YES" } else { "NO" }
                    ));
                    outcome = self.proposals.record_vote(pid, voter, yes);
                }
                Ok(Some(Ok((voter, None)))) => {
                    // Vote unreceived within the window: a negative signal,
                    // never retried within the same proposal.
                    self.events
                        .warn(format!("No vote from seed {voter} on proposal {pid}"));
                    outcome = self.proposals.record_vote(pid, voter, false);
                }
                Ok(Some(Err(_))) => continue,
                Ok(None) | Err(_) => break,
            }
        }
        outcome
    }

    fn apply_outcome(&self, outcome: &ProposalOutcome) {
        let proposal = outcome.proposal();
        let subject = &proposal.subject;
        let yes = proposal.yes_count();
        let total = proposal.votes.len();
        let quorum = self.proposals.quorum();
        let log_line = self.should_log_outcome(proposal.kind, subject);

        match (proposal.kind, outcome.is_approved()) {
            (ProposalKind::Register, true) => {
                self.membership.insert(subject.clone());
                if log_line {
                    self.events.info(format!(
                        "CONSENSUS OUTCOME - APPROVED: Register peer {subject} \
                         [votes={yes}/{total}, quorum={quorum}]"
                    ));
                    self.log_peer_list();
                }
            }
            (ProposalKind::Register, false) => {
                if log_line {
                    self.events.info(format!(
                        "CONSENSUS OUTCOME - REJECTED: Register peer {subject} \
                         [votes={yes}/{total}, quorum={quorum}]"
                    ));
                }
            }
            (ProposalKind::Remove, true) => {
                let removed = self.membership.remove(subject);
                if removed {
                    if log_line {
                        self.events.info(format!(
                            "CONSENSUS OUTCOME - APPROVED: Remove peer {subject} \
                             [votes={yes}/{total}, quorum={quorum}]"
                        ));
                        self.events.info(format!(
                            "CONFIRMED REMOVAL: Peer {subject} removed from Peer List \
                             [seed votes={yes}/{quorum}]"
                        ));
                        self.log_peer_list();
                    }
                    self.broadcast_removal(subject.clone());
                } else {
                    self.events.info(format!("Peer {subject} already removed"));
                }
            }
            (ProposalKind::Remove, false) => {
                if log_line {
                    self.events.info(format!(
                        "Removal REJECTED for {subject} - only {yes}/{quorum} seed votes"
                    ));
                }
            }
        }

        if let Some(tx) = self.waiters.lock().remove(&proposal.id) {
            let _ = tx.send(outcome.is_approved());
        }
    }

    /// REMOVAL_NOTIFY to the other seeds and the surviving members,
    /// best-effort, off the commit path.
    fn broadcast_removal(&self, peer: NodeId) {
        let mut targets = self.others.clone();
        targets.extend(self.membership.snapshot());
        let notify = Message::RemovalNotify { peer };
        let net_timeout = self.cfg.net_timeout;
        tokio::spawn(async move {
            for target in targets {
                if let Err(e) = net::send(&target, &notify, net_timeout).await {
                    warn!("removal notify to {target} failed: {e}");
                }
            }
        });
    }

    // ── Voter side ──────────────────────────────────────────────────────

    async fn on_propose(
        &self,
        kind: ProposalKind,
        pid: Uuid,
        peer: NodeId,
        originator: NodeId,
        stream: &mut TcpStream,
    ) -> Result<()> {
        self.events.info(format!(
            "Received {kind} proposal {pid} for {peer} from {originator}"
        ));

        // Votes are a pure function of local membership, so duplicate
        // proposals for the same subject get the same answer.
        let yes = match kind {
            ProposalKind::Register => true,
            ProposalKind::Remove => {
                let member = self.membership.contains(&peer);
                if !member {
                    self.events
                        .warn(format!("Peer {peer} not in our list - voting NO"));
                }
                member
            }
        };

        self.events.info(format!(
            "Voting {} on proposal {pid}",
            if yes { "YES" } else { "NO" }
        ));
        net::write_frame(
            stream,
            &Message::Vote {
                proposal_id: pid,
                vote: VoteChoice::from_bool(yes),
                voter: self.cfg.id.clone(),
            },
            self.cfg.net_timeout,
        )
        .await
    }

    async fn on_vote(&self, pid: Uuid, vote: VoteChoice, voter: NodeId) {
        let known = self.proposals.is_pending(pid);
        match self.proposals.record_vote(pid, voter.clone(), vote.is_yes()) {
            Some(outcome) => self.apply_outcome(&outcome),
            None if !known => {
                debug!("discarding vote from {voter} for unknown proposal {pid}");
            }
            None => {}
        }
    }

    // ── Peer list service ───────────────────────────────────────────────

    async fn on_get_peer_list(&self, stream: &mut TcpStream) -> Result<()> {
        let members = self.membership.snapshot();
        self.events
            .info(format!("Sending Peer List ({} peers)", members.len()));
        net::write_frame(
            stream,
            &Message::PeerList {
                members,
                seed: Some(self.cfg.id.clone()),
            },
            self.cfg.net_timeout,
        )
        .await
    }

    // ── Sync ────────────────────────────────────────────────────────────

    pub(crate) fn on_sync_membership(&self, members: &[NodeId]) {
        for peer in self.membership.merge(members) {
            self.events
                .info(format!("Merged peer {peer} from seed sync"));
        }
    }

    /// Safety-net sweep: rejects any proposal that outlived its deadline
    /// without being decided inline.
    pub(crate) fn sweep_expired_proposals(&self) {
        for outcome in self.proposals.check_timeouts() {
            let p = outcome.proposal();
            self.events.warn(format!(
                "Proposal {} ({} {}) expired without quorum",
                p.id, p.kind, p.subject
            ));
            if let Some(tx) = self.waiters.lock().remove(&p.id) {
                let _ = tx.send(false);
            }
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn subscribe(&self, pid: Uuid) -> Option<broadcast::Receiver<bool>> {
        self.waiters.lock().get(&pid).map(|tx| tx.subscribe())
    }

    fn should_log_outcome(&self, kind: ProposalKind, subject: &NodeId) -> bool {
        let window = constants::OUTCOME_DEDUP_WINDOW;
        let mut recent = self.recent_outcomes.lock();
        recent.retain(|_, at| at.elapsed() < window);
        match recent.get(&(kind, subject.clone())) {
            Some(_) => false,
            None => {
                recent.insert((kind, subject.clone()), Instant::now());
                true
            }
        }
    }

    fn log_peer_list(&self) {
        let list = self
            .membership
            .snapshot()
            .iter()
            .map(NodeId::canonical)
            .collect::<Vec<_>>()
            .join(", ");
        self.events.info(format!("Current Peer List: [{list}]"));
    }
}

/// Sends a proposal to one seed and waits for its vote over the same
/// connection. `None` means no usable vote arrived in time.
async fn solicit_vote(
    target: &NodeId,
    propose: &Message,
    pid: Uuid,
    net_timeout: Duration,
    reply_timeout: Duration,
) -> Option<VoteChoice> {
    let mut stream = net::connect(target, net_timeout).await.ok()?;
    net::write_frame(&mut stream, propose, net_timeout)
        .await
        .ok()?;
    let mut decoder = LineDecoder::new();
    let deadline = tokio::time::Instant::now() + reply_timeout;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())?
            .max(Duration::from_millis(1));
        let msg = net::read_frame(&mut stream, &mut decoder, remaining)
            .await
            .ok()?;
        match msg {
            Message::Vote {
                proposal_id, vote, ..
            } if proposal_id == pid => return Some(vote),
            other => debug!("ignoring {} while awaiting vote", other.type_name()),
        }
    }
}
