//! Peer node runtime.
//!
//! Wires the overlay, gossip and liveness state to the network: one accept
//! loop for inbound traffic, one periodic worker generating gossip, one
//! periodic worker probing neighbors. The workers share the guarded state
//! through `Arc<PeerNode>`; no lock is held across an await point.

use crate::gossip::{GossipDisposition, GossipEngine};
use crate::liveness::{tally, LivenessDetector, SuspectRecord};
use crate::overlay;
use chrono::Utc;
use gossipnet_core::{
    constants, dead_node_body, net, EventLog, GossipNetError, LineDecoder, Message, NodeId,
    NodeRole, Result, SeedDirectory, Verdict,
};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, warn};

/// Peer node configuration.
#[derive(Clone)]
pub struct PeerConfig {
    pub id: NodeId,
    pub directory: SeedDirectory,
    pub gossip_interval: Duration,
    pub max_gossip: u32,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub miss_threshold: u32,
    pub alive_window: Duration,
    pub net_timeout: Duration,
    pub conn_idle_timeout: Duration,
    /// How long a registration round may take: the seed runs a full
    /// proposal before it answers.
    pub register_timeout: Duration,
    /// Seed for overlay sampling; `None` draws from entropy.
    pub overlay_seed: Option<u64>,
    pub log_file: Option<PathBuf>,
}

impl PeerConfig {
    pub fn new(id: NodeId, directory: SeedDirectory) -> Self {
        Self {
            id,
            directory,
            gossip_interval: constants::GOSSIP_INTERVAL,
            max_gossip: constants::MAX_GOSSIP_MESSAGES,
            ping_interval: constants::PING_INTERVAL,
            ping_timeout: constants::PING_TIMEOUT,
            miss_threshold: constants::MISS_THRESHOLD,
            alive_window: constants::ALIVE_WINDOW,
            net_timeout: constants::NET_TIMEOUT,
            conn_idle_timeout: constants::CONN_IDLE_TIMEOUT,
            register_timeout: constants::PROPOSAL_TIMEOUT + constants::NET_TIMEOUT,
            overlay_seed: None,
            log_file: None,
        }
    }
}

/// Gossip data-plane node.
pub struct PeerNode {
    cfg: PeerConfig,
    known_peers: RwLock<Vec<NodeId>>,
    neighbors: RwLock<Vec<NodeId>>,
    gossip: GossipEngine,
    liveness: LivenessDetector,
    rng: Mutex<StdRng>,
    events: EventLog,
}

impl PeerNode {
    pub fn new(cfg: PeerConfig) -> Result<Arc<Self>> {
        let events = EventLog::open(NodeRole::Peer, cfg.id.port, cfg.log_file.as_deref())?;
        let rng = match cfg.overlay_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Arc::new(Self {
            gossip: GossipEngine::new(cfg.id.clone(), cfg.max_gossip),
            liveness: LivenessDetector::new(cfg.miss_threshold, cfg.alive_window),
            known_peers: RwLock::new(Vec::new()),
            neighbors: RwLock::new(Vec::new()),
            rng: Mutex::new(rng),
            events,
            cfg,
        }))
    }

    pub fn id(&self) -> &NodeId {
        &self.cfg.id
    }

    pub fn neighbors(&self) -> Vec<NodeId> {
        self.neighbors.read().clone()
    }

    pub fn gossip_engine(&self) -> &GossipEngine {
        &self.gossip
    }

    /// Binds, registers with the seed cluster, builds the overlay and
    /// serves until `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = TcpListener::bind(self.cfg.id.addr())
            .await
            .map_err(|e| GossipNetError::Bind(format!("cannot bind {}: {e}", self.cfg.id)))?;

        self.events
            .info(format!("Peer node initialized at {}", self.cfg.id));
        self.events
            .info(format!("Listening on {}", self.cfg.id));

        self.register().await?;
        self.refresh_peer_list().await;

        tokio::spawn(run_gossip_loop(self.clone(), shutdown.clone()));
        tokio::spawn(run_liveness_loop(self.clone(), shutdown.clone()));

        self.events
            .info("Peer node fully active - gossip and liveness running");

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

        tokio::time::sleep(Duration::from_millis(100)).await;
        self.events.info("Peer node stopped");
        Ok(())
    }

    // ── Registration ────────────────────────────────────────────────────

    /// Contacts seeds in random order until one acknowledges. The seed runs
    /// cluster consensus before answering, so a single ACK means the
    /// registration committed with seed quorum.
    async fn register(&self) -> Result<()> {
        let mut seeds = self.cfg.directory.seeds().to_vec();
        seeds.shuffle(&mut *self.rng.lock());

        self.events.info(format!(
            "Registering with seed cluster ({} seeds, quorum {})",
            self.cfg.directory.len(),
            self.cfg.directory.quorum()
        ));

        let request = Message::RegisterRequest {
            peer: self.cfg.id.clone(),
        };
        for seed in seeds {
            self.events
                .info(format!("Sending registration to seed {seed}"));
            match net::request(
                &seed,
                &request,
                self.cfg.net_timeout,
                self.cfg.register_timeout,
            )
            .await
            {
                Ok(Message::RegisterAck { .. }) => {
                    self.events
                        .info(format!("ACK from seed {seed} - registration complete"));
                    return Ok(());
                }
                Ok(Message::RegisterNack { reason }) => {
                    self.events.warn(format!(
                        "NACK from seed {seed}: {}",
                        reason.unwrap_or_else(|| "no reason given".into())
                    ));
                }
                Ok(other) => {
                    warn!("unexpected {} while registering", other.type_name());
                }
                Err(e) => {
                    self.events.warn(format!("Seed {seed} unreachable: {e}"));
                }
            }
        }
        Err(GossipNetError::Network(
            "registration failed - no seed acknowledged".into(),
        ))
    }

    // ── Peer list and overlay ───────────────────────────────────────────

    /// Fetches the peer list from every seed, takes the union (self
    /// excluded) and rebuilds the overlay from it.
    pub async fn refresh_peer_list(&self) {
        let mut union: BTreeSet<NodeId> = BTreeSet::new();
        for seed in self.cfg.directory.seeds() {
            match net::request(
                seed,
                &Message::GetPeerList,
                self.cfg.net_timeout,
                self.cfg.net_timeout,
            )
            .await
            {
                Ok(Message::PeerList { members, seed: from }) => {
                    let from = from.unwrap_or_else(|| seed.clone());
                    self.events.info(format!(
                        "Received Peer List from seed {from}: [{}]",
                        render(&members)
                    ));
                    union.extend(members);
                }
                Ok(other) => {
                    warn!("unexpected {} while fetching peer list", other.type_name());
                }
                Err(e) => {
                    self.events
                        .warn(format!("Peer list fetch from seed {seed} failed: {e}"));
                }
            }
        }
        union.remove(&self.cfg.id);
        let all: Vec<NodeId> = union.into_iter().collect();
        self.events
            .info(format!("Union of Peer Lists: {} peers", all.len()));
        *self.known_peers.write() = all;
        self.rebuild_overlay();
    }

    fn rebuild_overlay(&self) {
        let peers = self.known_peers.read().clone();
        let selected = overlay::select_neighbors(&peers, &mut self.rng.lock());
        self.events.info(format!(
            "Overlay built: degree={} neighbors=[{}]",
            selected.len(),
            render(&selected)
        ));
        *self.neighbors.write() = selected;
    }

    fn drop_peer(&self, peer: &NodeId) {
        self.known_peers.write().retain(|p| p != peer);
        self.neighbors.write().retain(|p| p != peer);
        self.liveness.forget(peer);
    }

    // ── Inbound traffic ─────────────────────────────────────────────────

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
            Message::Gossip {
                msg_id,
                body,
                hash,
                sender,
            } => {
                self.on_gossip(msg_id, body, hash, sender).await;
                Ok(())
            }
            Message::Ping => {
                net::write_frame(stream, &Message::Pong, self.cfg.net_timeout).await
            }
            Message::SuspectQuery { subject } => {
                let verdict = self.suspect_verdict(&subject).await;
                net::write_frame(
                    stream,
                    &Message::SuspectResponse { subject, verdict },
                    self.cfg.net_timeout,
                )
                .await
            }
            Message::RemovalNotify { peer } => {
                self.events
                    .info(format!("Removal notify for {peer} - refreshing peer list"));
                self.drop_peer(&peer);
                self.refresh_peer_list().await;
                Ok(())
            }
            other => {
                debug!("peer ignoring {} message", other.type_name());
                Ok(())
            }
        }
    }

    // ── Gossip ──────────────────────────────────────────────────────────

    async fn on_gossip(
        &self,
        msg_id: String,
        body: Option<String>,
        hash: String,
        sender: Option<NodeId>,
    ) {
        match self.gossip.observe(&msg_id, body.as_deref(), &hash) {
            GossipDisposition::Invalid => {
                self.events
                    .warn(format!("Gossip hash mismatch for {msg_id} - dropping"));
            }
            GossipDisposition::Duplicate => {}
            GossipDisposition::Fresh => {
                if let Some(sender) = &sender {
                    self.liveness.record_alive(sender);
                }
                self.events.info(format!(
                    "Gossip received [from={}, msg={msg_id}]",
                    sender
                        .as_ref()
                        .map(NodeId::canonical)
                        .unwrap_or_else(|| "unknown".into())
                ));
                let frame = self.gossip.forward_frame(msg_id, body, hash);
                self.forward_gossip(frame, sender.as_ref());
            }
        }
    }

    /// Best-effort fire-and-forget to every neighbor except `exclude`.
    /// Each forward runs in its own task so a slow neighbor cannot block
    /// the others.
    fn forward_gossip(&self, frame: Message, exclude: Option<&NodeId>) {
        let targets: Vec<NodeId> = self
            .neighbors
            .read()
            .iter()
            .filter(|n| Some(*n) != exclude)
            .cloned()
            .collect();
        let net_timeout = self.cfg.net_timeout;
        for target in targets {
            let frame = frame.clone();
            tokio::spawn(async move {
                if let Err(e) = net::send(&target, &frame, net_timeout).await {
                    warn!("gossip forward to {target} failed: {e}");
                }
            });
        }
    }

    // ── Liveness ────────────────────────────────────────────────────────

    /// One PING round across the current neighbor set. Individual pings
    /// are not logged.
    async fn ping_round(&self) {
        let neighbors = self.neighbors();
        let mut set = JoinSet::new();
        for neighbor in neighbors {
            let net_timeout = self.cfg.net_timeout;
            let ping_timeout = self.cfg.ping_timeout;
            set.spawn(async move {
                let alive = matches!(
                    net::request(&neighbor, &Message::Ping, net_timeout, ping_timeout).await,
                    Ok(Message::Pong)
                );
                (neighbor, alive)
            });
        }
        while let Some(res) = set.join_next().await {
            if let Ok((neighbor, alive)) = res {
                if alive {
                    self.liveness.record_alive(&neighbor);
                } else {
                    self.liveness.record_miss(&neighbor);
                }
            }
        }
    }

    /// Runs peer-level consensus for every neighbor that crossed the miss
    /// threshold this round.
    async fn check_suspicions(&self) {
        for subject in self.liveness.ripe_suspects() {
            self.events
                .info(format!("Initiating peer-level consensus for {subject}"));

            let mut record = SuspectRecord::new(subject.clone());
            let others: Vec<NodeId> = self
                .neighbors
                .read()
                .iter()
                .filter(|n| **n != subject)
                .cloned()
                .collect();

            let mut set = JoinSet::new();
            for neighbor in others {
                let query = Message::SuspectQuery {
                    subject: subject.clone(),
                };
                let net_timeout = self.cfg.net_timeout;
                // The queried neighbor may live-probe the subject before it
                // answers, so allow for one probe on top of the transport.
                let reply_timeout = self.cfg.net_timeout + self.cfg.ping_timeout;
                set.spawn(async move {
                    let verdict = match net::request(&neighbor, &query, net_timeout, reply_timeout)
                        .await
                    {
                        Ok(Message::SuspectResponse { verdict, .. }) => verdict,
                        _ => Verdict::Unknown,
                    };
                    (neighbor, verdict)
                });
            }
            while let Some(res) = set.join_next().await {
                if let Ok((neighbor, verdict)) = res {
                    self.events
                        .info(format!("Suspect response from {neighbor}: {verdict}"));
                    record.responses.insert(neighbor, verdict);
                }
            }

            let result = tally(&record);
            if result.confirmed {
                self.events.info(format!(
                    "PEER CONSENSUS REACHED: {subject} confirmed dead ({}/{})",
                    result.dead, result.m
                ));
                self.report_dead(&subject).await;
                self.drop_peer(&subject);
            } else {
                self.events
                    .info(format!("Suspicion cancelled for {subject}"));
                self.liveness.cancel_suspicion(&subject);
            }
        }
    }

    /// Sends the dead-node report to every seed; any one of them will
    /// originate the removal proposal.
    async fn report_dead(&self, subject: &NodeId) {
        let ts = Utc::now().timestamp_millis() as f64 / 1000.0;
        let body = dead_node_body(subject, ts, &self.cfg.id.host);
        self.events.info(format!("DEAD NODE REPORT: {body}"));

        let report = Message::DeadNodeReport {
            subject: subject.clone(),
            reporter: self.cfg.id.clone(),
            timestamp: ts,
            body,
        };
        for seed in self.cfg.directory.seeds() {
            if let Err(e) = net::send(seed, &report, self.cfg.net_timeout).await {
                self.events
                    .warn(format!("Failed to report to seed {seed}: {e}"));
            }
        }
    }

    /// Answers a SUSPECT_QUERY. With no local evidence about a current
    /// neighbor, one live probe decides; a subject outside the neighbor
    /// set stays UNKNOWN.
    async fn suspect_verdict(&self, subject: &NodeId) -> Verdict {
        match self.liveness.verdict_on(subject) {
            Verdict::Unknown if self.neighbors.read().contains(subject) => {
                match net::request(
                    subject,
                    &Message::Ping,
                    self.cfg.net_timeout,
                    self.cfg.ping_timeout,
                )
                .await
                {
                    Ok(Message::Pong) => {
                        self.liveness.record_alive(subject);
                        Verdict::Alive
                    }
                    _ => Verdict::Dead,
                }
            }
            verdict => verdict,
        }
    }
}

// ── Periodic workers ────────────────────────────────────────────────────

async fn run_gossip_loop(node: Arc<PeerNode>, mut shutdown: watch::Receiver<bool>) {
    // Let the overlay settle before the first message.
    tokio::time::sleep(node.cfg.gossip_interval.min(Duration::from_secs(2))).await;
    let mut ticker = tokio::time::interval(node.cfg.gossip_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => match node.gossip.next_message() {
                Some(out) => {
                    node.events.info(format!(
                        "Generated gossip #{}/{}: {}",
                        out.seq, node.cfg.max_gossip, out.msg_id
                    ));
                    node.forward_gossip(out.message, None);
                }
                None => {
                    node.events.info("Gossip generation complete");
                    break;
                }
            },
            _ = shutdown.changed() => break,
        }
    }
}

async fn run_liveness_loop(node: Arc<PeerNode>, mut shutdown: watch::Receiver<bool>) {
    tokio::time::sleep(node.cfg.ping_interval.min(Duration::from_secs(5))).await;
    let mut ticker = tokio::time::interval(node.cfg.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                node.ping_round().await;
                node.check_suspicions().await;
            }
            _ = shutdown.changed() => break,
        }
    }
}

fn render(peers: &[NodeId]) -> String {
    peers
        .iter()
        .map(NodeId::canonical)
        .collect::<Vec<_>>()
        .join(", ")
}
