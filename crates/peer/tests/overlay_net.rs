//! End-to-end peer tests over real loopback sockets: gossip dissemination
//! with dedup, and the failure-detection pipeline through to seed-side
//! removal.
//!
//! Each test runs on its own port range. The "scripted peer" below is a
//! bare protocol endpoint the tests control directly: it registers like a
//! peer, answers pings and records every gossip frame it receives.

use gossipnet_core::{
    gossip_hash, net, LineDecoder, Message, NodeId, SeedDirectory,
};
use gossipnet_peer::{PeerConfig, PeerNode};
use gossipnet_seed::{SeedConfig, SeedNode};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const HOST: &str = "127.0.0.1";
const CONNECT: Duration = Duration::from_secs(1);

async fn start_seeds(base_port: u16, n: u16, rx: &watch::Receiver<bool>) -> SeedDirectory {
    let seeds: Vec<NodeId> = (0..n).map(|i| NodeId::new(HOST, base_port + i)).collect();
    let directory = SeedDirectory::from_seeds(seeds.clone()).unwrap();
    for id in seeds {
        let mut cfg = SeedConfig::new(id, directory.clone());
        cfg.proposal_timeout = Duration::from_secs(1);
        cfg.sync_interval = Duration::from_millis(200);
        let node = SeedNode::new(cfg).unwrap();
        tokio::spawn(node.run(rx.clone()));
    }
    for i in 0..n {
        wait_listening(base_port + i).await;
    }
    directory
}

async fn wait_listening(port: u16) {
    for _ in 0..50 {
        if TcpStream::connect((HOST, port)).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("port {port} never started listening");
}

fn peer_config(port: u16, directory: &SeedDirectory) -> PeerConfig {
    let mut cfg = PeerConfig::new(NodeId::new(HOST, port), directory.clone());
    // Quiet data plane unless a test wants generation.
    cfg.max_gossip = 0;
    cfg.gossip_interval = Duration::from_millis(100);
    cfg.ping_interval = Duration::from_millis(250);
    cfg.ping_timeout = Duration::from_millis(200);
    cfg.register_timeout = Duration::from_secs(3);
    cfg.overlay_seed = Some(7);
    cfg
}

/// A protocol endpoint under direct test control. Registers with the seed
/// cluster like a peer, answers PING with PONG while `responsive`, and
/// records every GOSSIP frame delivered to it.
struct ScriptedPeer {
    id: NodeId,
    gossip: Arc<Mutex<Vec<(String, Option<NodeId>)>>>,
    responsive: Arc<Mutex<bool>>,
    handle: JoinHandle<()>,
}

impl ScriptedPeer {
    async fn start(port: u16, directory: &SeedDirectory) -> Self {
        let id = NodeId::new(HOST, port);
        let listener = TcpListener::bind(id.addr()).await.unwrap();
        let gossip = Arc::new(Mutex::new(Vec::new()));
        let responsive = Arc::new(Mutex::new(true));

        let gossip_log = gossip.clone();
        let alive = responsive.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let gossip_log = gossip_log.clone();
                let alive = alive.clone();
                tokio::spawn(async move {
                    let mut decoder = LineDecoder::new();
                    let mut buf = [0u8; 4096];
                    loop {
                        let n = match timeout(Duration::from_secs(5), stream.read(&mut buf)).await
                        {
                            Ok(Ok(0)) | Err(_) => break,
                            Ok(Ok(n)) => n,
                            Ok(Err(_)) => break,
                        };
                        let Ok(msgs) = decoder.decode(&buf[..n]) else {
                            break;
                        };
                        for msg in msgs {
                            match msg {
                                Message::Gossip { hash, sender, .. } => {
                                    gossip_log.lock().push((hash, sender));
                                }
                                Message::Ping if *alive.lock() => {
                                    let _ = net::write_frame(
                                        &mut stream,
                                        &Message::Pong,
                                        Duration::from_secs(1),
                                    )
                                    .await;
                                }
                                _ => {}
                            }
                        }
                    }
                });
            }
        });

        // Register through the first seed; one ACK means quorum committed.
        let reply = net::request(
            &directory.seeds()[0],
            &Message::RegisterRequest { peer: id.clone() },
            CONNECT,
            Duration::from_secs(3),
        )
        .await
        .unwrap();
        assert_eq!(reply.type_name(), "REGISTER_ACK");

        Self {
            id,
            gossip,
            responsive,
            handle,
        }
    }

    fn frames_with_hash(&self, hash: &str) -> Vec<Option<NodeId>> {
        self.gossip
            .lock()
            .iter()
            .filter(|(h, _)| h == hash)
            .map(|(_, sender)| sender.clone())
            .collect()
    }

    /// Goes dark: stops answering pings and closes the listener.
    fn kill(&self) {
        *self.responsive.lock() = false;
        self.handle.abort();
    }
}

#[tokio::test]
async fn gossip_is_forwarded_once_per_link_and_deduplicated() {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let directory = start_seeds(16700, 3, &shutdown_rx).await;

    // Scripted peer C first, then real peer B (sees C), then real peer A
    // (sees B and C, so both become neighbors: k = min(2/2+1, 2) = 2).
    let c = ScriptedPeer::start(17702, &directory).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let b = PeerNode::new(peer_config(17701, &directory)).unwrap();
    tokio::spawn(b.clone().run(shutdown_rx.clone()));
    wait_listening(17701).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let a = PeerNode::new(peer_config(17700, &directory)).unwrap();
    tokio::spawn(a.clone().run(shutdown_rx.clone()));
    wait_listening(17700).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(a.neighbors().len(), 2, "A should neighbor both peers");

    // Inject the same gossip at A twice, claiming C as the sender. A must
    // forward the first receipt to B only (C is the immediate sender) and
    // silently drop the duplicate. B forwards its first receipt to C.
    let msg_id = "1700000000000:10.9.9.9:9999:1";
    let hash = gossip_hash(msg_id, None);
    let inject = Message::Gossip {
        msg_id: msg_id.into(),
        body: None,
        hash: hash.clone(),
        sender: Some(c.id.clone()),
    };
    net::send(&a.id().clone(), &inject, CONNECT).await.unwrap();
    net::send(&a.id().clone(), &inject, CONNECT).await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    let frames = c.frames_with_hash(&hash);
    assert_eq!(
        frames.len(),
        1,
        "C must receive the gossip exactly once, got {frames:?}"
    );
    assert_eq!(
        frames[0].as_ref().map(|n| n.port),
        Some(17701),
        "the one copy must come from B's forward"
    );

    // A third injection is a duplicate at A as well: nothing new anywhere.
    net::send(&a.id().clone(), &inject, CONNECT).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(c.frames_with_hash(&hash).len(), 1);
}

#[tokio::test]
async fn generation_respects_lifetime_cap() {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let directory = start_seeds(16800, 3, &shutdown_rx).await;

    let c = ScriptedPeer::start(17802, &directory).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    // A generates for real: 3 messages on a 100ms interval, C is its only
    // peer so every generated message lands there.
    let mut cfg = peer_config(17800, &directory);
    cfg.max_gossip = 3;
    let a = PeerNode::new(cfg).unwrap();
    tokio::spawn(a.clone().run(shutdown_rx.clone()));
    wait_listening(17800).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(a.gossip_engine().generated(), 3);
    let received = c.gossip.lock().len();
    assert_eq!(received, 3, "C should hold exactly the 3 generated messages");
}

#[tokio::test]
async fn dead_neighbor_is_reported_and_removed_cluster_wide() {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let directory = start_seeds(16900, 3, &shutdown_rx).await;

    let d = ScriptedPeer::start(17901, &directory).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut cfg = peer_config(17900, &directory);
    cfg.miss_threshold = 2;
    let a = PeerNode::new(cfg).unwrap();
    tokio::spawn(a.clone().run(shutdown_rx.clone()));
    wait_listening(17900).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(a.neighbors(), vec![d.id.clone()]);

    // Let sync propagate D to every seed, then kill it. A has no other
    // neighbor to consult, so its own evidence confirms the death and the
    // report drives seed-level removal.
    tokio::time::sleep(Duration::from_millis(500)).await;
    d.kill();

    // Converged when the peer list no longer carries D and A has settled
    // on an empty neighbor set (a refresh may briefly re-admit D while the
    // slower seeds catch up).
    let mut converged = false;
    for _ in 0..60 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let reply = net::request(
            &directory.seeds()[1],
            &Message::GetPeerList,
            CONNECT,
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        let gone = matches!(reply, Message::PeerList { members, .. } if !members.contains(&d.id));
        if gone && a.neighbors().is_empty() {
            converged = true;
            break;
        }
    }
    assert!(converged, "dead peer was never removed cluster-wide");
}

#[tokio::test]
async fn startup_fails_when_no_seed_acknowledges() {
    // A directory pointing at a dead port: registration must fail and the
    // node must exit with an error rather than hang.
    let directory =
        SeedDirectory::from_seeds(vec![NodeId::new(HOST, 16999)]).unwrap();
    let mut cfg = peer_config(17999, &directory);
    cfg.register_timeout = Duration::from_millis(500);

    let node = PeerNode::new(cfg).unwrap();
    let (_tx, rx) = watch::channel(false);
    let result = timeout(Duration::from_secs(10), node.run(rx)).await;
    assert!(result.unwrap().is_err());
}
