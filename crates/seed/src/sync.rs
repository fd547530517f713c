//! Anti-entropy membership sync.
//!
//! Outside the consensus critical path, each seed periodically pushes its
//! committed member set to every other seed. A receiver unions unknown
//! entries (see [`crate::node::SeedNode::on_sync_membership`]); because the
//! exchanged set only ever contains committed members, a merge is always
//! the observation of a commit that happened elsewhere, never a fresh
//! admission.

use crate::node::SeedNode;
use gossipnet_core::{net, Message};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub(crate) async fn run_sync_loop(node: Arc<SeedNode>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(node.cfg.sync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; there is nothing to sync yet.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                node.sweep_expired_proposals();
                sync_once(&node).await;
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn sync_once(node: &SeedNode) {
    let members = node.membership.snapshot();
    if members.is_empty() {
        return;
    }
    let msg = Message::SyncMembership { members };
    for other in &node.others {
        if let Err(e) = net::send(other, &msg, node.cfg.net_timeout).await {
            debug!("membership sync to {other} failed: {e}");
        }
    }
}
