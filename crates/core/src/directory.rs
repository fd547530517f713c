//! Seed directory.
//!
//! Ordered, immutable list of seed identities loaded once at process start.
//! The quorum is derived here and never changes for the process lifetime.

use crate::error::{GossipNetError, Result};
use crate::types::NodeId;
use std::path::Path;
use tracing::warn;

/// The seed cluster as known at startup.
#[derive(Clone, Debug)]
pub struct SeedDirectory {
    seeds: Vec<NodeId>,
    quorum: usize,
}

impl SeedDirectory {
    /// Loads the directory from a config file with one seed per line.
    ///
    /// `HOST:PORT` and `HOST,PORT` are both accepted. Blank lines and
    /// `#`-prefixed comments are ignored; any other malformed line fails
    /// startup with a diagnostic naming the line.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            GossipNetError::Config(format!("cannot read config {}: {e}", path.display()))
        })?;
        let mut seeds = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let id = parse_seed_line(line).ok_or_else(|| {
                GossipNetError::Config(format!(
                    "{}:{}: malformed seed entry: {line:?}",
                    path.display(),
                    lineno + 1
                ))
            })?;
            seeds.push(id);
        }
        Self::from_seeds(seeds)
    }

    pub fn from_seeds(seeds: Vec<NodeId>) -> Result<Self> {
        if seeds.is_empty() {
            return Err(GossipNetError::Config(
                "seed directory is empty; at least one seed is required".into(),
            ));
        }
        if seeds.len() == 1 {
            warn!("single-seed cluster: quorum of 1 means self-approval, consensus is vacuous");
        }
        let quorum = seeds.len() / 2 + 1;
        Ok(Self { seeds, quorum })
    }

    pub fn seeds(&self) -> &[NodeId] {
        &self.seeds
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    /// `floor(n/2) + 1`, computed once at startup.
    pub fn quorum(&self) -> usize {
        self.quorum
    }

    /// Whether `id` is a member of the seed cluster (self-identification).
    pub fn contains(&self, id: &NodeId) -> bool {
        self.seeds.iter().any(|s| s == id)
    }

    /// Every seed except `me`, in directory order.
    pub fn others(&self, me: &NodeId) -> Vec<NodeId> {
        self.seeds.iter().filter(|s| *s != me).cloned().collect()
    }
}

fn parse_seed_line(line: &str) -> Option<NodeId> {
    let (host, port) = if let Some((h, p)) = line.split_once(',') {
        (h, p)
    } else {
        line.rsplit_once(':')?
    };
    let host = host.trim();
    let port: u16 = port.trim().parse().ok()?;
    if host.is_empty() || port == 0 {
        return None;
    }
    Some(NodeId::new(host, port))
}
