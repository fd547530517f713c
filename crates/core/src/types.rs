//! Node identity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a node on the network, seed or peer.
///
/// Compared by exact equality of both fields. Canonical string form is
/// `HOST:PORT`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub host: String,
    pub port: u16,
}

impl NodeId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Canonical `HOST:PORT` form.
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Address string suitable for `TcpStream::connect`.
    pub fn addr(&self) -> String {
        self.canonical()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}:{})", self.host, self.port)
    }
}

impl FromStr for NodeId {
    type Err = crate::error::GossipNetError;

    /// Parses `HOST:PORT`. The port is taken from the last `:` so hostnames
    /// with embedded colons still round-trip.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| crate::error::GossipNetError::Config(format!("invalid node id: {s}")))?;
        let port: u16 = port.trim().parse().map_err(|_| {
            crate::error::GossipNetError::Config(format!("invalid port in node id: {s}"))
        })?;
        if port == 0 {
            return Err(crate::error::GossipNetError::Config(format!(
                "port must be positive: {s}"
            )));
        }
        Ok(Self::new(host.trim(), port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_round_trip() {
        let id = NodeId::new("127.0.0.1", 7000);
        assert_eq!(id.canonical(), "127.0.0.1:7000");
        assert_eq!("127.0.0.1:7000".parse::<NodeId>().unwrap(), id);
    }

    #[test]
    fn rejects_missing_or_zero_port() {
        assert!("localhost".parse::<NodeId>().is_err());
        assert!("localhost:abc".parse::<NodeId>().is_err());
        assert!("localhost:0".parse::<NodeId>().is_err());
    }

    #[test]
    fn equality_is_exact() {
        let a = NodeId::new("127.0.0.1", 7000);
        let b = NodeId::new("127.0.0.1", 7001);
        let c = NodeId::new("localhost", 7000);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
