//! Append-only structured event log.
//!
//! The durable output of a node: one line per significant event, of the form
//! `[ISO-timestamp] [ROLE:PORT] LEVEL - message`. Lines are also mirrored to
//! `tracing` at the matching level for console observability.
//!
//! The writer holds only its own mutex; callers must not hold other locks
//! while logging.

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{error, info, warn};

use crate::error::{GossipNetError, Result};

/// Which role a node plays in the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeRole {
    Seed,
    Peer,
}

impl NodeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Seed => "SEED",
            NodeRole::Peer => "PEER",
        }
    }
}

/// Event severity. Maps one-to-one onto log line levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventLevel::Info => "INFO",
            EventLevel::Warning => "WARNING",
            EventLevel::Error => "ERROR",
        })
    }
}

/// Append-only event log for one node.
pub struct EventLog {
    role: NodeRole,
    port: u16,
    file: Option<Mutex<File>>,
}

impl EventLog {
    /// Opens (appending) the log file at `path`. With `None` the log is
    /// console-only, which tests use.
    pub fn open(role: NodeRole, port: u16, path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(Mutex::new(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(p)
                    .map_err(|e| {
                        GossipNetError::Config(format!(
                            "cannot open event log {}: {e}",
                            p.display()
                        ))
                    })?,
            )),
            None => None,
        };
        Ok(Self { role, port, file })
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.write(EventLevel::Info, msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.write(EventLevel::Warning, msg.as_ref());
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.write(EventLevel::Error, msg.as_ref());
    }

    fn write(&self, level: EventLevel, msg: &str) {
        match level {
            EventLevel::Info => info!("[{}:{}] {msg}", self.role.as_str(), self.port),
            EventLevel::Warning => warn!("[{}:{}] {msg}", self.role.as_str(), self.port),
            EventLevel::Error => error!("[{}:{}] {msg}", self.role.as_str(), self.port),
        }
        if let Some(file) = &self.file {
            let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            let line = format!(
                "[{ts}] [{}:{}] {level} - {msg}\n",
                self.role.as_str(),
                self.port
            );
            let mut f = file.lock();
            // A full disk should not take the node down with it.
            let _ = f.write_all(line.as_bytes());
        }
    }
}
