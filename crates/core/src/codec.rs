//! Newline-delimited JSON framing.
//!
//! Every TCP channel carries a stream of messages, each a JSON object
//! followed by a single `\n`. The decoder keeps a per-connection buffer,
//! splits on the delimiter and retains the trailing partial fragment.
//!
//! Error policy: a line that is not valid JSON is logged and skipped; a
//! valid JSON object with an unknown `type` is ignored; a buffer or line
//! exceeding the sanity ceiling is fatal for the connection.

use crate::error::{GossipNetError, Result};
use crate::message::Message;
use tracing::{debug, warn};

/// Frame delimiter.
pub const MSG_DELIMITER: u8 = b'\n';

/// Encodes one message as a newline-terminated JSON frame.
pub fn encode(msg: &Message) -> Result<Vec<u8>> {
    let mut out = serde_json::to_vec(msg)?;
    out.push(MSG_DELIMITER);
    Ok(out)
}

/// Streaming decoder for one connection.
pub struct LineDecoder {
    buf: Vec<u8>,
    max_frame: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_max_frame(crate::constants::MAX_FRAME_BYTES)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame,
        }
    }

    /// Bytes currently buffered as a partial frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Feeds `data` into the buffer and drains every complete frame.
    ///
    /// Returns the decoded messages in stream order. An error means the
    /// connection should be dropped; skippable problems (malformed line,
    /// unknown type) are consumed here and never surface to the caller.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<Message>> {
        self.buf.extend_from_slice(data);

        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == MSG_DELIMITER) {
            if pos > self.max_frame {
                return Err(GossipNetError::FrameTooLarge {
                    size: pos,
                    limit: self.max_frame,
                });
            }
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = &line[..pos];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            if let Some(msg) = decode_line(line) {
                out.push(msg);
            }
        }

        if self.buf.len() > self.max_frame {
            return Err(GossipNetError::FrameTooLarge {
                size: self.buf.len(),
                limit: self.max_frame,
            });
        }
        Ok(out)
    }
}

fn decode_line(line: &[u8]) -> Option<Message> {
    let value: serde_json::Value = match serde_json::from_slice(line) {
        Ok(v) => v,
        Err(err) => {
            warn!("skipping malformed frame: {err}");
            return None;
        }
    };
    let type_tag = value.get("type").and_then(|t| t.as_str()).map(str::to_owned);
    match serde_json::from_value::<Message>(value) {
        Ok(msg) => Some(msg),
        Err(err) => {
            match type_tag {
                Some(t) if Message::KNOWN_TYPES.contains(&t.as_str()) => {
                    warn!("skipping malformed {t} payload: {err}");
                }
                Some(t) => debug!("ignoring message of unknown type {t}"),
                None => warn!("skipping frame without a type field"),
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;

    fn ping_frame() -> Vec<u8> {
        encode(&Message::Ping).unwrap()
    }

    #[test]
    fn splits_multiple_frames_and_keeps_remainder() {
        let mut decoder = LineDecoder::new();
        let mut data = ping_frame();
        data.extend_from_slice(&encode(&Message::GetPeerList).unwrap());
        data.extend_from_slice(b"{\"type\":\"PO");

        let msgs = decoder.decode(&data).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].type_name(), "PING");
        assert_eq!(msgs[1].type_name(), "GET_PEER_LIST");
        assert!(decoder.pending() > 0);

        // Completing the partial frame yields the third message.
        let msgs = decoder.decode(b"NG\"}\n").unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].type_name(), "PONG");
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn malformed_line_is_skipped_and_stream_continues() {
        let mut decoder = LineDecoder::new();
        let mut data = b"this is not json\n".to_vec();
        data.extend_from_slice(&ping_frame());
        let msgs = decoder.decode(&data).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].type_name(), "PING");
    }

    #[test]
    fn unknown_type_is_ignored() {
        let mut decoder = LineDecoder::new();
        let msgs = decoder
            .decode(b"{\"type\":\"FROB\",\"x\":1}\n")
            .unwrap();
        assert!(msgs.is_empty());
    }

    #[test]
    fn blank_lines_are_ignored() {
        let mut decoder = LineDecoder::new();
        let msgs = decoder.decode(b"\n  \n\n").unwrap();
        assert!(msgs.is_empty());
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn oversized_frame_is_fatal() {
        let mut decoder = LineDecoder::with_max_frame(64);
        let big = vec![b'x'; 65];
        let err = decoder.decode(&big).unwrap_err();
        assert!(matches!(err, GossipNetError::FrameTooLarge { .. }));
    }

    #[test]
    fn encode_then_decode_is_identity() {
        let original = Message::PeerList {
            members: vec![NodeId::new("127.0.0.1", 7000), NodeId::new("10.0.0.2", 7001)],
            seed: Some(NodeId::new("127.0.0.1", 6000)),
        };
        let mut decoder = LineDecoder::new();
        let msgs = decoder.decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(msgs.len(), 1);
        match &msgs[0] {
            Message::PeerList { members, seed } => {
                assert_eq!(members.len(), 2);
                assert_eq!(members[0].port, 7000);
                assert_eq!(seed.as_ref().unwrap().port, 6000);
            }
            other => panic!("decoded wrong variant: {}", other.type_name()),
        }
    }
}
