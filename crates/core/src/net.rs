//! Short-lived TCP helpers.
//!
//! Gossip forwards, vote solicitation, probes and reports all use the same
//! shape: connect, write one framed message, optionally read frames back,
//! close. Every operation is bounded by a timeout; an elapsed timeout is a
//! negative signal for the caller, never a retry.

use crate::codec::{encode, LineDecoder};
use crate::error::{GossipNetError, Result};
use crate::message::Message;
use crate::types::NodeId;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Opens a connection to `target` within `net_timeout`.
pub async fn connect(target: &NodeId, net_timeout: Duration) -> Result<TcpStream> {
    match timeout(net_timeout, TcpStream::connect(target.addr())).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(GossipNetError::Network(format!(
            "connect {target} failed: {e}"
        ))),
        Err(_) => Err(GossipNetError::Timeout(format!("connect {target}"))),
    }
}

/// Writes one framed message within `net_timeout`.
pub async fn write_frame(
    stream: &mut TcpStream,
    msg: &Message,
    net_timeout: Duration,
) -> Result<()> {
    let frame = encode(msg)?;
    match timeout(net_timeout, stream.write_all(&frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(GossipNetError::Network(format!("write failed: {e}"))),
        Err(_) => Err(GossipNetError::Timeout("write".into())),
    }
}

/// Reads until one decodable message arrives or `deadline` elapses.
pub async fn read_frame(
    stream: &mut TcpStream,
    decoder: &mut LineDecoder,
    deadline: Duration,
) -> Result<Message> {
    let read_loop = async {
        let mut buf = [0u8; 4096];
        loop {
            let n = stream
                .read(&mut buf)
                .await
                .map_err(|e| GossipNetError::Network(format!("read failed: {e}")))?;
            if n == 0 {
                return Err(GossipNetError::Network("connection closed".into()));
            }
            let mut msgs = decoder.decode(&buf[..n])?;
            if !msgs.is_empty() {
                // Per-connection order is preserved: hand back the first
                // decodable frame.
                return Ok(msgs.remove(0));
            }
        }
    };
    match timeout(deadline, read_loop).await {
        Ok(res) => res,
        Err(_) => Err(GossipNetError::Timeout("read".into())),
    }
}

/// Fire-and-forget: connect, write one message, close.
pub async fn send(target: &NodeId, msg: &Message, net_timeout: Duration) -> Result<()> {
    let mut stream = connect(target, net_timeout).await?;
    write_frame(&mut stream, msg, net_timeout).await?;
    let _ = stream.shutdown().await;
    Ok(())
}

/// Request/response over one short-lived connection: connect, write `msg`,
/// wait up to `reply_timeout` for the first decodable reply.
pub async fn request(
    target: &NodeId,
    msg: &Message,
    net_timeout: Duration,
    reply_timeout: Duration,
) -> Result<Message> {
    let mut stream = connect(target, net_timeout).await?;
    write_frame(&mut stream, msg, net_timeout).await?;
    let mut decoder = LineDecoder::new();
    read_frame(&mut stream, &mut decoder, reply_timeout).await
}
