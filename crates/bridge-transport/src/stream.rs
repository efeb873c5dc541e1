//! Line-delimited JSON stream-socket transport: accept loop, a 4 KiB recv
//! buffer accumulated until `\n`, `device_id -> socket` registration keyed
//! off the first successful `announce`, and an immediate
//! `status {online:false}` synthesis on disconnect.

use crate::handler::ProtocolHandler;
use crate::hub::TransportHub;
use bridge_core::registry::Protocol;
use bridge_wire::{Leaf, Topic};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Per-connection receive buffer size, accumulated until a newline closes
/// out a complete frame.
const RECV_CHUNK: usize = 4096;

#[derive(serde::Deserialize)]
struct Frame {
    topic: String,
    payload: Value,
}

pub async fn run_stream_server(bind_addr: &str, handler: Arc<ProtocolHandler>, hub: Arc<TransportHub>) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(bind_addr, "stream transport listening");
    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::debug!(%peer, "accepted stream connection");
        let handler = handler.clone();
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, handler, hub).await {
                tracing::warn!(%peer, error = %e, "stream connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    socket: TcpStream,
    handler: Arc<ProtocolHandler>,
    hub: Arc<TransportHub>,
) -> std::io::Result<()> {
    let (mut reader, mut write_half) = socket.into_split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            let Ok(mut bytes) = serde_json::to_vec(&line) else { continue };
            bytes.push(b'\n');
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut device_id: Option<String> = None;
    let mut acc: Vec<u8> = Vec::new();
    let mut chunk = [0u8; RECV_CHUNK];

    let result = loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(e),
        };
        acc.extend_from_slice(&chunk[..n]);

        while let Some(pos) = acc.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = acc.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }
            let frame: Frame = match serde_json::from_slice(line) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring malformed stream frame");
                    continue;
                }
            };
            let Some(topic) = Topic::parse(&frame.topic) else {
                tracing::warn!(topic = %frame.topic, "ignoring frame with unrecognized topic");
                continue;
            };

            if topic.leaf == Leaf::Announce && device_id.is_none() {
                device_id = Some(topic.device_id.clone());
                hub.bind_stream(&topic.device_id, tx.clone());
            }

            let outcome = handler.dispatch(&topic, frame.payload, Protocol::Stream).await;
            tracing::debug!(?outcome, topic = %frame.topic, "stream frame dispatched");
        }
    };

    if let Some(device_id) = &device_id {
        hub.unbind_stream(device_id);
        handler.handle_disconnect(device_id);
    }
    writer_task.abort();
    result
}
