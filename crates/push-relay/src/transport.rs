//! Transport seam for the push connection.

use crate::RelayResult;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

const CHANNEL_CAPACITY: usize = 100;

/// One inbound event from an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text message.
    Text(String),
    /// The transport closed or failed. Always the last frame.
    Closed { reason: Option<String> },
}

/// An open connection as seen by the manager.
///
/// Dropping `outbound` closes the transport.
pub struct TransportLink {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<Frame>,
}

/// Opens push-channel transports.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> RelayResult<TransportLink>;
}

/// WebSocket transport over tokio-tungstenite.
///
/// Transport-level pings are answered here; application-level `ping`/`pong`
/// messages are the manager's concern.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, url: &str) -> RelayResult<TransportLink> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<Frame>(CHANNEL_CAPACITY);
        let (control_tx, mut control_rx) = mpsc::channel::<Message>(8);

        // Writer: outbound text plus pong replies. Ends with a close frame
        // once the manager drops its sender.
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    text = out_rx.recv() => match text {
                        Some(text) => Message::Text(text.into()),
                        None => break,
                    },
                    Some(control) = control_rx.recv() => control,
                };
                if write.send(message).await.is_err() {
                    return;
                }
            }
            let _ = write.send(Message::Close(None)).await;
        });

        // Reader
        tokio::spawn(async move {
            let reason = loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if in_tx.send(Frame::Text(text.to_string())).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = control_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| f.reason.to_string())
                            .filter(|reason| !reason.is_empty());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                }
            };
            debug!(reason = ?reason, "WebSocket closed");
            let _ = in_tx.send(Frame::Closed { reason }).await;
        });

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
