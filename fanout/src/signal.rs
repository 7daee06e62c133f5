//! WebSocket connection to the signaling server
//!
//! Outbound messages are drained from the SFU's channel by a writer task;
//! inbound text frames are parsed and handed to the dispatch loop.

use fanout_sfu::{InboundMessage, OutboundMessage};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Parse one text frame. Frames that are not valid JSON are logged and
/// skipped.
fn parse_frame(text: &str) -> Option<InboundMessage> {
    match InboundMessage::from_json(text) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(error = %e, len = text.len(), "Unparsable signaling message");
            None
        }
    }
}

/// Connect, announce the SFU, and pump messages until the socket closes or
/// `shutdown` fires.
pub async fn run(
    url: &str,
    identify: OutboundMessage,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
    shutdown: CancellationToken,
) -> Result<(), SignalingError> {
    let (ws_stream, _) = connect_async(url).await?;
    info!(url = %url, "Connected to signaling server");

    let (mut ws_write, mut ws_read) = ws_stream.split();
    ws_write.send(Message::Text(identify.to_json()?)).await?;

    let writer_shutdown = shutdown.clone();
    let writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                () = writer_shutdown.cancelled() => break,
                message = outbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "Failed to serialize signaling message");
                    continue;
                }
            };
            if let Err(e) = ws_write.send(Message::Text(text)).await {
                warn!(error = %e, "Failed to send signaling message");
                break;
            }
        }
        let _ = ws_write.close().await;
    });

    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => break,
            frame = ws_read.next() => frame,
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                if let Some(message) = parse_frame(&text) {
                    if inbound.send(message).is_err() {
                        debug!("SFU dispatch loop gone, closing signaling");
                        break;
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                info!("Signaling server closed the connection");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                match &e {
                    WsError::ConnectionClosed | WsError::AlreadyClosed => {
                        debug!(error = %e, "Signaling connection closed");
                    }
                    _ => warn!(error = %e, "Signaling connection error"),
                }
                break;
            }
        }
    }

    shutdown.cancel();
    let _ = writer.await;
    Ok(())
}
