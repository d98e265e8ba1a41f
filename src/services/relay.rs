//! Bridges a WebSocket device onto the in-process broker, realizing the
//! pub/sub primitive for devices on other machines.
//!
//! Outbound hub traffic (envelopes and presence) is forwarded as JSON text
//! frames; inbound frames are parsed as typed messages and published on the
//! device's behalf, so every envelope on a topic carries a uniform sender id
//! and timestamp regardless of where the device runs.

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    dto::{Message, RelayFrame},
    state::SharedState,
    transport::{ChannelEvent, GameChannel},
};

/// Handle the full lifecycle of one bridged device connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket, code: String, device_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();

    // Dedicated writer task keeps outbound frames flowing even while we
    // await inbound ones.
    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    let channel = state.hub().connect(&code, &device_id);
    let mut events = channel.subscribe();
    info!(code = %code, device = %device_id, "device bridged onto topic");

    // Forward hub events to the socket until the topic or the socket dies.
    let forward_tx = outbound_tx.clone();
    let forwarder: JoinHandle<()> = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let frame = match event {
                ChannelEvent::Message(envelope) => RelayFrame::Message(envelope),
                ChannelEvent::Presence(presence) => RelayFrame::Presence(presence),
            };
            match serde_json::to_string(&frame) {
                Ok(text) => {
                    if forward_tx.send(WsMessage::Text(text.into())).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "failed to serialize relay frame");
                }
            }
        }
    });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<Message>(&text) {
                Ok(Message::Unknown) => {
                    debug!(device = %device_id, "dropping message of unknown type");
                }
                Ok(parsed) => {
                    if channel.send(parsed).is_err() {
                        warn!(device = %device_id, "topic channel closed; dropping connection");
                        break;
                    }
                }
                Err(err) => {
                    warn!(device = %device_id, error = %err, "failed to parse device message");
                }
            },
            Ok(WsMessage::Ping(payload)) => {
                let _ = outbound_tx.send(WsMessage::Pong(payload));
            }
            Ok(WsMessage::Close(frame)) => {
                info!(device = %device_id, "device closed");
                let _ = outbound_tx.send(WsMessage::Close(frame));
                break;
            }
            Ok(WsMessage::Binary(_)) | Ok(WsMessage::Pong(_)) => {}
            Err(err) => {
                warn!(device = %device_id, error = %err, "websocket error");
                break;
            }
        }
    }

    // Announce the departure to peers before tearing the tasks down.
    channel.close();
    forwarder.abort();
    finalize(writer_task, outbound_tx).await;
    info!(code = %code, device = %device_id, "device disconnected");
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<WsMessage>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
