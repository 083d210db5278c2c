//! WebSocket sessions.
//!
//! Each socket drives one [`Session`]. Text frames carry JSON envelopes and
//! binary frames carry length-prefixed MessagePack; outbound events go out in
//! whichever format the client used last.

use crate::handlers::AppState;
use crate::metrics::{self, ConnectionMetricsGuard};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use bytes::BytesMut;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};
use vanish_core::{BrokerError, Session};
use vanish_protocol::{codec, ClientEvent, ProtocolError, ServerEvent};

/// Frame format of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    Json,
    MessagePack,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (mut session, mut outbound) = Session::new(state.broker.clone());
    let connection = session.connection_id();
    debug!(connection = %connection, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();
    let mut format = WireFormat::Json;
    let mut read_buffer = BytesMut::with_capacity(4096);

    loop {
        tokio::select! {
            biased;

            event = outbound.recv() => {
                let Some(event) = event else {
                    debug!(connection = %connection, "Outbound queue closed, closing socket");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                if let ServerEvent::RoomClosed { room_code } = event.as_ref() {
                    session.room_closed(room_code);
                }
                if let Err(e) = send_event(&mut sender, &event, format).await {
                    debug!(connection = %connection, error = %e, "Failed to send event");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        format = WireFormat::Json;
                        match codec::decode_text(&text) {
                            Ok(event) => apply(&mut session, event),
                            Err(e) => reject(&session, &e),
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        format = WireFormat::MessagePack;
                        read_buffer.extend_from_slice(&data);
                        loop {
                            match codec::decode_from::<ClientEvent>(&mut read_buffer) {
                                Ok(Some(event)) => apply(&mut session, event),
                                Ok(None) => break,
                                Err(e) => {
                                    reject(&session, &e);
                                    read_buffer.clear();
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(connection = %connection, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Dropping the session announces departures to the rooms it joined.
    drop(session);
    debug!(connection = %connection, "WebSocket disconnected");
}

fn apply(session: &mut Session, event: ClientEvent) {
    let kind = match &event {
        ClientEvent::JoinRoom { .. } => "join_room",
        ClientEvent::LeaveRoom { .. } => "leave_room",
        ClientEvent::TypingStart { .. } => "typing_start",
        ClientEvent::TypingStop { .. } => "typing_stop",
        ClientEvent::UserStatus { .. } => "user_status",
    };
    if let Err(err) = session.handle(event) {
        debug!(connection = %session.connection_id(), event = kind, error = %err, "Event rejected");
        metrics::record_error(err.kind());
        session.reply_error(&err);
    }
}

fn reject(session: &Session, err: &ProtocolError) {
    let err = BrokerError::InvalidInput(err.to_string());
    metrics::record_error(err.kind());
    session.reply_error(&err);
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
    format: WireFormat,
) -> anyhow::Result<()> {
    let message = match format {
        WireFormat::Json => Message::Text(codec::encode_text(event)?),
        WireFormat::MessagePack => Message::Binary(codec::encode_binary(event)?.to_vec()),
    };
    sender.send(message).await?;
    Ok(())
}
