//! WebSocket push channel.
//!
//! One socket per live connection. A single writer task drains the
//! connection's outbound queue; a reader task decodes client frames and
//! hands them to [`Delivery`]. Whichever ends first tears the other down.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use courier_shared::protocol::ErrorPayload;
use courier_shared::{ClientEvent, ServerEvent, UserId};

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::delivery::Delivery;
use crate::presence::ConnectionHandle;

pub async fn ws_handler(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.delivery, me))
}

async fn handle_socket(socket: WebSocket, delivery: Delivery, me: UserId) {
    let (handle, outbound) = match delivery.connect(&me).await {
        Ok(bound) => bound,
        Err(e) => {
            warn!(user = %me, error = %e, "Failed to bind connection");
            return;
        }
    };

    let (sink, stream) = socket.split();

    let mut writer = tokio::spawn(write_loop(sink, outbound, handle.clone()));
    let mut reader = tokio::spawn(read_loop(stream, delivery.clone(), handle.clone()));

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    delivery.disconnect(&handle).await;
}

async fn write_loop(
    mut sink: futures::stream::SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<ServerEvent>,
    handle: ConnectionHandle,
) {
    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else { break };
                let frame = match event.to_json() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(event = event.name(), error = %e, "Failed to encode event");
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(frame)).await.is_err() {
                    debug!(conn = handle.id(), "Socket write failed");
                    break;
                }
            }
            _ = handle.closed() => {
                info!(user = %handle.user_id(), conn = handle.id(), "Connection superseded, closing");
                break;
            }
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    mut stream: futures::stream::SplitStream<WebSocket>,
    delivery: Delivery,
    handle: ConnectionHandle,
) {
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn = handle.id(), error = %e, "Socket read failed");
                break;
            }
        };

        let reply = match ClientEvent::from_json(&text) {
            Ok(event) => delivery.handle_client_event(&handle, event).await,
            Err(e) => {
                debug!(conn = handle.id(), error = %e, "Malformed client frame");
                Some(ServerEvent::Error(ErrorPayload {
                    message: e.to_string(),
                }))
            }
        };

        if let Some(reply) = reply {
            handle.send(reply);
        }
    }
}
