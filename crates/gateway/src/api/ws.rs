//! WebSocket endpoint — `GET /api/v1/ws`.
//!
//! Flow:
//! 1. Origin check against the startup allowlist, then upgrade.
//! 2. Server sends `{"type":"connected"}`.
//! 3. Read loop honours `ping` / `subscribe` / `unsubscribe` control
//!    frames; a dedicated writer task drains the connection's bounded
//!    send buffer.
//! 4. A client that cannot keep up is closed with policy-violation
//!    (1008); a write error closes only that connection.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::events::connections::OutboundFrame;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlMessage {
    Ping,
    Subscribe { session_id: String },
    Unsubscribe { session_id: String },
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok());
    if !state.origins.allows(origin) {
        tracing::warn!(origin = origin.unwrap_or("<none>"), "WebSocket origin rejected");
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();
    let mut outbound = state.connections.register(&conn_id);

    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    if !state.connections.push(
        &conn_id,
        OutboundFrame::Text(r#"{"type":"connected"}"#.to_string()),
    ) {
        state.connections.remove(&conn_id);
        return;
    }

    // Writer: the only task touching the sink.
    let writer_conn_id = conn_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match frame {
                OutboundFrame::Text(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                OutboundFrame::SlowConsumer => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::POLICY,
                            reason: "subscriber too slow".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
        tracing::debug!(conn_id = %writer_conn_id, "WebSocket writer stopped");
    });

    // Reader: control frames until close or shutdown.
    loop {
        let message = tokio::select! {
            message = stream.next() => message,
            _ = state.shutdown.cancelled() => break,
        };
        let Some(Ok(message)) = message else { break };

        match message {
            Message::Text(text) => match serde_json::from_str::<ControlMessage>(&text) {
                Ok(ControlMessage::Ping) => {
                    state.connections.push(
                        &conn_id,
                        OutboundFrame::Text(r#"{"type":"pong"}"#.to_string()),
                    );
                }
                Ok(ControlMessage::Subscribe { session_id }) => {
                    state.connections.subscribe(&conn_id, &session_id);
                    tracing::debug!(conn_id = %conn_id, session_id = %session_id, "subscribed");
                }
                Ok(ControlMessage::Unsubscribe { session_id }) => {
                    state.connections.unsubscribe(&conn_id, &session_id);
                    tracing::debug!(conn_id = %conn_id, session_id = %session_id, "unsubscribed");
                }
                Err(_) => {
                    tracing::debug!(conn_id = %conn_id, "ignoring unparseable control frame");
                }
            },
            Message::Close(_) => break,
            // axum answers protocol-level pings itself.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }

    state.connections.remove(&conn_id);
    writer.abort();
    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frames_parse() {
        assert!(matches!(
            serde_json::from_str::<ControlMessage>(r#"{"type":"ping"}"#).unwrap(),
            ControlMessage::Ping
        ));
        match serde_json::from_str::<ControlMessage>(
            r#"{"type":"subscribe","session_id":"s1"}"#,
        )
        .unwrap()
        {
            ControlMessage::Subscribe { session_id } => assert_eq!(session_id, "s1"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_control_type_is_an_error() {
        assert!(serde_json::from_str::<ControlMessage>(r#"{"type":"shout"}"#).is_err());
    }
}
