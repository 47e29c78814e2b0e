//! Realtime transports
//!
//! WebSocket `/ws` and SSE `/events` both fan the event bus out to clients
//! with replay: WS takes `afterSeq` as a query parameter, SSE honors the
//! standard `Last-Event-ID` reconnect header (the `id:` field carries the
//! sequence number). Clients treat the two as interchangeable.

use crate::auth::authorize;
use crate::error::ApiResult;
use crate::AppState;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::Response;
use futures::stream::{self, Stream, StreamExt};
use objectdeck_events::Event;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

/// WS close code for auth failure.
const CLOSE_UNAUTHORIZED: u16 = 4401;
/// Normal stream end.
const CLOSE_NORMAL: u16 = 1000;
/// Server shutting down.
const CLOSE_GOING_AWAY: u16 = 1001;

const HEARTBEAT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    pub after_seq: Option<u64>,
    pub token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Response {
    let authed = authorize(
        &state.auth,
        headers.get("x-api-token").and_then(|v| v.to_str().ok()),
        query.token.as_deref(),
        headers.get("host").and_then(|v| v.to_str().ok()),
        headers.get("origin").and_then(|v| v.to_str().ok()),
    )
    .is_ok();
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.after_seq, authed))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: Arc<AppState>,
    after_seq: Option<u64>,
    authed: bool,
) {
    if !authed {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_UNAUTHORIZED,
                reason: "unauthorized".into(),
            })))
            .await;
        return;
    }

    let mut sub = state.bus.subscribe();
    if let Some(after_seq) = after_seq {
        for event in sub.replay_after(after_seq) {
            if send_event(&mut socket, &event).await.is_err() {
                return;
            }
        }
    }

    let close_code = loop {
        tokio::select! {
            event = sub.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            return;
                        }
                    }
                    None => break CLOSE_NORMAL,
                }
            }
            message = socket.recv() => {
                match message {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("websocket error: {e}");
                        return;
                    }
                }
            }
            () = state.shutdown.cancelled() => break CLOSE_GOING_AWAY,
        }
    };

    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code,
            reason: "".into(),
        })))
        .await;
}

async fn send_event(socket: &mut WebSocket, event: &Event) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json.into())).await,
        Err(e) => {
            tracing::error!("serialize event: {e}");
            Ok(())
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseQuery {
    pub last_event_id: Option<u64>,
    #[allow(dead_code)]
    pub token: Option<String>,
}

pub async fn sse_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SseQuery>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let after_seq = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .or(query.last_event_id);

    let sub = state.bus.subscribe();
    let replay = after_seq.map(|seq| sub.replay_after(seq)).unwrap_or_default();
    let shutdown = state.shutdown.clone();

    let live = sub
        .into_stream()
        .take_until(async move { shutdown.cancelled().await });
    let events = stream::iter(replay)
        .chain(live)
        .map(|event| Ok(to_sse_event(&event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(HEARTBEAT)))
}

fn to_sse_event(event: &Event) -> SseEvent {
    let sse = SseEvent::default().id(event.seq.to_string());
    match serde_json::to_string(event) {
        Ok(json) => sse.data(json),
        Err(_) => sse.data("{}"),
    }
}
