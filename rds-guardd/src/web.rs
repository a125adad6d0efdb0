// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Web/WS Facade (spec.md §6 "HTTP surface"): a thin read-mostly view over
//! the Event Store and Pipeline Supervisor, plus a `/ws/console` relay of
//! the Alert Publisher's broadcast channel. Grounded on the other example
//! pack's axum WS-upgrade handler shape (split sink/source tasks joined
//! with `tokio::select!`) — the teacher itself serves its listener over a
//! raw framed TCP protocol rather than HTTP, so the routing/handler idiom
//! here is adapted from there instead (see DESIGN.md).

use std::path::PathBuf;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{delete, get};
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use rds_store::EventStoreHandle;
use serde::Deserialize;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::alert::WsEnvelope;
use crate::supervisor::SharedStatus;

const INDEX_HTML: &str = include_str!("../static/index.html");

#[derive(Clone)]
struct AppState {
    store: EventStoreHandle,
    status: SharedStatus,
    ws_tx: broadcast::Sender<WsEnvelope>,
    audio_dir: PathBuf,
}

pub fn router(store: EventStoreHandle, status: SharedStatus, ws_tx: broadcast::Sender<WsEnvelope>, audio_dir: PathBuf) -> Router {
    let state = AppState { store, status, ws_tx, audio_dir };
    Router::new()
        .route("/", get(index))
        .route("/api/events", get(list_events))
        .route("/api/events/active", get(active_events))
        .route("/api/status", get(status_handler))
        .route("/api/audio/{filename}", get(audio_file))
        .route("/api/events", delete(clear_events))
        .route("/ws/console", get(ws_console))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Spawns the HTTP server task (spec.md §6 "HTTP surface"); returns once
/// the listener itself fails to bind, or never, since axum's `serve`
/// future only resolves on a fatal accept-loop error.
pub async fn serve(listen: &str, port: u16, router: Router) -> Result<(), rds_core::RdsError> {
    let addr = format!("{listen}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| rds_core::RdsError::Config(format!("binding http listener on {addr}: {e}")))?;
    tracing::info!(addr, "http facade listening");
    axum::serve(listener, router)
        .await
        .map_err(|e| rds_core::RdsError::Config(format!("http server error: {e}")))
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(rename = "type")]
    event_type: Option<String>,
    since: Option<chrono::DateTime<chrono::Utc>>,
    limit: Option<i64>,
    offset: Option<i64>,
}

fn parse_event_type(raw: &str) -> Result<rds_core::EventType, String> {
    match raw {
        "traffic" => Ok(rds_core::EventType::Traffic),
        "emergency" => Ok(rds_core::EventType::Emergency),
        "eon_traffic" => Ok(rds_core::EventType::EonTraffic),
        other => Err(format!("unknown event type {other:?}, expected traffic|emergency|eon_traffic")),
    }
}

async fn list_events(State(state): State<AppState>, Query(q): Query<EventsQuery>) -> Response {
    let event_type = match q.event_type.as_deref().map(parse_event_type) {
        Some(Ok(t)) => Some(t),
        Some(Err(msg)) => return (StatusCode::BAD_REQUEST, msg).into_response(),
        None => None,
    };
    let filter = rds_store::EventFilter { event_type, since: q.since };
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    let offset = q.offset.unwrap_or(0).max(0);
    match state.store.events(filter, limit, offset).await {
        Ok((total, events)) => axum::Json(serde_json::json!({ "total": total, "events": events })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn active_events(State(state): State<AppState>) -> Response {
    match state.store.active_events().await {
        Ok(events) => axum::Json(serde_json::json!({ "events": events })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn status_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.status.snapshot();
    let uptime_sec = snapshot.started_at.map(|t| (chrono::Utc::now() - t).num_seconds().max(0));
    axum::Json(serde_json::json!({
        "pipeline": {
            "state": snapshot.state,
            "mode": snapshot.mode,
            "last_error": snapshot.last_error,
            "uptime_sec": uptime_sec,
        },
        "stations": snapshot.stations,
    }))
    .into_response()
}

/// Rejects any filename containing a path separator so a crafted
/// `../../etc/passwd` can't escape `audio_dir` (spec.md §8 property 2
/// "streams a well-formed file ... or 404, never partial/corrupt").
fn content_type_for(filename: &str) -> Option<&'static str> {
    if filename.ends_with(".ogg") {
        Some("audio/ogg")
    } else if filename.ends_with(".wav") {
        Some("audio/wav")
    } else {
        None
    }
}

async fn audio_file(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    if filename.contains('/') || filename.contains("..") {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some(content_type) = content_type_for(&filename) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let path = state.audio_dir.join(&filename);
    match tokio::fs::read(&path).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type)], bytes).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn clear_events(State(state): State<AppState>) -> Response {
    match state.store.clear_all().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn ws_console(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_console_ws(socket, state.ws_tx.subscribe()))
}

/// Relays the Alert Publisher's broadcast stream to one browser connection
/// (spec.md §6 "pushes `{topic, payload, timestamp}`"). The console is
/// output-only; any inbound frame just keeps the socket alive until the
/// browser closes it or the broadcast lags and drops the subscriber.
async fn handle_console_ws(socket: WebSocket, mut rx: broadcast::Receiver<WsEnvelope>) {
    let (mut sender, mut receiver) = socket.split();

    let mut forward = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    let Ok(text) = serde_json::to_string(&envelope) else { continue };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "ws console subscriber lagged, dropping messages");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut drain_inbound = tokio::spawn(async move { while receiver.next().await.is_some() {} });

    tokio::select! {
        _ = &mut forward => drain_inbound.abort(),
        _ = &mut drain_inbound => forward.abort(),
    }
}
