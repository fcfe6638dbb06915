// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Plain HTTP+JSON event delivery for peers that cannot speak gRPC.
//!
//! Routes:
//! * `POST /sources/{source_id}/events`: one event object or an array of them;
//! * `POST /events`: same, on the default source stream;
//! * `GET /health`, `GET /metrics`.
//!
//! Validation failures answer `200` with `success: false`, mirroring the gRPC
//! services. Only a busy or closed worker pool changes the status code.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use riffle_proto::wire;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::dispatcher::DispatcherCore;
use crate::metrics::{DispatchMetricsSnapshot, ReactionMetricsSnapshot};
use crate::pool::{PoolError, WorkerPool};
use crate::reaction::ReactionHandlerCore;

#[derive(Clone)]
struct HttpState {
    dispatcher: Arc<DispatcherCore>,
    reactions: Arc<ReactionHandlerCore>,
    pool: WorkerPool,
}

/// Request body: a single event object or an array of events.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EventsBody {
    /// Array body, dispatched as one batch.
    Many(Vec<wire::SourceChangeEvent>),
    /// Object body.
    One(wire::SourceChangeEvent),
}

/// `GET /metrics` body.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsBody {
    /// Dispatcher counters.
    pub dispatch: DispatchMetricsSnapshot,
    /// Reaction handler counters.
    pub reaction: ReactionMetricsSnapshot,
}

/// Router serving the HTTP variant.
pub fn router(
    dispatcher: Arc<DispatcherCore>,
    reactions: Arc<ReactionHandlerCore>,
    pool: WorkerPool,
) -> Router {
    Router::new()
        .route("/sources/{source_id}/events", post(source_events))
        .route("/events", post(default_events))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(HttpState {
            dispatcher,
            reactions,
            pool,
        })
}

fn busy(err: PoolError) -> Response {
    warn!(%err, "http request refused");
    let status = match err {
        PoolError::Busy { .. } => StatusCode::TOO_MANY_REQUESTS,
        PoolError::Closed => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(json!({ "success": false, "message": err.to_string() }))).into_response()
}

async fn source_events(
    State(state): State<HttpState>,
    Path(source_id): Path<String>,
    Json(body): Json<EventsBody>,
) -> Response {
    let _permit = match state.pool.acquire().await {
        Ok(permit) => permit,
        Err(err) => return busy(err),
    };
    let events = match body {
        EventsBody::Many(events) => events,
        EventsBody::One(event) => vec![event],
    };
    let batch = wire::EventBatch {
        source_id,
        events,
        ..wire::EventBatch::default()
    };
    let response = state.dispatcher.dispatch_batch(batch).await;
    Json(wire::DispatchResponse::from(response)).into_response()
}

async fn default_events(State(state): State<HttpState>, Json(body): Json<EventsBody>) -> Response {
    let _permit = match state.pool.acquire().await {
        Ok(permit) => permit,
        Err(err) => return busy(err),
    };
    let response = match body {
        EventsBody::One(event) => state.dispatcher.dispatch_single(event).await,
        EventsBody::Many(events) => state.dispatcher.dispatch_default(events).await,
    };
    Json(wire::DispatchResponse::from(response)).into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics(State(state): State<HttpState>) -> Json<MetricsBody> {
    Json(MetricsBody {
        dispatch: state.dispatcher.metrics().snapshot(),
        reaction: state.reactions.metrics().snapshot(),
    })
}
