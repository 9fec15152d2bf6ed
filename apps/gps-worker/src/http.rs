use crate::broadcast::{ChannelBroadcaster, ChannelMessage};
use crate::error::ApiError;
use crate::node::{BroadcastMode, IngestNode, IngestStatsSnapshot};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use futures::Stream;
use gps_telemetry::MAX_REPORT_BYTES;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct HttpState {
    pub node: IngestNode,
    pub channel: Arc<ChannelBroadcaster>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct ReceivedResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    mode: BroadcastMode,
    pending: usize,
    subscribers: usize,
    started_at: DateTime<Utc>,
    stats: IngestStatsSnapshot,
}

async fn index() -> &'static str {
    "GPS worker online"
}

async fn healthz() -> &'static str {
    "ok"
}

async fn post_gps(
    State(state): State<HttpState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<ReceivedResponse>, ApiError> {
    let body = body.map_err(|rejection| {
        tracing::warn!(error = %rejection, "unreadable GPS payload");
        ApiError::invalid_payload()
    })?;
    state.node.submit_raw(&body)?;
    Ok(Json(ReceivedResponse { status: "received" }))
}

async fn get_status(State(state): State<HttpState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        mode: state.node.mode(),
        pending: state.node.pending_len(),
        subscribers: state.channel.subscriber_count(),
        started_at: state.started_at,
        stats: state.node.stats(),
    })
}

async fn events(
    State(state): State<HttpState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if state.channel.is_closed() {
        return Err(ApiError::shutting_down());
    }
    let rx = state.channel.subscribe();
    tracing::debug!(subscribers = state.channel.subscriber_count(), "subscriber connected");

    let stream = BroadcastStream::new(rx)
        .take_while(|message| !matches!(message, Ok(ChannelMessage::Closed)))
        .filter_map(|message| match message {
            Ok(ChannelMessage::Event(event)) => Some(Ok::<_, Infallible>(
                Event::default().event(event.name).data(event.data.as_str()),
            )),
            Ok(ChannelMessage::Closed) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "slow subscriber missed GPS updates");
                None
            }
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/v1/status", get(get_status))
        .route("/gps", post(post_gps))
        .route("/events", get(events))
        .layer(DefaultBodyLimit::max(MAX_REPORT_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
