use crate::error::ApiError;
use crate::forward::{Forwarder, UpstreamResponse};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::Router;
use gps_telemetry::{TelemetryReport, MAX_REPORT_BYTES};
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct HttpState {
    pub forwarder: Forwarder,
}

async fn index() -> &'static str {
    "GPS relay is up and forwarding GPS data"
}

async fn healthz() -> &'static str {
    "ok"
}

async fn relay(
    State(state): State<HttpState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<UpstreamResponse, ApiError> {
    let body = body.map_err(|rejection| {
        tracing::warn!(error = %rejection, "unreadable GPS payload");
        ApiError::invalid_payload()
    })?;
    let report = TelemetryReport::parse(&body).map_err(|err| {
        tracing::warn!(error=%err, "rejected invalid GPS payload");
        ApiError::invalid_payload()
    })?;
    let device_id = report.device_id();

    match state.forwarder.forward(body).await {
        Ok(upstream) => {
            tracing::info!(%device_id, status = upstream.status.as_u16(), "relayed GPS report");
            Ok(upstream)
        }
        Err(err) => {
            tracing::error!(
                %device_id,
                upstream = %state.forwarder.target(),
                error = %err,
                "relay failed"
            );
            Err(ApiError::relay_failed(&err))
        }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/relay", post(relay))
        .route("/gps", post(relay))
        .layer(DefaultBodyLimit::max(MAX_REPORT_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
