use crate::forward::RelayError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gps_telemetry::INVALID_GPS_DATA;
use serde::Serialize;

pub const RELAY_FAILED: &str = "Relay failed";

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: &'static str,
    pub details: Option<String>,
}

impl ApiError {
    pub fn invalid_payload() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: INVALID_GPS_DATA,
            details: None,
        }
    }

    pub fn relay_failed(err: &RelayError) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: RELAY_FAILED,
            details: Some(err.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}
