use anyhow::{Context, Result};
use axum::body::{Body, Bytes};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),
    #[error("upstream unreachable: {0}")]
    Transport(String),
    #[error("upstream responded {status}: {body}")]
    Upstream { status: StatusCode, body: String },
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: Bytes,
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        if let Some(content_type) = self.content_type {
            response.headers_mut().insert(CONTENT_TYPE, content_type);
        }
        response
    }
}

/// Forwards report bodies, byte for byte, to `<upstream>/gps`.
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    target: Url,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(upstream: &Url, timeout: Duration) -> Result<Self> {
        let target = gps_endpoint(upstream)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build relay HTTP client")?;
        Ok(Self {
            client,
            target,
            timeout,
        })
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// One attempt, no retry. Anything other than a 2xx answer is an error.
    pub async fn forward(&self, body: Bytes) -> Result<UpstreamResponse, RelayError> {
        let response = self
            .client
            .post(self.target.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| self.classify(err))?;

        let status = response.status();
        let content_type = response.headers().get(CONTENT_TYPE).cloned();
        let body = response.bytes().await.map_err(|err| self.classify(err))?;

        if !status.is_success() {
            return Err(RelayError::Upstream {
                status,
                body: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }

    fn classify(&self, err: reqwest::Error) -> RelayError {
        if err.is_timeout() {
            RelayError::Timeout(self.timeout)
        } else {
            RelayError::Transport(error_chain(&err))
        }
    }
}

fn gps_endpoint(upstream: &Url) -> Result<Url> {
    let base = upstream.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/gps")).with_context(|| format!("invalid upstream url {upstream}"))
}

// reqwest's top-level message hides the cause (refused, dns, tls).
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
