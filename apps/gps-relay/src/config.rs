use anyhow::{Context, Result};
use gps_telemetry::env::{env_port, env_string, env_u64, load_dotenv};
use std::time::Duration;
use url::Url;

const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_UPSTREAM_URL: &str = "https://gps-tracker-69gb.onrender.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub http_bind: String,
    pub upstream_url: Url,
    pub timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        load_dotenv();

        let port = env_port(DEFAULT_PORT)?;
        let host = env_string("GPS_RELAY_BIND_HOST", Some("0.0.0.0".to_string()))?;
        let upstream_raw =
            env_string("GPS_RELAY_UPSTREAM_URL", Some(DEFAULT_UPSTREAM_URL.to_string()))?;
        let upstream_url = Url::parse(&upstream_raw).context("invalid GPS_RELAY_UPSTREAM_URL")?;
        let timeout = Duration::from_millis(env_u64("GPS_RELAY_TIMEOUT_MS", Some(10_000))?.max(1));

        Ok(Self {
            http_bind: format!("{host}:{port}"),
            upstream_url,
            timeout,
        })
    }
}
