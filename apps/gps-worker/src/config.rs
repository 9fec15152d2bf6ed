use anyhow::{anyhow, bail, Context, Result};
use gps_telemetry::env::{env_optional, env_port, env_string, env_u64, load_dotenv};
use std::time::Duration;
use url::Url;

const DEFAULT_PORT: u16 = 4000;
const MAX_CHANNEL_CAPACITY: u64 = 65_536;

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub client_id: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_bind: String,
    pub drain_window: Duration,
    pub shutdown_timeout: Duration,
    pub channel_capacity: usize,
    pub mqtt: Option<MqttConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        load_dotenv();

        let port = env_port(DEFAULT_PORT)?;
        let host = env_string("GPS_WORKER_BIND_HOST", Some("0.0.0.0".to_string()))?;
        let http_bind = format!("{host}:{port}");

        let drain_window = Duration::from_millis(env_u64("GPS_WORKER_DRAIN_WINDOW_MS", Some(0))?);
        let shutdown_timeout =
            Duration::from_millis(env_u64("GPS_WORKER_SHUTDOWN_TIMEOUT_MS", Some(5000))?);
        let channel_capacity =
            channel_capacity(env_u64("GPS_WORKER_CHANNEL_CAPACITY", Some(1024))?)?;

        let mqtt = match env_optional("GPS_WORKER_MQTT_URL") {
            Some(raw) => Some(mqtt_config(&raw)?),
            None => None,
        };

        Ok(Self {
            http_bind,
            drain_window,
            shutdown_timeout,
            channel_capacity,
            mqtt,
        })
    }
}

fn channel_capacity(raw: u64) -> Result<usize> {
    if raw > MAX_CHANNEL_CAPACITY {
        bail!("GPS_WORKER_CHANNEL_CAPACITY must be at most {MAX_CHANNEL_CAPACITY}, got {raw}");
    }
    Ok(raw.max(1) as usize)
}

fn mqtt_config(raw_url: &str) -> Result<MqttConfig> {
    let url = Url::parse(raw_url).context("invalid GPS_WORKER_MQTT_URL")?;
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| anyhow!("GPS_WORKER_MQTT_URL missing host"))?
        .to_string();
    let port = url.port().unwrap_or(1883);

    Ok(MqttConfig {
        host,
        port,
        username: env_optional("GPS_WORKER_MQTT_USERNAME"),
        password: env_optional("GPS_WORKER_MQTT_PASSWORD"),
        topic_prefix: env_string("GPS_WORKER_MQTT_TOPIC_PREFIX", Some("gps".to_string()))?,
        client_id: env_string("GPS_WORKER_MQTT_CLIENT_ID", Some("gps-worker".to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_capacity_is_bounded() {
        assert_eq!(channel_capacity(0).unwrap(), 1);
        assert_eq!(channel_capacity(1024).unwrap(), 1024);
        assert_eq!(channel_capacity(MAX_CHANNEL_CAPACITY).unwrap(), 65_536);

        let err = channel_capacity(u64::MAX).unwrap_err();
        assert!(err.to_string().contains("GPS_WORKER_CHANNEL_CAPACITY"));
    }

    #[test]
    fn mqtt_url_defaults_port() {
        let config = mqtt_config("mqtt://broker.local").unwrap();
        assert_eq!(config.host, "broker.local");
        assert_eq!(config.port, 1883);
    }

    #[test]
    fn mqtt_url_requires_host() {
        assert!(mqtt_config("mqtt:broker").is_err());
    }
}
