mod broadcast;
mod config;
mod error;
mod http;
mod node;
mod shutdown;

use crate::broadcast::{Broadcaster, ChannelBroadcaster, FanoutBroadcaster, MqttBroadcaster};
use crate::config::Config;
use crate::node::IngestNode;
use crate::shutdown::ShutdownCoordinator;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,gps_worker=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let channel = Arc::new(ChannelBroadcaster::new(config.channel_capacity));
    let mut mqtt_drain = None;
    let broadcaster: Arc<dyn Broadcaster> = match &config.mqtt {
        Some(mqtt_config) => {
            let (mqtt, drain) = MqttBroadcaster::new(mqtt_config)?;
            mqtt_drain = Some(drain);
            let targets: Vec<Arc<dyn Broadcaster>> = vec![
                channel.clone() as Arc<dyn Broadcaster>,
                Arc::new(mqtt) as Arc<dyn Broadcaster>,
            ];
            Arc::new(FanoutBroadcaster::new(targets))
        }
        None => channel.clone(),
    };
    let node = IngestNode::new(broadcaster);

    let app = http::router(http::HttpState {
        node: node.clone(),
        channel: channel.clone(),
        started_at: chrono::Utc::now(),
    });
    let listener = tokio::net::TcpListener::bind(&config.http_bind)
        .await
        .with_context(|| format!("failed to bind gps-worker listener on {}", config.http_bind))?;
    tracing::info!(bind=%config.http_bind, "gps-worker HTTP listening");

    let accept = CancellationToken::new();
    let coordinator = ShutdownCoordinator::new(node.clone(), config.drain_window, accept.clone());
    let mut shutdown_handle = tokio::spawn(coordinator.run(shutdown::wait_for_termination()));

    let serve_accept = accept.clone();
    let mut http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(serve_accept.cancelled_owned())
            .await
    });

    tokio::select! {
        res = &mut shutdown_handle => {
            let report = res.context("shutdown coordinator panicked")?;
            match tokio::time::timeout(config.shutdown_timeout, &mut http_handle).await {
                Ok(Ok(Err(err))) => tracing::warn!(error=%err, "HTTP server error during shutdown"),
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = config.shutdown_timeout.as_millis() as u64,
                        "HTTP server did not stop in time; exiting anyway"
                    );
                    http_handle.abort();
                }
            }
            tracing::info!(flushed = report.flushed, "gps-worker stopped");
        }
        res = &mut http_handle => {
            shutdown_handle.abort();
            res.context("HTTP server task panicked")?
                .context("HTTP server exited")?;
            tracing::warn!("HTTP server exited before a termination signal");
        }
    }

    if let Some(drain) = mqtt_drain {
        drain.finish(config.shutdown_timeout).await;
    }
    Ok(())
}
