mod config;
mod fleet;

use crate::config::Config;
use crate::fleet::Fleet;
use anyhow::{Context, Result};
use gps_telemetry::TelemetryReport;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::MissedTickBehavior;
use url::Url;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,gps_simulator=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

/// Posts one report; returns whether the target answered 2xx.
async fn send_report(client: &reqwest::Client, target: &Url, report: &TelemetryReport) -> bool {
    let device_id = report.device_id();
    match client.post(target.clone()).json(report).send().await {
        Ok(response) if response.status().is_success() => {
            tracing::debug!(
                %device_id,
                latitude = ?report.latitude(),
                longitude = ?report.longitude(),
                status = response.status().as_u16(),
                "report sent"
            );
            true
        }
        Ok(response) => {
            tracing::warn!(%device_id, status = response.status().as_u16(), "report refused");
            false
        }
        Err(err) if err.is_timeout() => {
            tracing::warn!(%device_id, "report timed out");
            false
        }
        Err(err) => {
            tracing::warn!(%device_id, error = %err, "report failed");
            false
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut fleet = Fleet::new(config.area, config.fleet_size, rng);
    let client = reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .context("failed to build simulator HTTP client")?;
    tracing::info!(
        target_url = %config.target_url,
        devices = fleet.len(),
        interval_ms = config.interval.as_millis() as u64,
        "gps-simulator running"
    );

    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let (mut rounds, mut sent, mut failed) = (0u64, 0u64, 0u64);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            res = tokio::signal::ctrl_c() => {
                if let Err(err) = res {
                    tracing::warn!(error=%err, "failed to listen for Ctrl-C");
                }
                break;
            }
        }

        let reports = fleet
            .next_round(chrono::Local::now().naive_local())
            .context("simulator built an invalid report")?;
        for report in &reports {
            if send_report(&client, &config.target_url, report).await {
                sent += 1;
            } else {
                failed += 1;
            }
        }
        rounds += 1;
        tracing::info!(round = rounds, sent, failed, "batch complete");

        if config.rounds.is_some_and(|max| rounds >= max) {
            break;
        }
    }

    tracing::info!(rounds, sent, failed, "gps-simulator stopped");
    Ok(())
}
