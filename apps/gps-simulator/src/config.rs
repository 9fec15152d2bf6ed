use crate::fleet::{Area, MAX_FLEET_SIZE};
use anyhow::{bail, Context, Result};
use gps_telemetry::env::{env_f64, env_optional, env_string, env_u64, load_dotenv};
use std::time::Duration;
use url::Url;

pub const DEFAULT_TARGET_URL: &str = "http://127.0.0.1:3000/relay";

#[derive(Debug, Clone)]
pub struct Config {
    pub target_url: Url,
    pub interval: Duration,
    pub timeout: Duration,
    pub fleet_size: usize,
    pub area: Area,
    pub seed: Option<u64>,
    pub rounds: Option<u64>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        load_dotenv();

        let target_raw = env_string("GPS_SIM_TARGET_URL", Some(DEFAULT_TARGET_URL.to_string()))?;
        let target_url = Url::parse(&target_raw).context("invalid GPS_SIM_TARGET_URL")?;
        let interval = Duration::from_millis(env_u64("GPS_SIM_INTERVAL_MS", Some(10_000))?.max(1));
        let timeout = Duration::from_millis(env_u64("GPS_SIM_TIMEOUT_MS", Some(10_000))?.max(1));
        let fleet_size = fleet_size(env_u64("GPS_SIM_DEVICES", Some(30))?)?;
        let area = area(
            env_f64("GPS_SIM_CENTER_LAT", Some(-33.4452))?,
            env_f64("GPS_SIM_CENTER_LON", Some(150.1528))?,
            env_f64("GPS_SIM_SPREAD_DEG", Some(0.0067))?,
            env_f64("GPS_SIM_STEP_DEG", Some(0.0001))?,
        )?;
        let seed = optional_u64("GPS_SIM_SEED")?;
        let rounds = optional_u64("GPS_SIM_ROUNDS")?.filter(|rounds| *rounds > 0);

        Ok(Self {
            target_url,
            interval,
            timeout,
            fleet_size,
            area,
            seed,
            rounds,
        })
    }
}

fn optional_u64(key: &str) -> Result<Option<u64>> {
    env_optional(key)
        .map(|raw| raw.parse::<u64>().with_context(|| format!("invalid {key}")))
        .transpose()
}

fn fleet_size(raw: u64) -> Result<usize> {
    if raw == 0 || raw > MAX_FLEET_SIZE as u64 {
        bail!("GPS_SIM_DEVICES must be between 1 and {MAX_FLEET_SIZE}, got {raw}");
    }
    Ok(raw as usize)
}

fn area(center_lat: f64, center_lon: f64, spread: f64, step: f64) -> Result<Area> {
    if !(-90.0..=90.0).contains(&center_lat) {
        bail!("GPS_SIM_CENTER_LAT must be within [-90, 90], got {center_lat}");
    }
    if !(-180.0..=180.0).contains(&center_lon) {
        bail!("GPS_SIM_CENTER_LON must be within [-180, 180], got {center_lon}");
    }
    if spread < 0.0 || step < 0.0 {
        bail!("GPS_SIM_SPREAD_DEG and GPS_SIM_STEP_DEG must not be negative");
    }
    Ok(Area {
        center_lat,
        center_lon,
        spread,
        step,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fleet_size_bounds() {
        assert_eq!(fleet_size(30).unwrap(), 30);
        assert!(fleet_size(0).is_err());
        assert!(fleet_size(MAX_FLEET_SIZE as u64 + 1).is_err());
    }

    #[test]
    fn area_rejects_impossible_centres_and_negative_spread() {
        assert!(area(-33.4452, 150.1528, 0.0067, 0.0001).is_ok());
        assert!(area(91.0, 0.0, 0.01, 0.001).is_err());
        assert!(area(0.0, -181.0, 0.01, 0.001).is_err());
        assert!(area(0.0, 0.0, -0.01, 0.001).is_err());
    }
}
