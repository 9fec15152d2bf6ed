use chrono::NaiveDateTime;
use gps_telemetry::{ReportError, TelemetryReport};
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::json;

/// Largest fleet that still has a Roman-numeral name for every device.
pub const MAX_FLEET_SIZE: usize = 3999;

const MIN_SATS: u32 = 4;
const MAX_SATS: u32 = 12;

/// Box the fleet roams in: `center +/- spread` degrees on both axes, moving
/// at most `step` degrees per axis each round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Area {
    pub center_lat: f64,
    pub center_lon: f64,
    pub spread: f64,
    pub step: f64,
}

impl Area {
    fn clamp_lat(&self, lat: f64) -> f64 {
        lat.clamp(self.center_lat - self.spread, self.center_lat + self.spread)
    }

    fn clamp_lon(&self, lon: f64) -> f64 {
        lon.clamp(self.center_lon - self.spread, self.center_lon + self.spread)
    }
}

#[derive(Debug, Clone)]
struct Device {
    id: String,
    lat: f64,
    lon: f64,
}

pub struct Fleet {
    area: Area,
    devices: Vec<Device>,
    rng: StdRng,
}

impl Fleet {
    /// Places `size` devices named `I`, `II`, `III`, ... at random points
    /// inside the area.
    pub fn new(area: Area, size: usize, mut rng: StdRng) -> Self {
        let devices = (1..=size.min(MAX_FLEET_SIZE))
            .map(|n| Device {
                id: roman(n),
                lat: round6(area.center_lat + rng.gen_range(-area.spread..=area.spread)),
                lon: round6(area.center_lon + rng.gen_range(-area.spread..=area.spread)),
            })
            .collect();
        Self { area, devices, rng }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Moves every device one random step and returns one report per device,
    /// in fleet order, stamped with `now`.
    pub fn next_round(&mut self, now: NaiveDateTime) -> Result<Vec<TelemetryReport>, ReportError> {
        let timestamp = now.format("%Y-%m-%d %H:%M:%S").to_string();
        let step = self.area.step;
        let mut reports = Vec::with_capacity(self.devices.len());
        for device in &mut self.devices {
            let lat = device.lat + self.rng.gen_range(-step..=step);
            let lon = device.lon + self.rng.gen_range(-step..=step);
            device.lat = round6(self.area.clamp_lat(lat));
            device.lon = round6(self.area.clamp_lon(lon));

            let sats = self.rng.gen_range(MIN_SATS..=MAX_SATS);
            reports.push(build_report(device, &timestamp, sats)?);
        }
        Ok(reports)
    }
}

// Field devices send coordinates as strings; keep that shape so the relay
// and worker see what real trackers produce.
fn build_report(device: &Device, timestamp: &str, sats: u32) -> Result<TelemetryReport, ReportError> {
    TelemetryReport::from_value(json!({
        "device_id": device.id,
        "latitude": device.lat.to_string(),
        "longitude": device.lon.to_string(),
        "timestamp": timestamp,
        "sats": sats,
    }))
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

pub fn roman(mut n: usize) -> String {
    const NUMERALS: [(usize, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for (value, numeral) in NUMERALS {
        while n >= value {
            out.push_str(numeral);
            n -= value;
        }
    }
    out
}
