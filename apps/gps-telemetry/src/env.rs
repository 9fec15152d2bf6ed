use anyhow::{anyhow, Context, Result};
use std::env;

/// Loads a `.env` file from the working directory if one exists.
pub fn load_dotenv() {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("ignoring unreadable .env file: {err}");
        }
    }
}

pub fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

pub fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

pub fn env_f64(key: &str, default: Option<f64>) -> Result<f64> {
    match env::var(key) {
        Ok(value) => {
            let parsed = value
                .trim()
                .parse::<f64>()
                .with_context(|| format!("invalid {key}"))?;
            if !parsed.is_finite() {
                return Err(anyhow!("{key} must be a finite number"));
            }
            Ok(parsed)
        }
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

pub fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Reads the listen port from `PORT`, falling back to `default` when unset or blank.
pub fn env_port(default: u16) -> Result<u16> {
    match env_optional("PORT") {
        Some(raw) => raw.parse::<u16>().with_context(|| format!("invalid PORT {raw:?}")),
        None => Ok(default),
    }
}
