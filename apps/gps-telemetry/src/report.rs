use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Error body returned to producers whose report fails validation.
pub const INVALID_GPS_DATA: &str = "Invalid GPS data";

/// Largest report body either service reads; anything bigger is rejected
/// as invalid without being parsed.
pub const MAX_REPORT_BYTES: usize = 64 * 1024;

pub const REQUIRED_FIELDS: [&str; 3] = ["device_id", "latitude", "longitude"];

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("body is not a JSON object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("required field `{0}` is empty")]
    EmptyField(&'static str),
    #[error("required field `{0}` must be a string or a number")]
    InvalidField(&'static str),
}

/// A single location fix submitted by a device.
///
/// The report keeps the producer's JSON object as received, including any
/// fields beyond the required ones, so it can be broadcast or forwarded
/// without re-shaping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct TelemetryReport {
    fields: Map<String, Value>,
}

impl TelemetryReport {
    pub fn parse(body: &[u8]) -> Result<Self, ReportError> {
        let value: Value = serde_json::from_slice(body)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ReportError> {
        let Value::Object(fields) = value else {
            return Err(ReportError::NotAnObject);
        };
        for field in REQUIRED_FIELDS {
            check_required(&fields, field)?;
        }
        Ok(Self { fields })
    }

    pub fn device_id(&self) -> String {
        match self.fields.get("device_id") {
            Some(Value::String(id)) => id.trim().to_string(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    pub fn latitude(&self) -> Option<f64> {
        self.fields.get("latitude").and_then(coordinate)
    }

    pub fn longitude(&self) -> Option<f64> {
        self.fields.get("longitude").and_then(coordinate)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }
}

fn check_required(fields: &Map<String, Value>, field: &'static str) -> Result<(), ReportError> {
    match fields.get(field) {
        None | Some(Value::Null) => Err(ReportError::MissingField(field)),
        Some(Value::String(raw)) if raw.trim().is_empty() => Err(ReportError::EmptyField(field)),
        Some(Value::String(_)) | Some(Value::Number(_)) => Ok(()),
        Some(_) => Err(ReportError::InvalidField(field)),
    }
}

// Simulators send coordinates as strings; anything unparseable is kept
// verbatim in the payload and only reported as `None` here.
fn coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_numeric_coordinates() {
        let report =
            TelemetryReport::from_value(json!({"device_id": "d1", "latitude": 10, "longitude": 20}))
                .unwrap();
        assert_eq!(report.device_id(), "d1");
        assert_eq!(report.latitude(), Some(10.0));
        assert_eq!(report.longitude(), Some(20.0));
    }

    #[test]
    fn accepts_string_coordinates_from_simulators() {
        let report = TelemetryReport::parse(
            br#"{"device_id":"IV","latitude":"-33.8688","longitude":"151.2093","sats":8}"#,
        )
        .unwrap();
        assert_eq!(report.latitude(), Some(-33.8688));
        assert_eq!(report.longitude(), Some(151.2093));
    }

    #[test]
    fn rejects_missing_device_id() {
        let err = TelemetryReport::from_value(json!({"latitude": 1, "longitude": 2})).unwrap_err();
        assert!(matches!(err, ReportError::MissingField("device_id")));
    }

    #[test]
    fn rejects_null_and_empty_fields() {
        let err = TelemetryReport::from_value(json!({"device_id": "d", "latitude": null, "longitude": 2}))
            .unwrap_err();
        assert!(matches!(err, ReportError::MissingField("latitude")));

        let err = TelemetryReport::from_value(json!({"device_id": "d", "latitude": 1, "longitude": "  "}))
            .unwrap_err();
        assert!(matches!(err, ReportError::EmptyField("longitude")));

        let err = TelemetryReport::from_value(json!({"device_id": "", "latitude": 1, "longitude": 2}))
            .unwrap_err();
        assert!(matches!(err, ReportError::EmptyField("device_id")));
    }

    #[test]
    fn rejects_structured_coordinates() {
        let err = TelemetryReport::from_value(json!({"device_id": "d", "latitude": [1], "longitude": 2}))
            .unwrap_err();
        assert!(matches!(err, ReportError::InvalidField("latitude")));
    }

    #[test]
    fn rejects_non_objects_and_garbage() {
        assert!(matches!(
            TelemetryReport::from_value(json!([1, 2, 3])),
            Err(ReportError::NotAnObject)
        ));
        assert!(matches!(TelemetryReport::parse(b"not json"), Err(ReportError::Json(_))));
    }

    #[test]
    fn keeps_extra_fields_and_order_verbatim() {
        let body = br#"{"device_id":"X","latitude":"1.5","longitude":"2.5","timestamp":"2025-01-28 12:00:00","sats":8}"#;
        let report = TelemetryReport::parse(body).unwrap();
        let encoded = serde_json::to_string(&report).unwrap();
        assert_eq!(encoded.as_bytes(), body);
    }
}
