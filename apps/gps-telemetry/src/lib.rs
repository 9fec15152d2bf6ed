//! Types shared by the GPS worker and the GPS relay: the telemetry report
//! accepted on `/gps`, its validation rules, and env-driven config helpers.

pub mod env;
pub mod report;

pub use report::{
    ReportError, TelemetryReport, INVALID_GPS_DATA, MAX_REPORT_BYTES, REQUIRED_FIELDS,
};
