//! Error types for the geolocation engine.

use crate::model::Phase;
use std::time::Duration;
use thiserror::Error;

/// Failures that abort a geolocation run.
///
/// Samples that fail the latency validity gate are not errors; they are
/// dropped inside the aggregation step.
#[derive(Debug, Error)]
pub enum GeoError {
    #[error(
        "probe service rate limit exceeded; wait before retrying or set GLOBALPING_TOKEN for higher limits ({body})"
    )]
    QuotaExceeded { body: String },

    #[error("probe service request failed with HTTP {status}: {body}")]
    ServiceRequestFailed { status: u16, body: String },

    #[error("no successful measurements from any {phase}")]
    NoData { phase: Phase },

    #[error("{phase} measurement did not finish within {}", humantime::format_duration(*.waited))]
    MeasurementTimeout { phase: Phase, waited: Duration },

    #[error("invalid request url {0}")]
    InvalidUrl(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type GeoResult<T> = Result<T, GeoError>;
