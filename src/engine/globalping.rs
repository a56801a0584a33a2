//! Globalping measurement API client.
//!
//! Only the two calls the engine needs are wrapped: measurement creation and
//! status fetch. Everything else about probing (probe selection, tracing hop
//! by hop) happens on the service side.

use crate::error::{GeoError, GeoResult};
use crate::model::RunConfig;
use anyhow::{Context, Result};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Request/response surface of the probe service.
///
/// Implementations are shared by reference across phases and across the
/// concurrent continent sub-requests, so they must not need `&mut self`.
pub trait MeasurementApi {
    fn create_measurement(
        &self,
        request: &MeasurementRequest,
    ) -> impl Future<Output = GeoResult<CreatedMeasurement>>;

    fn get_measurement(&self, id: &str) -> impl Future<Output = GeoResult<MeasurementState>>;
}

impl<T: MeasurementApi> MeasurementApi for &T {
    fn create_measurement(
        &self,
        request: &MeasurementRequest,
    ) -> impl Future<Output = GeoResult<CreatedMeasurement>> {
        (**self).create_measurement(request)
    }

    fn get_measurement(&self, id: &str) -> impl Future<Output = GeoResult<MeasurementState>> {
        (**self).get_measurement(id)
    }
}

/// Probe location filter for one sub-request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub limit: u32,
}

impl LocationScope {
    pub fn magic(name: &str, limit: u32) -> Self {
        Self {
            magic: Some(name.to_string()),
            country: None,
            state: None,
            limit,
        }
    }

    pub fn country(code: &str, limit: u32) -> Self {
        Self {
            magic: None,
            country: Some(code.to_string()),
            state: None,
            limit,
        }
    }

    pub fn country_state(country: &str, state: &str, limit: u32) -> Self {
        Self {
            magic: None,
            country: Some(country.to_string()),
            state: Some(state.to_string()),
            limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub target: String,
    pub locations: Vec<LocationScope>,
    pub measurement_options: MeasurementOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementOptions {
    pub packets: u8,
}

impl MeasurementRequest {
    pub fn trace(target: &str, locations: Vec<LocationScope>) -> Self {
        Self {
            kind: "mtr",
            target: target.to_string(),
            locations,
            measurement_options: MeasurementOptions { packets: 3 },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedMeasurement {
    pub id: String,
    #[serde(default)]
    pub probes_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeasurementStatus {
    InProgress,
    Finished,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeasurementState {
    pub id: String,
    pub status: MeasurementStatus,
    #[serde(default)]
    pub results: Vec<ProbeSample>,
}

impl MeasurementState {
    pub fn is_in_progress(&self) -> bool {
        self.status == MeasurementStatus::InProgress
    }
}

/// One probe's raw result within a measurement.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeSample {
    pub probe: ProbeLocation,
    pub result: ProbeResult,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProbeLocation {
    #[serde(default)]
    pub continent: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SampleStatus {
    #[serde(alias = "pending")]
    InProgress,
    Finished,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeResult {
    pub status: SampleStatus,
    #[serde(default)]
    pub hops: Vec<Hop>,
    /// Service-side indicator that the target is announced from several places.
    #[serde(default)]
    pub anycast: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hop {
    #[serde(default)]
    pub timings: Vec<HopTiming>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct HopTiming {
    #[serde(default)]
    pub rtt: Option<f64>,
}

#[derive(Clone)]
pub struct GlobalpingClient {
    pub base_url: Url,
    pub token: Option<String>,
    pub http: reqwest::Client,
}

impl GlobalpingClient {
    pub fn new(cfg: &RunConfig) -> Result<Self> {
        let mut api_url = cfg.api_url.clone();
        if !api_url.ends_with('/') {
            api_url.push('/');
        }
        let base_url = Url::parse(&api_url).context("invalid api_url")?;

        let mut builder = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .tcp_keepalive(Duration::from_secs(15));

        if let Some(ref cert_path) = cfg.certificate_path {
            let cert_data = std::fs::read(cert_path).with_context(|| {
                format!("failed to read certificate from {}", cert_path.display())
            })?;
            let is_der = cert_path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("der"))
                .unwrap_or(false);
            let cert = if is_der {
                reqwest::Certificate::from_der(&cert_data)
            } else {
                reqwest::Certificate::from_pem(&cert_data)
            }
            .with_context(|| format!("failed to parse certificate {}", cert_path.display()))?;
            builder = builder.add_root_certificate(cert);
        }

        let http = builder.build().context("failed to build http client")?;

        Ok(Self {
            base_url,
            token: cfg.token.clone().filter(|t| !t.trim().is_empty()),
            http,
        })
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token.as_deref() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    fn url_for(&self, path: &str) -> GeoResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| GeoError::InvalidUrl(format!("{path}: {e}")))
    }
}

impl MeasurementApi for GlobalpingClient {
    async fn create_measurement(
        &self,
        request: &MeasurementRequest,
    ) -> GeoResult<CreatedMeasurement> {
        let url = self.url_for("measurements")?;
        let resp = self
            .authorize(self.http.post(url))
            .json(request)
            .send()
            .await?;
        let created: CreatedMeasurement = read_json(resp).await?;
        debug!(id = %created.id, probes = created.probes_count, "measurement created");
        Ok(created)
    }

    async fn get_measurement(&self, id: &str) -> GeoResult<MeasurementState> {
        let url = self.url_for(&format!("measurements/{id}"))?;
        let resp = self.authorize(self.http.get(url)).send().await?;
        read_json(resp).await
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> GeoResult<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(classify_failure(status, body));
    }
    Ok(resp.json().await?)
}

/// Map a non-success response onto the error kinds the engine distinguishes.
pub fn classify_failure(status: StatusCode, body: String) -> GeoError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        GeoError::QuotaExceeded { body }
    } else {
        GeoError::ServiceRequestFailed {
            status: status.as_u16(),
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_scopes() {
        let req = MeasurementRequest::trace(
            "1.1.1.1",
            vec![
                LocationScope::magic("Europe", 5),
                LocationScope::country_state("US", "FL", 50),
            ],
        );
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["type"], "mtr");
        assert_eq!(v["target"], "1.1.1.1");
        assert_eq!(v["measurementOptions"]["packets"], 3);
        assert_eq!(
            v["locations"][0],
            serde_json::json!({"magic": "Europe", "limit": 5})
        );
        assert_eq!(
            v["locations"][1],
            serde_json::json!({"country": "US", "state": "FL", "limit": 50})
        );
    }

    #[test]
    fn parses_measurement_state() {
        let raw = r#"{
            "id": "abc123",
            "type": "mtr",
            "status": "in-progress",
            "probesCount": 2,
            "results": [
                {
                    "probe": {"continent": "NA", "country": "US", "state": "FL", "city": "Miami", "asn": 20473, "network": "Vultr"},
                    "result": {"status": "finished", "hops": [
                        {"resolvedAddress": "10.0.0.1", "timings": [{"rtt": 0.4}]},
                        {"resolvedAddress": null, "timings": [{"rtt": null}]},
                        {"resolvedAddress": "1.1.1.1", "timings": [{"rtt": 1.2}, {"rtt": 0.9}]}
                    ]}
                },
                {
                    "probe": {"continent": "EU", "country": "DE", "state": null, "city": "Berlin"},
                    "result": {"status": "in-progress"}
                }
            ]
        }"#;
        let state: MeasurementState = serde_json::from_str(raw).unwrap();
        assert!(state.is_in_progress());
        assert_eq!(state.results.len(), 2);
        let first = &state.results[0];
        assert_eq!(first.probe.city.as_deref(), Some("Miami"));
        assert_eq!(first.result.status, SampleStatus::Finished);
        assert_eq!(first.result.hops.len(), 3);
        assert_eq!(first.result.hops[1].timings[0].rtt, None);
        assert!(!first.result.anycast);
        assert_eq!(state.results[1].result.status, SampleStatus::InProgress);
        assert!(state.results[1].result.hops.is_empty());
    }

    #[test]
    fn unknown_statuses_are_terminal() {
        let state: MeasurementState =
            serde_json::from_str(r#"{"id": "x", "status": "timeout"}"#).unwrap();
        assert_eq!(state.status, MeasurementStatus::Other);
        assert!(!state.is_in_progress());

        let result: ProbeResult = serde_json::from_str(r#"{"status": "offline"}"#).unwrap();
        assert_eq!(result.status, SampleStatus::Other);
        let result: ProbeResult = serde_json::from_str(r#"{"status": "pending"}"#).unwrap();
        assert_eq!(result.status, SampleStatus::InProgress);
    }

    #[test]
    fn rate_limit_is_quota_error() {
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(matches!(err, GeoError::QuotaExceeded { ref body } if body == "slow down"));

        let err = classify_failure(StatusCode::BAD_REQUEST, "{\"error\":{}}".into());
        assert!(matches!(
            err,
            GeoError::ServiceRequestFailed { status: 400, ref body } if body == "{\"error\":{}}"
        ));
    }

    #[test]
    fn client_normalizes_base_url() {
        let cfg = RunConfig {
            api_url: "https://api.globalping.io/v1".into(),
            token: Some("  ".into()),
            ..RunConfig::default()
        };
        let client = GlobalpingClient::new(&cfg).unwrap();
        assert_eq!(
            client.url_for("measurements").unwrap().as_str(),
            "https://api.globalping.io/v1/measurements"
        );
        assert!(client.token.is_none());
    }
}
