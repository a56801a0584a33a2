use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Location key used when a probe does not report the grouping attribute.
pub const UNKNOWN_KEY: &str = "Unknown";

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub api_url: String,
    pub token: Option<String>,
    /// Probes requested per phase once the continent is known.
    pub limit: u32,
    pub request_timeout: Duration,
    pub measurement_timeout: Duration,
    pub poll_interval: Duration,
    pub anycast_threshold_ms: f64,
    pub user_agent: String,
    pub certificate_path: Option<std::path::PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.globalping.io/v1/".into(),
            token: None,
            limit: 50,
            request_timeout: Duration::from_secs(30),
            measurement_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(1000),
            anycast_threshold_ms: 10.0,
            user_agent: format!("geolocate/{}", env!("CARGO_PKG_VERSION")),
            certificate_path: None,
        }
    }
}

/// One narrowing step of a geolocation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Continent,
    Country,
    State,
    City,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Continent => "continent",
            Phase::Country => "country",
            Phase::State => "state",
            Phase::City => "city",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Phase::Continent => "Continent",
            Phase::Country => "Country",
            Phase::State => "State",
            Phase::City => "City",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ranking metric applied to a phase's latency groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankMetric {
    Minimum,
    Average,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GeoEvent {
    PhaseStarted {
        phase: Phase,
        step: usize,
    },
    MeasurementCreated {
        phase: Phase,
        id: String,
        probes: u32,
    },
    Progress {
        phase: Phase,
        finished: usize,
        expected: u32,
        leader: Option<String>,
        leader_rtt_ms: Option<f64>,
    },
    PhaseCompleted {
        phase: Phase,
        top: Vec<LocationCandidate>,
        winner: Option<LocationCandidate>,
    },
    Info {
        message: String,
    },
}

/// A ranked location for one phase.
///
/// `key` is the grouping attribute for the phase (continent code, country
/// code, state code or city name). The remaining location fields are taken
/// from the first probe observed for that key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationCandidate {
    pub key: String,
    pub continent: String,
    pub country: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    pub min_rtt_ms: f64,
    pub avg_rtt_ms: f64,
    pub samples: usize,
    #[serde(default)]
    pub anycast: bool,
}

impl LocationCandidate {
    pub fn metric(&self, metric: RankMetric) -> f64 {
        match metric {
            RankMetric::Minimum => self.min_rtt_ms,
            RankMetric::Average => self.avg_rtt_ms,
        }
    }

    /// Human-readable name of this candidate at the given phase granularity.
    pub fn label(&self, phase: Phase) -> String {
        match phase {
            Phase::Continent | Phase::Country => self.key.clone(),
            Phase::State => format!("{}, {}", self.key, self.country),
            Phase::City => match self.state.as_deref() {
                Some(state) => format!("{}, {}, {}", self.key, state, self.country),
                None => format!("{}, {}", self.key, self.country),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub measurement_ids: Vec<String>,
    pub candidates: Vec<LocationCandidate>,
}

impl PhaseResult {
    pub fn winner(&self) -> Option<&LocationCandidate> {
        self.candidates.first()
    }
}

/// Qualitative confidence derived from the winner's minimum RTT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    VeryHigh,
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn from_rtt_ms(rtt_ms: f64) -> Self {
        if rtt_ms < 1.0 {
            Confidence::VeryHigh
        } else if rtt_ms < 5.0 {
            Confidence::High
        } else if rtt_ms < 20.0 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Confidence::VeryHigh => "Very High",
            Confidence::High => "High",
            Confidence::Medium => "Medium",
            Confidence::Low => "Low",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeolocationResult {
    #[serde(default)]
    pub version: Option<String>,
    pub timestamp_utc: String,
    pub target: String,
    pub phases: Vec<PhaseResult>,
    /// Phase whose candidates make up `candidates`.
    pub final_phase: Phase,
    pub candidates: Vec<LocationCandidate>,
    /// The service flagged the winning location as anycast.
    pub anycast: bool,
    /// Several continents answered faster than the anycast threshold.
    #[serde(default)]
    pub anycast_suspected: bool,
    #[serde(default)]
    pub confidence: Option<Confidence>,
}

impl GeolocationResult {
    pub fn winner(&self) -> Option<&LocationCandidate> {
        self.candidates.first()
    }
}
