//! Per-phase descriptors and the phase runner.
//!
//! A phase is fully described by the probe filter it sends, the key it groups
//! probes by and the metric it ranks on. The poller and the aggregator only
//! ever see those three things, never the phase-specific branching.

use crate::engine::globalping::{LocationScope, MeasurementApi, MeasurementRequest, ProbeLocation};
use crate::engine::poller::{poll_until_settled, MeasurementJob};
use crate::error::GeoResult;
use crate::model::{
    GeoEvent, LocationCandidate, Phase, PhaseResult, RankMetric, RunConfig, UNKNOWN_KEY,
};
use crate::stats::{aggregate, rank};
use futures::future::try_join_all;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Probes per continent in the first phase.
pub const CONTINENT_PROBES: u32 = 5;

/// Candidates shown in a non-final phase summary.
pub const REPORTED_CANDIDATES: usize = 3;

/// Continent codes as reported by probes, with the region names the service
/// accepts as location filters.
pub const CONTINENTS: [(&str, &str); 6] = [
    ("EU", "Europe"),
    ("NA", "North America"),
    ("SA", "South America"),
    ("AS", "Asia"),
    ("AF", "Africa"),
    ("OC", "Oceania"),
];

pub fn continent_name(code: &str) -> Option<&'static str> {
    CONTINENTS
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, name)| *name)
}

impl Phase {
    /// Grouping key of a probe at this phase's granularity.
    pub fn location_key(self, probe: &ProbeLocation) -> String {
        let value = match self {
            Phase::Continent => Some(probe.continent.as_str()),
            Phase::Country => Some(probe.country.as_str()),
            Phase::State => probe.state.as_deref(),
            Phase::City => probe.city.as_deref(),
        };
        value
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_KEY)
            .to_string()
    }

    /// Continent selection averages over a handful of probes; every later
    /// phase trusts the single best probe.
    pub fn metric(self) -> RankMetric {
        match self {
            Phase::Continent => RankMetric::Average,
            _ => RankMetric::Minimum,
        }
    }

    /// Candidates worth showing in this phase's summary.
    pub fn reported(self, ranked: &[LocationCandidate]) -> Vec<LocationCandidate> {
        match self {
            Phase::City => ranked.to_vec(),
            _ => ranked.iter().take(REPORTED_CANDIDATES).cloned().collect(),
        }
    }
}

/// Requests to issue for one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhasePlan {
    pub phase: Phase,
    pub target: String,
    pub requests: Vec<MeasurementRequest>,
}

impl PhasePlan {
    /// One small sub-request per continent.
    pub fn continents(target: &str) -> Self {
        Self {
            phase: Phase::Continent,
            target: target.to_string(),
            requests: CONTINENTS
                .iter()
                .map(|(_, name)| {
                    MeasurementRequest::trace(
                        target,
                        vec![LocationScope::magic(name, CONTINENT_PROBES)],
                    )
                })
                .collect(),
        }
    }

    pub fn countries_in(target: &str, continent: &str, limit: u32) -> Self {
        let region = continent_name(continent).unwrap_or(continent);
        Self::single(
            Phase::Country,
            target,
            LocationScope::magic(region, limit),
        )
    }

    pub fn states_in(target: &str, country: &str, limit: u32) -> Self {
        Self::single(Phase::State, target, LocationScope::country(country, limit))
    }

    pub fn cities_in(target: &str, country: &str, state: Option<&str>, limit: u32) -> Self {
        let scope = match state {
            Some(state) => LocationScope::country_state(country, state, limit),
            None => LocationScope::country(country, limit),
        };
        Self::single(Phase::City, target, scope)
    }

    fn single(phase: Phase, target: &str, scope: LocationScope) -> Self {
        Self {
            phase,
            target: target.to_string(),
            requests: vec![MeasurementRequest::trace(target, vec![scope])],
        }
    }
}

/// Create the phase's measurements, wait for them and rank the outcome.
///
/// An empty candidate list is returned as-is; deciding what it means is up
/// to the caller.
pub async fn run_phase<A: MeasurementApi>(
    api: &A,
    cfg: &RunConfig,
    plan: PhasePlan,
    step: usize,
    event_tx: &mpsc::Sender<GeoEvent>,
) -> GeoResult<PhaseResult> {
    let phase = plan.phase;
    event_tx
        .send(GeoEvent::PhaseStarted { phase, step })
        .await
        .ok();

    let created = try_join_all(plan.requests.iter().map(|r| api.create_measurement(r))).await?;
    let jobs: Vec<MeasurementJob> = created
        .into_iter()
        .map(|c| MeasurementJob {
            id: c.id,
            probes_count: c.probes_count,
            target: plan.target.clone(),
        })
        .collect();

    for job in &jobs {
        info!(%phase, id = %job.id, probes = job.probes_count, target = %job.target, "measurement started");
        event_tx
            .send(GeoEvent::MeasurementCreated {
                phase,
                id: job.id.clone(),
                probes: job.probes_count,
            })
            .await
            .ok();
    }

    let states = poll_until_settled(api, &jobs, phase, cfg, event_tx).await?;

    let groups = aggregate(states.iter().flat_map(|s| s.results.iter()), |p| {
        phase.location_key(p)
    });
    if groups.is_empty() {
        warn!(%phase, "no probe returned a usable latency");
    }
    let candidates = rank(groups, phase.metric());

    if let Some(winner) = candidates.first() {
        info!(
            %phase,
            winner = %winner.label(phase),
            min_rtt_ms = winner.min_rtt_ms,
            avg_rtt_ms = winner.avg_rtt_ms,
            candidates = candidates.len(),
            "phase complete"
        );
    }
    event_tx
        .send(GeoEvent::PhaseCompleted {
            phase,
            top: phase.reported(&candidates),
            winner: candidates.first().cloned(),
        })
        .await
        .ok();

    Ok(PhaseResult {
        phase,
        measurement_ids: jobs.into_iter().map(|j| j.id).collect(),
        candidates,
    })
}
