pub mod globalping;
pub mod latency;
pub mod phase;
pub mod poller;
#[cfg(test)]
pub mod testing;

use crate::engine::globalping::MeasurementApi;
use crate::engine::phase::{run_phase, PhasePlan};
use crate::error::{GeoError, GeoResult};
use crate::model::{
    Confidence, GeoEvent, GeolocationResult, LocationCandidate, Phase, PhaseResult, RunConfig,
    UNKNOWN_KEY,
};
use std::net::IpAddr;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Country that gets a state phase between country and city.
pub const US_COUNTRY_CODE: &str = "US";

/// Where the narrowing goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Continent,
    Country { continent: String },
    State { country: String },
    City { country: String, state: Option<String> },
    Done,
}

/// Transition taken after `phase` produced `winner`.
///
/// A continent or country winner without a reported location cannot scope
/// the next request, so narrowing stops there.
pub fn next_stage(phase: Phase, winner: &LocationCandidate) -> Stage {
    match phase {
        Phase::Continent | Phase::Country if winner.key == UNKNOWN_KEY => Stage::Done,
        Phase::Continent => Stage::Country {
            continent: winner.key.clone(),
        },
        Phase::Country if winner.key == US_COUNTRY_CODE => Stage::State {
            country: winner.key.clone(),
        },
        Phase::Country => Stage::City {
            country: winner.key.clone(),
            state: None,
        },
        Phase::State => Stage::City {
            country: winner.country.clone(),
            state: (winner.key != UNKNOWN_KEY).then(|| winner.key.clone()),
        },
        Phase::City => Stage::Done,
    }
}

/// Phase whose candidates form the final answer.
///
/// An empty phase stops the run and hands back the previous phase's list,
/// except for the state phase whose empty list is returned as-is.
pub fn final_phase(phases: &[PhaseResult]) -> Option<&PhaseResult> {
    let last = phases.last()?;
    if last.candidates.is_empty() && last.phase != Phase::State {
        return phases.iter().rev().nth(1).or(Some(last));
    }
    Some(last)
}

/// Several continents answering faster than `threshold_ms` cannot be one host.
///
/// A single probe whose trace ends at a nearby router can trip this, so it is
/// only ever reported as a suspicion.
pub fn continents_suggest_anycast(continents: &PhaseResult, threshold_ms: f64) -> bool {
    continents.phase == Phase::Continent
        && continents
            .candidates
            .iter()
            .filter(|c| c.min_rtt_ms < threshold_ms)
            .count()
            >= 2
}

pub struct GeolocationEngine<A> {
    api: A,
    cfg: RunConfig,
}

impl<A: MeasurementApi> GeolocationEngine<A> {
    pub fn new(api: A, cfg: RunConfig) -> Self {
        Self { api, cfg }
    }

    pub async fn run(
        self,
        target: IpAddr,
        event_tx: mpsc::Sender<GeoEvent>,
    ) -> GeoResult<GeolocationResult> {
        let target = target.to_string();
        let limit = self.cfg.limit;
        let mut phases: Vec<PhaseResult> = Vec::new();
        let mut stage = Stage::Continent;

        loop {
            let plan = match &stage {
                Stage::Continent => PhasePlan::continents(&target),
                Stage::Country { continent } => PhasePlan::countries_in(&target, continent, limit),
                Stage::State { country } => PhasePlan::states_in(&target, country, limit),
                Stage::City { country, state } => {
                    PhasePlan::cities_in(&target, country, state.as_deref(), limit)
                }
                Stage::Done => break,
            };

            let result = run_phase(&self.api, &self.cfg, plan, phases.len() + 1, &event_tx).await?;
            let phase = result.phase;
            stage = match result.winner() {
                Some(winner) => {
                    let next = next_stage(phase, winner);
                    if next == Stage::Done && phase != Phase::City {
                        warn!(%phase, "winner reported no location, stopping early");
                        event_tx
                            .send(GeoEvent::Info {
                                message: format!(
                                    "Closest {phase} probes did not report a location; cannot narrow further"
                                ),
                            })
                            .await
                            .ok();
                    }
                    next
                }
                None if phase == Phase::Continent => return Err(GeoError::NoData { phase }),
                None => {
                    warn!(%phase, "no candidates, stopping early");
                    event_tx
                        .send(GeoEvent::Info {
                            message: format!("No usable {phase} measurements; cannot narrow further"),
                        })
                        .await
                        .ok();
                    Stage::Done
                }
            };
            phases.push(result);
        }

        self.finish(target, phases)
    }

    fn finish(&self, target: String, phases: Vec<PhaseResult>) -> GeoResult<GeolocationResult> {
        let Some(last) = final_phase(&phases) else {
            return Err(GeoError::NoData {
                phase: Phase::Continent,
            });
        };
        let final_phase = last.phase;
        let candidates = last.candidates.clone();

        let anycast = candidates.first().map(|w| w.anycast).unwrap_or(false);
        let anycast_suspected = phases
            .first()
            .map(|p| continents_suggest_anycast(p, self.cfg.anycast_threshold_ms))
            .unwrap_or(false);
        if anycast || anycast_suspected {
            info!(%target, anycast, anycast_suspected, "target may be anycast");
        }

        Ok(GeolocationResult {
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
            timestamp_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            target,
            confidence: candidates
                .first()
                .map(|w| Confidence::from_rtt_ms(w.metric(final_phase.metric()))),
            final_phase,
            candidates,
            anycast,
            anycast_suspected,
            phases,
        })
    }
}
