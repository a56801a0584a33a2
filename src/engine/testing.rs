//! Sample builders and a scripted in-memory probe service for tests.

use crate::engine::globalping::{
    classify_failure, CreatedMeasurement, Hop, HopTiming, LocationScope, MeasurementApi,
    MeasurementRequest, MeasurementState, MeasurementStatus, ProbeLocation, ProbeResult,
    ProbeSample, SampleStatus,
};
use crate::error::GeoResult;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Mutex;

pub fn location(continent: &str, country: &str, state: Option<&str>, city: &str) -> ProbeLocation {
    ProbeLocation {
        continent: continent.to_string(),
        country: country.to_string(),
        state: state.map(str::to_string),
        city: Some(city.to_string()),
    }
}

/// A finished trace whose final hop answered in `rtt_ms`.
pub fn sample_at(
    continent: &str,
    country: &str,
    state: Option<&str>,
    city: &str,
    rtt_ms: f64,
) -> ProbeSample {
    let hop = |rtt: Option<f64>| Hop {
        timings: vec![HopTiming { rtt }],
    };
    ProbeSample {
        probe: location(continent, country, state, city),
        result: ProbeResult {
            status: SampleStatus::Finished,
            hops: vec![hop(Some(0.2)), hop(None), hop(Some(rtt_ms))],
            anycast: false,
        },
    }
}

pub fn unfinished_at(continent: &str, country: &str, state: Option<&str>, city: &str) -> ProbeSample {
    ProbeSample {
        probe: location(continent, country, state, city),
        result: ProbeResult {
            status: SampleStatus::InProgress,
            hops: Vec::new(),
            anycast: false,
        },
    }
}

type Responder = Box<dyn Fn(&LocationScope) -> Vec<ProbeSample>>;

struct FakeJob {
    samples: Vec<ProbeSample>,
    pending_polls: usize,
}

#[derive(Default)]
struct FakeState {
    next_id: usize,
    jobs: HashMap<String, FakeJob>,
    requests: Vec<MeasurementRequest>,
    fetches: usize,
}

/// In-memory stand-in for the probe service.
///
/// Each created measurement answers with the samples the responder returns
/// for its location scopes, reports `in-progress` for `pending_polls` fetches
/// (with only the first half of the probes done), then `finished`.
pub struct FakeApi {
    responder: Responder,
    pending_polls: usize,
    create_failure: Option<(StatusCode, String)>,
    fetch_failure: Option<(StatusCode, String)>,
    never_finishes: bool,
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub fn new(responder: impl Fn(&LocationScope) -> Vec<ProbeSample> + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            pending_polls: 0,
            create_failure: None,
            fetch_failure: None,
            never_finishes: false,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn with_pending_polls(mut self, polls: usize) -> Self {
        self.pending_polls = polls;
        self
    }

    pub fn failing_create(mut self, status: StatusCode, body: &str) -> Self {
        self.create_failure = Some((status, body.to_string()));
        self
    }

    pub fn failing_fetch(mut self, status: StatusCode, body: &str) -> Self {
        self.fetch_failure = Some((status, body.to_string()));
        self
    }

    pub fn never_finishing(mut self) -> Self {
        self.never_finishes = true;
        self
    }

    pub fn requests(&self) -> Vec<MeasurementRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn fetches(&self) -> usize {
        self.state.lock().unwrap().fetches
    }
}

impl MeasurementApi for FakeApi {
    async fn create_measurement(
        &self,
        request: &MeasurementRequest,
    ) -> GeoResult<CreatedMeasurement> {
        if let Some((status, body)) = &self.create_failure {
            return Err(classify_failure(*status, body.clone()));
        }
        let samples: Vec<ProbeSample> = request
            .locations
            .iter()
            .flat_map(|scope| (self.responder)(scope))
            .collect();
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("m{}", state.next_id);
        let probes_count = samples.len() as u32;
        state.requests.push(request.clone());
        state.jobs.insert(
            id.clone(),
            FakeJob {
                samples,
                pending_polls: self.pending_polls,
            },
        );
        Ok(CreatedMeasurement { id, probes_count })
    }

    async fn get_measurement(&self, id: &str) -> GeoResult<MeasurementState> {
        if let Some((status, body)) = &self.fetch_failure {
            return Err(classify_failure(*status, body.clone()));
        }
        let mut state = self.state.lock().unwrap();
        state.fetches += 1;
        let job = state
            .jobs
            .get_mut(id)
            .ok_or_else(|| classify_failure(StatusCode::NOT_FOUND, format!("no job {id}")))?;

        if job.pending_polls == 0 && !self.never_finishes {
            return Ok(MeasurementState {
                id: id.to_string(),
                status: MeasurementStatus::Finished,
                results: job.samples.clone(),
            });
        }
        job.pending_polls = job.pending_polls.saturating_sub(1);
        let done = job.samples.len() / 2;
        let results = job
            .samples
            .iter()
            .enumerate()
            .map(|(i, s)| {
                if i < done {
                    s.clone()
                } else {
                    ProbeSample {
                        probe: s.probe.clone(),
                        result: ProbeResult {
                            status: SampleStatus::InProgress,
                            hops: Vec::new(),
                            anycast: false,
                        },
                    }
                }
            })
            .collect();
        Ok(MeasurementState {
            id: id.to_string(),
            status: MeasurementStatus::InProgress,
            results,
        })
    }
}
