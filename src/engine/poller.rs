use crate::engine::globalping::{MeasurementApi, MeasurementState, SampleStatus};
use crate::error::{GeoError, GeoResult};
use crate::model::{GeoEvent, LocationCandidate, Phase, RunConfig};
use crate::stats::{aggregate, rank};
use futures::future::try_join_all;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Handle for one in-flight measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementJob {
    pub id: String,
    pub probes_count: u32,
    pub target: String,
}

/// Poll a batch of jobs until none of them is still in progress.
///
/// Each tick fetches every job concurrently and only proceeds once all
/// fetches returned, so the provisional ranking always sees a complete
/// snapshot. Any fetch failure aborts the whole batch; rate limiting is not
/// retried.
pub async fn poll_until_settled<A: MeasurementApi>(
    api: &A,
    jobs: &[MeasurementJob],
    phase: Phase,
    cfg: &RunConfig,
    event_tx: &mpsc::Sender<GeoEvent>,
) -> GeoResult<Vec<MeasurementState>> {
    let started = Instant::now();
    let expected: u32 = jobs.iter().map(|j| j.probes_count).sum();

    loop {
        let states = try_join_all(jobs.iter().map(|job| api.get_measurement(&job.id))).await?;

        let finished = finished_samples(&states);
        let leader = provisional_leader(&states, phase);
        debug!(
            %phase,
            jobs = jobs.len(),
            finished,
            expected,
            ids = ?states.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            "measurement status"
        );
        event_tx
            .send(GeoEvent::Progress {
                phase,
                finished,
                expected,
                leader: leader.as_ref().map(|c| c.label(phase)),
                leader_rtt_ms: leader.as_ref().map(|c| c.metric(phase.metric())),
            })
            .await
            .ok();

        if states.iter().all(|s| !s.is_in_progress()) {
            return Ok(states);
        }

        let waited = started.elapsed();
        if waited >= cfg.measurement_timeout {
            warn!(%phase, ?waited, "giving up on measurement");
            return Err(GeoError::MeasurementTimeout { phase, waited });
        }

        tokio::time::sleep(cfg.poll_interval).await;
    }
}

fn finished_samples(states: &[MeasurementState]) -> usize {
    states
        .iter()
        .flat_map(|s| s.results.iter())
        .filter(|s| s.result.status != SampleStatus::InProgress)
        .count()
}

/// Current best candidate among the samples returned so far.
fn provisional_leader(states: &[MeasurementState], phase: Phase) -> Option<LocationCandidate> {
    let samples = states.iter().flat_map(|s| s.results.iter());
    rank(aggregate(samples, |p| phase.location_key(p)), phase.metric())
        .into_iter()
        .next()
}
