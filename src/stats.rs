use crate::engine::globalping::{ProbeLocation, ProbeSample};
use crate::engine::latency::extract_rtt;
use crate::model::{LocationCandidate, RankMetric};
use std::collections::BTreeMap;
use tracing::debug;

/// RTT observations collected under one location key.
#[derive(Debug, Clone)]
pub struct LatencyGroup {
    /// Location of the first probe seen for this key.
    pub location: ProbeLocation,
    pub rtts_ms: Vec<f64>,
    pub anycast: bool,
}

/// Observations grouped by location key.
///
/// Keys are kept in lexicographic order so that ranking ties resolve the
/// same way on every run.
#[derive(Debug, Clone, Default)]
pub struct LatencyGroups {
    groups: BTreeMap<String, LatencyGroup>,
}

impl LatencyGroups {
    pub fn push(&mut self, key: String, location: &ProbeLocation, rtt_ms: f64, anycast: bool) {
        let group = self.groups.entry(key).or_insert_with(|| LatencyGroup {
            location: location.clone(),
            rtts_ms: Vec::new(),
            anycast: false,
        });
        group.rtts_ms.push(rtt_ms);
        group.anycast |= anycast;
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Group usable latency observations by the key `key_fn` derives from each probe.
///
/// Samples without a usable RTT are skipped.
pub fn aggregate<'a, I, F>(samples: I, key_fn: F) -> LatencyGroups
where
    I: IntoIterator<Item = &'a ProbeSample>,
    F: Fn(&ProbeLocation) -> String,
{
    let mut groups = LatencyGroups::default();
    let mut dropped = 0usize;
    for sample in samples {
        match extract_rtt(sample) {
            Some(rtt) => groups.push(
                key_fn(&sample.probe),
                &sample.probe,
                rtt,
                sample.result.anycast,
            ),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        debug!(dropped, kept = groups.len(), "skipped samples without usable latency");
    }
    groups
}

/// Reduce each group to min/mean and sort ascending by `metric`.
///
/// The sort is stable over key order, so equal values rank alphabetically.
pub fn rank(groups: LatencyGroups, metric: RankMetric) -> Vec<LocationCandidate> {
    let mut candidates: Vec<LocationCandidate> = groups
        .groups
        .into_iter()
        .filter_map(|(key, group)| candidate(key, group))
        .collect();
    candidates.sort_by(|a, b| a.metric(metric).total_cmp(&b.metric(metric)));
    candidates
}

fn candidate(key: String, group: LatencyGroup) -> Option<LocationCandidate> {
    let min_rtt_ms = group.rtts_ms.iter().copied().min_by(|a, b| a.total_cmp(b))?;
    // Summation rounding can land the mean just under the minimum.
    let avg_rtt_ms = mean(&group.rtts_ms)?.max(min_rtt_ms);
    Some(LocationCandidate {
        key,
        continent: group.location.continent,
        country: group.location.country,
        state: group.location.state,
        city: group.location.city,
        min_rtt_ms,
        avg_rtt_ms,
        samples: group.rtts_ms.len(),
        anycast: group.anycast,
    })
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
