use crate::engine::globalping::{Hop, ProbeSample, SampleStatus};

/// Hops before this index sit next to the probe and say nothing about the target.
const FIRST_REMOTE_HOP: usize = 2;

/// Derive one representative RTT (ms) from a finished trace.
///
/// Returns `None` for unfinished samples, samples without hop data, and
/// samples where no hop from the third onward answered. Otherwise the
/// smallest positive timing of the last answering hop is used.
pub fn extract_rtt(sample: &ProbeSample) -> Option<f64> {
    if sample.result.status != SampleStatus::Finished {
        return None;
    }
    let hops = &sample.result.hops;
    if hops.is_empty() {
        return None;
    }

    let remote_answered = hops
        .iter()
        .skip(FIRST_REMOTE_HOP)
        .any(|hop| min_positive_timing(hop).is_some());
    if !remote_answered {
        return None;
    }

    hops.iter().rev().find_map(min_positive_timing)
}

fn min_positive_timing(hop: &Hop) -> Option<f64> {
    hop.timings
        .iter()
        .filter_map(|t| t.rtt)
        .filter(|rtt| *rtt > 0.0)
        .min_by(|a, b| a.total_cmp(b))
}
