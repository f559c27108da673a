use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::SystemTime;

use super::sample::Sample;
use super::status::{LinkStatus, SourceCoverage};

/// Per-key cache of the most recent sample from each collector.
///
/// The aggregation decision is taken over the samples still inside the
/// freshness window; older entries are pruned each cycle. Collectors
/// that have ever reported the key are remembered for coverage
/// accounting even after their samples age out.
#[derive(Debug, Default)]
pub struct SampleWindow {
    samples: HashMap<Arc<str>, Sample>,
    seen_collectors: HashSet<Arc<str>>,
}

impl SampleWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorbs a sample, keeping the newest per collector.
    pub fn absorb(&mut self, sample: Sample) {
        self.seen_collectors.insert(Arc::clone(&sample.collector));

        match self.samples.get(&sample.collector) {
            Some(kept) if kept.observed_at > sample.observed_at => {}
            _ => {
                self.samples.insert(Arc::clone(&sample.collector), sample);
            }
        }
    }

    /// Drops samples observed before `cutoff`. A sample observed
    /// exactly at the cutoff is still fresh.
    pub fn prune(&mut self, cutoff: SystemTime) {
        self.samples.retain(|_, s| s.observed_at >= cutoff);
    }

    /// Samples currently inside the freshness window.
    pub fn fresh(&self) -> impl Iterator<Item = &Sample> {
        self.samples.values()
    }

    pub fn coverage(&self) -> SourceCoverage {
        SourceCoverage {
            reporting: self.samples.len() as u32,
            known: self.seen_collectors.len() as u32,
        }
    }
}

/// Outcome of one aggregation decision for a key.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// A decidable sample set produced a verdict.
    Decide {
        status: LinkStatus,
        bps: f64,
        as_of: SystemTime,
        collector: Arc<str>,
    },
    /// No sample inside the freshness window: the previous state is
    /// held unchanged. Missing data is never treated as zero.
    Hold,
}

/// Reconciles a key's fresh sample set into one verdict.
///
/// Failover masking: any positive sample beats every zero sample,
/// because traffic moving between collectors shows up as a zero on the
/// collector it left. Among positive samples the greatest bps wins,
/// with the most recent `observed_at` breaking ties. Only when every
/// fresh sample reads zero is the link declared down.
pub fn decide(window: &SampleWindow) -> Verdict {
    let mut best_positive: Option<&Sample> = None;
    let mut latest: Option<&Sample> = None;

    for sample in window.fresh() {
        if latest.map_or(true, |l| sample.observed_at > l.observed_at) {
            latest = Some(sample);
        }

        if !sample.is_positive() {
            continue;
        }

        let better = match best_positive {
            None => true,
            Some(best) => {
                sample.bps > best.bps
                    || (sample.bps == best.bps && sample.observed_at > best.observed_at)
            }
        };
        if better {
            best_positive = Some(sample);
        }
    }

    if let Some(best) = best_positive {
        return Verdict::Decide {
            status: LinkStatus::Up,
            bps: best.bps,
            as_of: best.observed_at,
            collector: Arc::clone(&best.collector),
        };
    }

    match latest {
        Some(latest) => Verdict::Decide {
            status: LinkStatus::Down,
            bps: 0.0,
            as_of: latest.observed_at,
            collector: Arc::clone(&latest.collector),
        },
        None => Verdict::Hold,
    }
}
