use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::key::InterfaceKey;
use super::sample::{CycleBatch, Sample};

/// Result of grouping one cycle's batches by interface key.
#[derive(Debug, Default)]
pub struct ResolvedCycle {
    /// Samples per key, at most one per contributing collector.
    pub groups: HashMap<InterfaceKey, Vec<Sample>>,
    /// Same-collector duplicates discarded as stale.
    pub stale_discarded: usize,
}

/// Groups an unordered set of per-collector batches by interface key.
///
/// Two samples from the same collector for the same key within one
/// cycle are not expected; when they occur the one with the latest
/// `observed_at` wins and the earlier is discarded as stale.
pub fn resolve_cycle(batches: Vec<CycleBatch>) -> ResolvedCycle {
    let mut per_collector: HashMap<InterfaceKey, HashMap<Arc<str>, Sample>> = HashMap::new();
    let mut stale_discarded = 0usize;

    for batch in batches {
        for sample in batch.samples {
            let slot = per_collector
                .entry(sample.key.clone())
                .or_default()
                .entry(Arc::clone(&sample.collector));

            match slot {
                std::collections::hash_map::Entry::Vacant(v) => {
                    v.insert(sample);
                }
                std::collections::hash_map::Entry::Occupied(mut o) => {
                    let kept = o.get();
                    if sample.observed_at >= kept.observed_at {
                        debug!(
                            key = %sample.key,
                            collector = %sample.collector,
                            "discarding stale duplicate sample",
                        );
                        o.insert(sample);
                    } else {
                        debug!(
                            key = %sample.key,
                            collector = %sample.collector,
                            "discarding out-of-order duplicate sample",
                        );
                    }
                    stale_discarded += 1;
                }
            }
        }
    }

    let groups = per_collector
        .into_iter()
        .map(|(key, by_collector)| (key, by_collector.into_values().collect()))
        .collect();

    ResolvedCycle {
        groups,
        stale_discarded,
    }
}
