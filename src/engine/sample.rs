use std::sync::Arc;
use std::time::SystemTime;

use super::key::InterfaceKey;

/// One immutable observation of a link's bit rate, as reported by a
/// single collector during one poll.
#[derive(Debug, Clone)]
pub struct Sample {
    /// The link the observation is for.
    pub key: InterfaceKey,
    /// Collector that produced the observation.
    pub collector: Arc<str>,
    /// Observed bit rate in bits per second. Never negative.
    pub bps: f64,
    /// When the observation was taken.
    pub observed_at: SystemTime,
}

impl Sample {
    /// Whether the sample reports traffic on the link.
    pub fn is_positive(&self) -> bool {
        self.bps > 0.0
    }
}

/// All samples retrieved from one collector in one poll.
///
/// Batches queue at the status pipeline and are merged at cycle
/// boundaries, never sample-by-sample.
#[derive(Debug, Clone)]
pub struct CycleBatch {
    /// Collector the batch came from.
    pub collector: Arc<str>,
    /// When the batch was retrieved.
    pub retrieved_at: SystemTime,
    /// Per-interface samples, at most one per key.
    pub samples: Vec<Sample>,
}
