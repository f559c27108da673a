use std::sync::Arc;
use std::time::SystemTime;

use super::key::InterfaceKey;

/// Reconciled verdict for a link.
///
/// `Unknown` is distinct from `Down`: a key that has never produced a
/// decidable sample set holds `Unknown` and accrues no downtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    Unknown,
    Up,
    Down,
}

impl LinkStatus {
    /// Canonical string form for logs, exports, and the query surface.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// How many collectors back the current verdict for a key.
///
/// `known` counts collectors that have ever reported the key;
/// `reporting` counts those with a sample inside the freshness window
/// at the last decision. A shortfall means the verdict rests on partial
/// coverage (collector outage or failover in progress).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceCoverage {
    pub reporting: u32,
    pub known: u32,
}

impl SourceCoverage {
    /// Whether fewer collectors are reporting than have been seen.
    pub fn is_degraded(self) -> bool {
        self.reporting < self.known
    }
}

/// Best current knowledge for one key: the single reconciled verdict
/// produced by the aggregation pass.
///
/// Invariant: `status == Up` exactly when `bps > 0`.
#[derive(Debug, Clone)]
pub struct CanonicalState {
    pub status: LinkStatus,
    /// Reconciled bit rate; zero for `Down` and `Unknown`.
    pub bps: f64,
    /// Observation time backing the verdict. Non-decreasing per key.
    pub as_of: SystemTime,
    /// Collector whose sample decided the verdict, if any.
    pub collector: Option<Arc<str>>,
    pub coverage: SourceCoverage,
}

impl CanonicalState {
    /// Initial state for a key that has never been decided.
    pub fn unknown() -> Self {
        Self {
            status: LinkStatus::Unknown,
            bps: 0.0,
            as_of: SystemTime::UNIX_EPOCH,
            collector: None,
            coverage: SourceCoverage::default(),
        }
    }
}

/// Direction of a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    WentDown,
    CameUp,
}

impl TransitionKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WentDown => "went_down",
            Self::CameUp => "came_up",
        }
    }
}

/// A status-change event, emitted once per detected flip and fanned
/// out to the alert sinks. Immutable once emitted.
#[derive(Debug, Clone)]
pub struct Transition {
    pub key: InterfaceKey,
    pub kind: TransitionKind,
    pub from: LinkStatus,
    pub to: LinkStatus,
    pub occurred_at: SystemTime,
    /// Reconciled bit rate after the change.
    pub bps: f64,
}
