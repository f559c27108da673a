use std::time::SystemTime;

use super::key::InterfaceKey;
use super::status::{CanonicalState, LinkStatus, Transition, TransitionKind};

/// Ledger side effect required by a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOp {
    /// Open a downtime interval at the given instant.
    Open(SystemTime),
    /// Close the open downtime interval at the given instant.
    Close(SystemTime),
}

/// What one detection produced: an event for the alert sinks and/or a
/// ledger operation.
#[derive(Debug, Clone)]
pub struct Detection {
    pub event: Option<Transition>,
    pub ledger_op: Option<LedgerOp>,
}

impl Detection {
    const fn none() -> Self {
        Self {
            event: None,
            ledger_op: None,
        }
    }
}

/// Compares a key's previous status against a freshly decided state.
///
/// Deterministic {UNKNOWN, UP, DOWN} state machine, driven solely by
/// aggregator verdicts. A first observation records the baseline
/// without emitting an event; a first DOWN still opens a downtime
/// interval so the outage is accounted from its start.
pub fn detect(key: &InterfaceKey, prev: LinkStatus, next: &CanonicalState) -> Detection {
    match (prev, next.status) {
        (LinkStatus::Unknown, LinkStatus::Up) => Detection::none(),

        (LinkStatus::Unknown, LinkStatus::Down) => Detection {
            event: None,
            ledger_op: Some(LedgerOp::Open(next.as_of)),
        },

        (LinkStatus::Up, LinkStatus::Down) => Detection {
            event: Some(Transition {
                key: key.clone(),
                kind: TransitionKind::WentDown,
                from: prev,
                to: next.status,
                occurred_at: next.as_of,
                bps: next.bps,
            }),
            ledger_op: Some(LedgerOp::Open(next.as_of)),
        },

        (LinkStatus::Down, LinkStatus::Up) => Detection {
            event: Some(Transition {
                key: key.clone(),
                kind: TransitionKind::CameUp,
                from: prev,
                to: next.status,
                occurred_at: next.as_of,
                bps: next.bps,
            }),
            ledger_op: Some(LedgerOp::Close(next.as_of)),
        },

        // No change, or a verdict that cannot occur (the aggregator
        // never decides Unknown).
        _ => Detection::none(),
    }
}
