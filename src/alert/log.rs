use tracing::{info, warn};

use crate::engine::status::{Transition, TransitionKind};

/// Writes transition events to the structured log.
#[derive(Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }

    pub fn name(&self) -> &str {
        "log"
    }

    pub fn notify(&self, transition: &Transition) {
        match transition.kind {
            TransitionKind::WentDown => warn!(
                key = %transition.key,
                occurred_at = ?transition.occurred_at,
                "interface went down",
            ),
            TransitionKind::CameUp => info!(
                key = %transition.key,
                bps = transition.bps,
                occurred_at = ?transition.occurred_at,
                "interface came up",
            ),
        }
    }
}
