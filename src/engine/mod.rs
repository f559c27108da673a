//! Status-reconciliation engine: merges per-collector sample batches
//! at cycle boundaries, reconciles each interface key into one
//! canonical up/down state, detects transitions, and accounts
//! downtime in the ledger.

pub mod aggregate;
pub mod key;
pub mod ledger;
pub mod resolver;
pub mod sample;
pub mod status;
pub mod transition;

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alert::AlertSink;
use crate::export::health::HealthMetrics;

use self::aggregate::{SampleWindow, Verdict};
use self::key::InterfaceKey;
use self::ledger::{DowntimeLedger, LedgerError};
use self::resolver::resolve_cycle;
use self::sample::{CycleBatch, Sample};
use self::status::{CanonicalState, LinkStatus, Transition};
use self::transition::LedgerOp;

/// Hard internal errors. An invariant violation means the
/// single-writer-per-key discipline broke; it is surfaced, never
/// silently corrected.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("downtime ledger invariant violated: {0}")]
    Invariant(#[from] LedgerError),
}

/// Everything the engine tracks for one key.
#[derive(Debug)]
struct KeyState {
    window: SampleWindow,
    canonical: CanonicalState,
}

impl KeyState {
    fn new() -> Self {
        Self {
            window: SampleWindow::new(),
            canonical: CanonicalState::unknown(),
        }
    }
}

/// Result of one cycle pass.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    /// Emitted transitions, ordered by occurrence time.
    pub transitions: Vec<Transition>,
    /// Keys that received samples this cycle.
    pub keys_seen: usize,
    /// Same-collector duplicates discarded by the resolver.
    pub stale_discarded: usize,
}

/// Owns all per-key canonical state and the downtime ledger.
///
/// `apply_cycle` is the single writer; per-key entries live in a
/// `DashMap` so the query surface reads concurrently without a global
/// lock.
pub struct StatusEngine {
    freshness_window: Duration,
    states: DashMap<InterfaceKey, KeyState>,
    ledger: DowntimeLedger,
}

impl StatusEngine {
    pub fn new(freshness_window: Duration) -> Self {
        Self {
            freshness_window,
            states: DashMap::new(),
            ledger: DowntimeLedger::new(),
        }
    }

    /// Merges one cycle's batches and re-decides every tracked key.
    ///
    /// Keys without a fresh sample hold their previous state (missing
    /// data is never treated as an explicit zero); their coverage is
    /// still refreshed so degradation shows up on the query surface.
    pub fn apply_cycle(
        &self,
        batches: Vec<CycleBatch>,
        cycle_at: SystemTime,
    ) -> Result<CycleOutcome, EngineError> {
        let resolved = resolve_cycle(batches);
        let mut groups = resolved.groups;
        let keys_seen = groups.len();

        let cutoff = cycle_at
            .checked_sub(self.freshness_window)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut transitions = Vec::new();

        // Re-decide keys already tracked, absorbing any new samples.
        for mut entry in self.states.iter_mut() {
            let (key, state) = entry.pair_mut();
            let samples = groups.remove(key);
            Self::step_key(&self.ledger, key, state, samples, cutoff, &mut transitions)?;
        }

        // Keys reported for the first time.
        for (key, samples) in groups {
            let mut state = KeyState::new();
            Self::step_key(
                &self.ledger,
                &key,
                &mut state,
                Some(samples),
                cutoff,
                &mut transitions,
            )?;
            self.states.insert(key, state);
        }

        transitions.sort_by_key(|t| t.occurred_at);

        Ok(CycleOutcome {
            transitions,
            keys_seen,
            stale_discarded: resolved.stale_discarded,
        })
    }

    fn step_key(
        ledger: &DowntimeLedger,
        key: &InterfaceKey,
        state: &mut KeyState,
        samples: Option<Vec<Sample>>,
        cutoff: SystemTime,
        transitions: &mut Vec<Transition>,
    ) -> Result<(), EngineError> {
        if let Some(samples) = samples {
            for sample in samples {
                state.window.absorb(sample);
            }
        }
        state.window.prune(cutoff);

        match aggregate::decide(&state.window) {
            Verdict::Hold => {
                state.canonical.coverage = state.window.coverage();
            }
            Verdict::Decide {
                status,
                bps,
                as_of,
                collector,
            } => {
                // The per-key timeline never moves backwards, even
                // when a late batch carries an older observation
                // timestamp from a skewed collector clock.
                let as_of = if as_of < state.canonical.as_of {
                    debug!(key = %key, "clamping decision time to previous as_of");
                    state.canonical.as_of
                } else {
                    as_of
                };

                let next = CanonicalState {
                    status,
                    bps,
                    as_of,
                    collector: Some(collector),
                    coverage: state.window.coverage(),
                };

                let detection = transition::detect(key, state.canonical.status, &next);

                if let Some(op) = detection.ledger_op {
                    match op {
                        LedgerOp::Open(at) => ledger.open(key, at)?,
                        LedgerOp::Close(at) => ledger.close(key, at)?,
                    }
                }

                if let Some(event) = detection.event {
                    transitions.push(event);
                }

                state.canonical = next;
            }
        }

        Ok(())
    }

    /// Current canonical state for `key`.
    pub fn canonical(&self, key: &InterfaceKey) -> Option<CanonicalState> {
        self.states.get(key).map(|s| s.canonical.clone())
    }

    /// Point-in-time snapshot of every tracked key.
    pub fn snapshot(&self) -> Vec<(InterfaceKey, CanonicalState)> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().canonical.clone()))
            .collect()
    }

    /// Number of tracked keys.
    pub fn key_count(&self) -> usize {
        self.states.len()
    }

    /// Number of keys currently down.
    pub fn down_count(&self) -> usize {
        self.states
            .iter()
            .filter(|e| e.value().canonical.status == LinkStatus::Down)
            .count()
    }

    pub fn ledger(&self) -> &DowntimeLedger {
        &self.ledger
    }
}

/// Async wrapper around [`StatusEngine`]: queues per-collector batches
/// and runs the cycle pass on a fixed ticker, fanning transitions out
/// to the alert sinks.
pub struct StatusPipeline {
    engine: Arc<StatusEngine>,
    cycle_interval: Duration,
    sinks: Vec<AlertSink>,
    health: Option<Arc<HealthMetrics>>,

    batch_tx: mpsc::Sender<CycleBatch>,
    /// Batch receiver, taken by `start`.
    batch_rx: Option<mpsc::Receiver<CycleBatch>>,

    /// Handle for the run task.
    run_task: Arc<tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl StatusPipeline {
    pub fn new(engine: Arc<StatusEngine>, cycle_interval: Duration) -> Self {
        let (batch_tx, batch_rx) = mpsc::channel(1024);

        Self {
            engine,
            cycle_interval,
            sinks: Vec::with_capacity(2),
            health: None,
            batch_tx,
            batch_rx: Some(batch_rx),
            run_task: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    /// Registers an alert sink for transition fan-out.
    pub fn add_sink(&mut self, sink: AlertSink) {
        self.sinks.push(sink);
    }

    /// Wires health metrics updated by the run loop.
    pub fn set_health(&mut self, health: Arc<HealthMetrics>) {
        self.health = Some(health);
    }

    /// Sender used by collector pollers to queue batches.
    pub fn sender(&self) -> mpsc::Sender<CycleBatch> {
        self.batch_tx.clone()
    }

    /// Starts the alert sinks and spawns the cycle run loop.
    pub async fn start(&mut self, ctx: CancellationToken) -> Result<()> {
        let mut batch_rx = self.batch_rx.take().expect("start called more than once");

        let mut sinks = std::mem::take(&mut self.sinks);
        for sink in &mut sinks {
            sink.start().await?;
            info!(sink = sink.name(), "alert sink started");
        }

        let engine = Arc::clone(&self.engine);
        let health = self.health.clone();
        let cycle_interval = self.cycle_interval;

        let run_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cycle_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            let mut pending: Vec<CycleBatch> = Vec::new();

            loop {
                tokio::select! {
                    _ = ctx.cancelled() => {
                        // Final cycle so batches already queued are not lost.
                        if !pending.is_empty() {
                            let batches = std::mem::take(&mut pending);
                            Self::run_cycle(&engine, batches, &mut sinks, &health).await;
                        }
                        break;
                    }
                    batch = batch_rx.recv() => {
                        match batch {
                            Some(batch) => pending.push(batch),
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        let batches = std::mem::take(&mut pending);
                        if batches.is_empty() && engine.key_count() == 0 {
                            continue;
                        }
                        if !Self::run_cycle(&engine, batches, &mut sinks, &health).await {
                            break;
                        }
                    }
                }
            }

            for sink in &mut sinks {
                if let Err(e) = sink.stop().await {
                    warn!(sink = sink.name(), error = %e, "error stopping alert sink");
                }
            }

            debug!("status pipeline stopped");
        });

        *self.run_task.lock().await = Some(run_task);

        Ok(())
    }

    /// Runs one cycle pass and fans out its transitions. Returns false
    /// when the pipeline must stop (invariant violation).
    async fn run_cycle(
        engine: &StatusEngine,
        batches: Vec<CycleBatch>,
        sinks: &mut [AlertSink],
        health: &Option<Arc<HealthMetrics>>,
    ) -> bool {
        let outcome = match engine.apply_cycle(batches, SystemTime::now()) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "state invariant violated, stopping status pipeline");
                return false;
            }
        };

        if let Some(health) = health {
            health.cycles_processed.inc();
            health.keys_tracked.set(engine.key_count() as f64);
            health.keys_down.set(engine.down_count() as f64);
            health
                .stale_samples_discarded
                .inc_by(outcome.stale_discarded as f64);

            for transition in &outcome.transitions {
                health
                    .transitions_total
                    .with_label_values(&[transition.kind.as_str()])
                    .inc();
            }
        }

        for transition in &outcome.transitions {
            for sink in sinks.iter_mut() {
                if let Err(e) = sink.notify(transition).await {
                    warn!(
                        sink = sink.name(),
                        key = %transition.key,
                        error = %e,
                        "alert sink notification failed",
                    );
                    if let Some(health) = health {
                        health
                            .alert_failures
                            .with_label_values(&[sink.name()])
                            .inc();
                    }
                }
            }
        }

        true
    }

    /// Waits for the run task to finish.
    pub async fn wait_for_shutdown(&self) {
        let run_task = { self.run_task.lock().await.take() };
        if let Some(run_task) = run_task {
            if let Err(e) = run_task.await {
                warn!(error = %e, "status pipeline task join failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(seconds: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + seconds)
    }

    fn sample(exporter: &str, ifindex: u32, collector: &str, bps: f64, at: SystemTime) -> Sample {
        Sample {
            key: InterfaceKey::new(exporter, ifindex),
            collector: Arc::from(collector),
            bps,
            observed_at: at,
        }
    }

    fn batch(collector: &str, at: SystemTime, samples: Vec<Sample>) -> CycleBatch {
        CycleBatch {
            collector: Arc::from(collector),
            retrieved_at: at,
            samples,
        }
    }

    fn engine() -> StatusEngine {
        StatusEngine::new(Duration::from_secs(90))
    }

    #[test]
    fn test_first_positive_sample_is_up_without_event() {
        let engine = engine();
        let key = InterfaceKey::new("10.0.0.1", 1);

        let outcome = engine
            .apply_cycle(
                vec![batch(
                    "fc-a",
                    t(0),
                    vec![sample("10.0.0.1", 1, "fc-a", 120.0, t(0))],
                )],
                t(0),
            )
            .expect("cycle");

        assert!(outcome.transitions.is_empty());
        let state = engine.canonical(&key).expect("state exists");
        assert_eq!(state.status, LinkStatus::Up);
        assert_eq!(state.bps, 120.0);
        assert!(engine.ledger().open_interval(&key).is_none());
    }

    #[test]
    fn test_up_to_down_emits_transition_and_opens_interval() {
        let engine = engine();
        let key = InterfaceKey::new("10.0.0.1", 1);

        engine
            .apply_cycle(
                vec![batch(
                    "fc-a",
                    t(0),
                    vec![sample("10.0.0.1", 1, "fc-a", 120.0, t(0))],
                )],
                t(0),
            )
            .expect("cycle 1");

        let outcome = engine
            .apply_cycle(
                vec![batch(
                    "fc-a",
                    t(120),
                    vec![sample("10.0.0.1", 1, "fc-a", 0.0, t(120))],
                )],
                t(120),
            )
            .expect("cycle 2");

        assert_eq!(outcome.transitions.len(), 1);
        assert_eq!(
            outcome.transitions[0].kind,
            status::TransitionKind::WentDown
        );
        assert_eq!(engine.ledger().open_interval(&key), Some(t(120)));
    }

    #[test]
    fn test_missing_data_holds_previous_state() {
        let engine = engine();
        let key = InterfaceKey::new("10.0.0.1", 1);

        engine
            .apply_cycle(
                vec![batch(
                    "fc-a",
                    t(0),
                    vec![sample("10.0.0.1", 1, "fc-a", 120.0, t(0))],
                )],
                t(0),
            )
            .expect("cycle 1");

        // No samples for a long time: state holds, coverage degrades.
        let outcome = engine.apply_cycle(Vec::new(), t(600)).expect("cycle 2");

        assert!(outcome.transitions.is_empty());
        let state = engine.canonical(&key).expect("state exists");
        assert_eq!(state.status, LinkStatus::Up);
        assert_eq!(state.bps, 120.0);
        assert_eq!(state.coverage.reporting, 0);
        assert!(state.coverage.is_degraded());
    }

    #[test]
    fn test_failover_mask_suppresses_zero_within_freshness() {
        let engine = engine();
        let key = InterfaceKey::new("10.0.0.1", 1);

        // fc-a reports traffic at t=0.
        engine
            .apply_cycle(
                vec![batch(
                    "fc-a",
                    t(0),
                    vec![sample("10.0.0.1", 1, "fc-a", 120.0, t(0))],
                )],
                t(0),
            )
            .expect("cycle 1");

        // fc-b reports zero at t=30; fc-a's positive reading is still
        // inside the freshness window, so the link stays up.
        let outcome = engine
            .apply_cycle(
                vec![batch(
                    "fc-b",
                    t(30),
                    vec![sample("10.0.0.1", 1, "fc-b", 0.0, t(30))],
                )],
                t(30),
            )
            .expect("cycle 2");

        assert!(outcome.transitions.is_empty());
        let state = engine.canonical(&key).expect("state exists");
        assert_eq!(state.status, LinkStatus::Up);
        assert_eq!(state.coverage.reporting, 2);
    }

    #[test]
    fn test_stale_positive_no_longer_masks() {
        let engine = engine();
        let key = InterfaceKey::new("10.0.0.1", 1);

        engine
            .apply_cycle(
                vec![batch(
                    "fc-a",
                    t(0),
                    vec![sample("10.0.0.1", 1, "fc-a", 120.0, t(0))],
                )],
                t(0),
            )
            .expect("cycle 1");

        // 120s later (freshness 90s) fc-a's reading has aged out; a
        // zero from fc-b now decides down.
        let outcome = engine
            .apply_cycle(
                vec![batch(
                    "fc-b",
                    t(120),
                    vec![sample("10.0.0.1", 1, "fc-b", 0.0, t(120))],
                )],
                t(120),
            )
            .expect("cycle 2");

        assert_eq!(outcome.transitions.len(), 1);
        let state = engine.canonical(&key).expect("state exists");
        assert_eq!(state.status, LinkStatus::Down);
    }

    #[test]
    fn test_sample_older_than_cutoff_prunes_to_hold() {
        let engine = engine();
        let key = InterfaceKey::new("10.0.0.1", 1);

        engine
            .apply_cycle(
                vec![batch(
                    "fc-a",
                    t(100),
                    vec![sample("10.0.0.1", 1, "fc-a", 120.0, t(100))],
                )],
                t(100),
            )
            .expect("cycle 1");

        // fc-b's zero is older than the freshness cutoff at this cycle;
        // it prunes away immediately and the state holds.
        let outcome = engine
            .apply_cycle(
                vec![batch(
                    "fc-b",
                    t(250),
                    vec![sample("10.0.0.1", 1, "fc-b", 0.0, t(95))],
                )],
                t(250),
            )
            .expect("cycle 2");

        assert!(outcome.transitions.is_empty());

        let state = engine.canonical(&key).expect("state exists");
        assert_eq!(state.status, LinkStatus::Up);
        assert_eq!(state.as_of, t(100));
    }

    #[test]
    fn test_skewed_decision_clamps_as_of() {
        let engine = engine();
        let key = InterfaceKey::new("10.0.0.1", 1);

        engine
            .apply_cycle(
                vec![batch(
                    "fc-a",
                    t(100),
                    vec![sample("10.0.0.1", 1, "fc-a", 120.0, t(100))],
                )],
                t(100),
            )
            .expect("cycle 1");

        // fc-b's clock runs behind: a stronger reading stamped t=95
        // wins the decision, but the key's timeline must not move
        // backwards from t=100.
        let outcome = engine
            .apply_cycle(
                vec![batch(
                    "fc-b",
                    t(150),
                    vec![sample("10.0.0.1", 1, "fc-b", 500.0, t(95))],
                )],
                t(150),
            )
            .expect("cycle 2");

        assert!(outcome.transitions.is_empty());

        let state = engine.canonical(&key).expect("state exists");
        assert_eq!(state.status, LinkStatus::Up);
        assert_eq!(state.bps, 500.0);
        assert_eq!(state.as_of, t(100));
    }

    #[test]
    fn test_transitions_sorted_by_occurrence() {
        let engine = engine();

        engine
            .apply_cycle(
                vec![batch(
                    "fc-a",
                    t(0),
                    vec![
                        sample("10.0.0.1", 1, "fc-a", 120.0, t(0)),
                        sample("10.0.0.2", 1, "fc-a", 90.0, t(0)),
                    ],
                )],
                t(0),
            )
            .expect("cycle 1");

        let outcome = engine
            .apply_cycle(
                vec![batch(
                    "fc-a",
                    t(200),
                    vec![
                        sample("10.0.0.2", 1, "fc-a", 0.0, t(190)),
                        sample("10.0.0.1", 1, "fc-a", 0.0, t(180)),
                    ],
                )],
                t(200),
            )
            .expect("cycle 2");

        assert_eq!(outcome.transitions.len(), 2);
        assert!(outcome.transitions[0].occurred_at <= outcome.transitions[1].occurred_at);
    }
}
