use std::collections::BTreeMap;
use std::time::SystemTime;

use dashmap::DashMap;
use thiserror::Error;

use super::key::InterfaceKey;

/// Ledger invariant violations.
///
/// These indicate the single-writer-per-key discipline was broken and
/// are surfaced as hard errors, never corrected in place.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("downtime interval already open for {key} since {started_at:?}")]
    AlreadyOpen {
        key: InterfaceKey,
        started_at: SystemTime,
    },

    #[error("no open downtime interval for {key}")]
    NotOpen { key: InterfaceKey },
}

/// Half-open query window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: SystemTime,
    pub end: SystemTime,
}

impl TimeWindow {
    pub fn new(start: SystemTime, end: SystemTime) -> Self {
        Self { start, end }
    }
}

/// One continuous down period for a key. `ended_at` is `None` while
/// the key is still down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DowntimeInterval {
    pub started_at: SystemTime,
    pub ended_at: Option<SystemTime>,
}

/// Per-key interval history: closed intervals indexed by start time
/// plus at most one open interval.
#[derive(Debug, Default)]
struct KeyHistory {
    closed: BTreeMap<SystemTime, SystemTime>,
    open: Option<SystemTime>,
}

impl KeyHistory {
    /// Total down-seconds inside `window`, clipping every overlapping
    /// interval; the open interval is clipped at `now`.
    fn down_seconds(&self, window: &TimeWindow, now: SystemTime) -> f64 {
        let mut total = 0.0;

        if let Some(started_at) = self.open {
            total += clipped_seconds(started_at, now, window);
        }

        // Closed intervals are disjoint and ordered, so their end
        // times increase with their start times: walking backwards
        // from the window end, the first interval ending at or before
        // the window start terminates the scan.
        for (&started_at, &ended_at) in self.closed.range(..window.end).rev() {
            if ended_at <= window.start {
                break;
            }
            total += clipped_seconds(started_at, ended_at, window);
        }

        total
    }

    fn intervals(&self) -> Vec<DowntimeInterval> {
        let mut out: Vec<DowntimeInterval> = self
            .closed
            .iter()
            .map(|(&started_at, &ended_at)| DowntimeInterval {
                started_at,
                ended_at: Some(ended_at),
            })
            .collect();

        if let Some(started_at) = self.open {
            out.push(DowntimeInterval {
                started_at,
                ended_at: None,
            });
        }

        out
    }
}

/// Overlap of `[started_at, ended_at)` with `window`, in seconds,
/// clamped non-negative.
fn clipped_seconds(started_at: SystemTime, ended_at: SystemTime, window: &TimeWindow) -> f64 {
    let from = started_at.max(window.start);
    let to = ended_at.min(window.end);

    to.duration_since(from)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Append-only store of downtime intervals per key, queryable over
/// arbitrary time windows.
///
/// Entries are independently lockable so ledger mutation by the cycle
/// pass and window queries from the query surface never contend on a
/// global lock.
#[derive(Debug, Default)]
pub struct DowntimeLedger {
    keys: DashMap<InterfaceKey, KeyHistory>,
}

impl DowntimeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a downtime interval for `key` at `at`.
    pub fn open(&self, key: &InterfaceKey, at: SystemTime) -> Result<(), LedgerError> {
        let mut history = self.keys.entry(key.clone()).or_default();

        if let Some(started_at) = history.open {
            return Err(LedgerError::AlreadyOpen {
                key: key.clone(),
                started_at,
            });
        }

        history.open = Some(at);
        Ok(())
    }

    /// Closes the open interval for `key` at `at`.
    pub fn close(&self, key: &InterfaceKey, at: SystemTime) -> Result<(), LedgerError> {
        let mut history = self
            .keys
            .get_mut(key)
            .ok_or_else(|| LedgerError::NotOpen { key: key.clone() })?;

        let started_at = history.open.take().ok_or_else(|| LedgerError::NotOpen {
            key: key.clone(),
        })?;

        history.closed.insert(started_at, at.max(started_at));
        Ok(())
    }

    /// Start of the open interval for `key`, if the key is down.
    pub fn open_interval(&self, key: &InterfaceKey) -> Option<SystemTime> {
        self.keys.get(key).and_then(|h| h.open)
    }

    /// Total down-seconds for `key` inside `window`.
    pub fn query(&self, key: &InterfaceKey, window: &TimeWindow, now: SystemTime) -> f64 {
        self.keys
            .get(key)
            .map(|h| h.down_seconds(window, now))
            .unwrap_or(0.0)
    }

    /// Sum of per-key down-seconds across all known keys for `window`.
    pub fn query_all(&self, window: &TimeWindow, now: SystemTime) -> f64 {
        self.keys
            .iter()
            .map(|entry| entry.down_seconds(window, now))
            .sum()
    }

    /// Full interval history for `key`, open interval last.
    pub fn intervals(&self, key: &InterfaceKey) -> Vec<DowntimeInterval> {
        self.keys
            .get(key)
            .map(|h| h.intervals())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn t(seconds: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + seconds)
    }

    fn key() -> InterfaceKey {
        InterfaceKey::new("10.0.0.1", 1)
    }

    #[test]
    fn test_closed_interval_fully_inside_window() {
        let ledger = DowntimeLedger::new();
        ledger.open(&key(), t(100)).expect("open");
        ledger.close(&key(), t(220)).expect("close");

        let window = TimeWindow::new(t(0), t(1000));
        assert_eq!(ledger.query(&key(), &window, t(1000)), 120.0);
    }

    #[test]
    fn test_window_clips_interval_edges() {
        let ledger = DowntimeLedger::new();
        ledger.open(&key(), t(100)).expect("open");
        ledger.close(&key(), t(500)).expect("close");

        // Window starts and ends inside the interval.
        let window = TimeWindow::new(t(200), t(300));
        assert_eq!(ledger.query(&key(), &window, t(1000)), 100.0);
    }

    #[test]
    fn test_open_interval_clipped_at_now_and_window_end() {
        let ledger = DowntimeLedger::new();
        ledger.open(&key(), t(0)).expect("open");

        // Open since T, now = T+900, window [T+300, T+600) => 300s.
        let window = TimeWindow::new(t(300), t(600));
        assert_eq!(ledger.query(&key(), &window, t(900)), 300.0);
    }

    #[test]
    fn test_interval_outside_window_contributes_zero() {
        let ledger = DowntimeLedger::new();
        ledger.open(&key(), t(100)).expect("open");
        ledger.close(&key(), t(200)).expect("close");

        let before = TimeWindow::new(t(0), t(100));
        assert_eq!(ledger.query(&key(), &before, t(1000)), 0.0);

        let after = TimeWindow::new(t(200), t(300));
        assert_eq!(ledger.query(&key(), &after, t(1000)), 0.0);
    }

    #[test]
    fn test_closed_window_query_is_idempotent() {
        let ledger = DowntimeLedger::new();
        ledger.open(&key(), t(100)).expect("open");
        ledger.close(&key(), t(250)).expect("close");

        let window = TimeWindow::new(t(50), t(400));
        let first = ledger.query(&key(), &window, t(1000));
        let second = ledger.query(&key(), &window, t(2000));
        assert_eq!(first, second);
        assert_eq!(first, 150.0);
    }

    #[test]
    fn test_multiple_intervals_sum_within_window() {
        let ledger = DowntimeLedger::new();
        ledger.open(&key(), t(0)).expect("open");
        ledger.close(&key(), t(60)).expect("close");
        ledger.open(&key(), t(300)).expect("open");
        ledger.close(&key(), t(360)).expect("close");
        ledger.open(&key(), t(900)).expect("open");
        ledger.close(&key(), t(960)).expect("close");

        let window = TimeWindow::new(t(30), t(930));
        // 30 from the first, 60 from the second, 30 from the third.
        assert_eq!(ledger.query(&key(), &window, t(1000)), 120.0);
    }

    #[test]
    fn test_query_all_sums_across_keys() {
        let ledger = DowntimeLedger::new();
        let a = InterfaceKey::new("10.0.0.1", 1);
        let b = InterfaceKey::new("10.0.0.2", 7);

        ledger.open(&a, t(100)).expect("open a");
        ledger.close(&a, t(220)).expect("close a");
        ledger.open(&b, t(100)).expect("open b");
        ledger.close(&b, t(400)).expect("close b");

        let window = TimeWindow::new(t(0), t(1000));
        assert_eq!(ledger.query_all(&window, t(1000)), 420.0);
    }

    #[test]
    fn test_unknown_key_queries_zero() {
        let ledger = DowntimeLedger::new();
        let window = TimeWindow::new(t(0), t(1000));
        assert_eq!(ledger.query(&key(), &window, t(1000)), 0.0);
    }

    #[test]
    fn test_double_open_is_invariant_violation() {
        let ledger = DowntimeLedger::new();
        ledger.open(&key(), t(100)).expect("open");

        let err = ledger.open(&key(), t(200)).expect_err("second open fails");
        assert!(matches!(err, LedgerError::AlreadyOpen { .. }));

        // The original interval is untouched.
        assert_eq!(ledger.open_interval(&key()), Some(t(100)));
    }

    #[test]
    fn test_close_without_open_is_invariant_violation() {
        let ledger = DowntimeLedger::new();

        let err = ledger.close(&key(), t(100)).expect_err("close fails");
        assert!(matches!(err, LedgerError::NotOpen { .. }));

        ledger.open(&key(), t(100)).expect("open");
        ledger.close(&key(), t(200)).expect("close");
        let err = ledger.close(&key(), t(300)).expect_err("second close fails");
        assert!(matches!(err, LedgerError::NotOpen { .. }));
    }

    #[test]
    fn test_intervals_history() {
        let ledger = DowntimeLedger::new();
        ledger.open(&key(), t(0)).expect("open");
        ledger.close(&key(), t(60)).expect("close");
        ledger.open(&key(), t(120)).expect("open");

        let intervals = ledger.intervals(&key());
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].ended_at, Some(t(60)));
        assert_eq!(intervals[1].started_at, t(120));
        assert_eq!(intervals[1].ended_at, None);
    }

    #[test]
    fn test_reverse_scan_skips_old_history() {
        let ledger = DowntimeLedger::new();
        for i in 0..100u64 {
            ledger.open(&key(), t(i * 100)).expect("open");
            ledger.close(&key(), t(i * 100 + 50)).expect("close");
        }

        // Window covering only the last interval.
        let window = TimeWindow::new(t(9_900), t(10_000));
        assert_eq!(ledger.query(&key(), &window, t(20_000)), 50.0);
    }
}
