use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramVec, Opts, Registry, TextEncoder,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::engine::key::InterfaceKey;
use crate::engine::ledger::TimeWindow;
use crate::engine::status::LinkStatus;
use crate::engine::StatusEngine;

/// Prometheus metrics for agent health, plus the HTTP server exposing
/// them alongside the status/downtime query surface.
///
/// All metrics use the "flowwatch" namespace.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Samples ingested per collector.
    pub samples_ingested: CounterVec,
    /// Malformed rows discarded per collector.
    pub parse_row_errors: CounterVec,
    /// Poll attempts per collector and outcome (success/error/timeout).
    pub polls_total: CounterVec,
    /// Poll latency per collector.
    pub poll_duration: HistogramVec,
    /// Whether the last poll of a collector succeeded (1=yes, 0=no).
    pub collector_up: prometheus::GaugeVec,
    /// Total aggregation cycles processed.
    pub cycles_processed: Counter,
    /// Interface keys currently tracked.
    pub keys_tracked: Gauge,
    /// Interface keys currently down.
    pub keys_down: Gauge,
    /// Transitions emitted by direction.
    pub transitions_total: CounterVec,
    /// Same-collector duplicate samples discarded as stale.
    pub stale_samples_discarded: Counter,
    /// Alert sink notification failures by sink.
    pub alert_failures: CounterVec,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let samples_ingested = CounterVec::new(
            Opts::new("samples_ingested_total", "Samples ingested per collector.")
                .namespace("flowwatch"),
            &["collector"],
        )?;
        let parse_row_errors = CounterVec::new(
            Opts::new(
                "parse_row_errors_total",
                "Malformed stats rows discarded per collector.",
            )
            .namespace("flowwatch"),
            &["collector"],
        )?;
        let polls_total = CounterVec::new(
            Opts::new("polls_total", "Poll attempts per collector and outcome.")
                .namespace("flowwatch"),
            &["collector", "status"],
        )?;
        let poll_duration = HistogramVec::new(
            prometheus::HistogramOpts::new("poll_duration_seconds", "Poll latency per collector.")
                .namespace("flowwatch")
                .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["collector"],
        )?;
        let collector_up = prometheus::GaugeVec::new(
            Opts::new(
                "collector_up",
                "Whether the last poll of a collector succeeded (1=yes, 0=no).",
            )
            .namespace("flowwatch"),
            &["collector"],
        )?;
        let cycles_processed = Counter::with_opts(
            Opts::new(
                "cycles_processed_total",
                "Total aggregation cycles processed.",
            )
            .namespace("flowwatch"),
        )?;
        let keys_tracked = Gauge::with_opts(
            Opts::new("keys_tracked", "Interface keys currently tracked.").namespace("flowwatch"),
        )?;
        let keys_down = Gauge::with_opts(
            Opts::new("keys_down", "Interface keys currently down.").namespace("flowwatch"),
        )?;
        let transitions_total = CounterVec::new(
            Opts::new("transitions_total", "Transitions emitted by direction.")
                .namespace("flowwatch"),
            &["direction"],
        )?;
        let stale_samples_discarded = Counter::with_opts(
            Opts::new(
                "stale_samples_discarded_total",
                "Same-collector duplicate samples discarded as stale.",
            )
            .namespace("flowwatch"),
        )?;
        let alert_failures = CounterVec::new(
            Opts::new(
                "alert_failures_total",
                "Alert sink notification failures by sink.",
            )
            .namespace("flowwatch"),
            &["sink"],
        )?;

        registry.register(Box::new(samples_ingested.clone()))?;
        registry.register(Box::new(parse_row_errors.clone()))?;
        registry.register(Box::new(polls_total.clone()))?;
        registry.register(Box::new(poll_duration.clone()))?;
        registry.register(Box::new(collector_up.clone()))?;
        registry.register(Box::new(cycles_processed.clone()))?;
        registry.register(Box::new(keys_tracked.clone()))?;
        registry.register(Box::new(keys_down.clone()))?;
        registry.register(Box::new(transitions_total.clone()))?;
        registry.register(Box::new(stale_samples_discarded.clone()))?;
        registry.register(Box::new(alert_failures.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            samples_ingested,
            parse_row_errors,
            polls_total,
            poll_duration,
            collector_up,
            cycles_processed,
            keys_tracked,
            keys_down,
            transitions_total,
            stale_samples_discarded,
            alert_failures,
        })
    }

    /// Starts the HTTP server serving /metrics, /healthz, and the
    /// status/downtime query surface.
    pub async fn start(&self, engine: Arc<StatusEngine>) -> Result<()> {
        let bind_addr = resolve_bind_addr(&self.addr);

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
            engine,
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .route("/status", get(status_handler))
            .route("/downtime", get(downtime_handler))
            .route("/downtime/total", get(downtime_total_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health and query server started");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    cancel.cancelled().await;
                })
                .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health and query server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the HTTP server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Expands the ":port" shorthand to a bindable address.
fn resolve_bind_addr(addr: &str) -> String {
    let addr = if addr.is_empty() { ":9090" } else { addr };

    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
    engine: Arc<StatusEngine>,
}

/// One key's canonical state as served by /status.
#[derive(Debug, Serialize)]
struct StatusRow {
    exporter: String,
    ifindex: u32,
    status: &'static str,
    bps: f64,
    /// Absent while the key is still unknown.
    as_of: Option<DateTime<Utc>>,
    collector: Option<String>,
    reporting: u32,
    known: u32,
    degraded: bool,
}

fn status_rows(engine: &StatusEngine) -> Vec<StatusRow> {
    let mut snapshot = engine.snapshot();
    snapshot.sort_by(|(a, _), (b, _)| a.cmp(b));

    snapshot
        .into_iter()
        .map(|(key, state)| StatusRow {
            exporter: key.exporter.to_string(),
            ifindex: key.ifindex,
            status: state.status.as_str(),
            bps: state.bps,
            as_of: match state.status {
                LinkStatus::Unknown => None,
                _ => Some(state.as_of.into()),
            },
            collector: state.collector.map(|c| c.to_string()),
            reporting: state.coverage.reporting,
            known: state.coverage.known,
            degraded: state.coverage.is_degraded(),
        })
        .collect()
}

/// Half-open query window shared by the downtime endpoints.
#[derive(Debug, Deserialize)]
struct WindowParams {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl WindowParams {
    fn to_window(&self) -> Result<TimeWindow, (StatusCode, String)> {
        if self.end <= self.start {
            return Err((
                StatusCode::BAD_REQUEST,
                "window end must be after start".to_string(),
            ));
        }

        Ok(TimeWindow::new(self.start.into(), self.end.into()))
    }
}

#[derive(Debug, Deserialize)]
struct DowntimeParams {
    exporter: String,
    ifindex: u32,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct DowntimeResponse {
    exporter: String,
    ifindex: u32,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    down_seconds: f64,
}

#[derive(Debug, Serialize)]
struct TotalDowntimeResponse {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    down_seconds: f64,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "encoding metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "encoding error".to_string(),
        );
    }

    match String::from_utf8(buffer) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "converting metrics to string");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

/// GET /status - Canonical state of every tracked key.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<Vec<StatusRow>> {
    Json(status_rows(&state.engine))
}

/// GET /downtime - Down-seconds for one key within a window.
async fn downtime_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DowntimeParams>,
) -> Result<Json<DowntimeResponse>, (StatusCode, String)> {
    let window = WindowParams {
        start: params.start,
        end: params.end,
    }
    .to_window()?;
    let key = InterfaceKey::new(params.exporter.as_str(), params.ifindex);

    let down_seconds = state
        .engine
        .ledger()
        .query(&key, &window, SystemTime::now());

    Ok(Json(DowntimeResponse {
        exporter: params.exporter,
        ifindex: params.ifindex,
        start: params.start,
        end: params.end,
        down_seconds,
    }))
}

/// GET /downtime/total - Down-seconds summed across all keys.
async fn downtime_total_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WindowParams>,
) -> Result<Json<TotalDowntimeResponse>, (StatusCode, String)> {
    let window = params.to_window()?;

    let down_seconds = state.engine.ledger().query_all(&window, SystemTime::now());

    Ok(Json(TotalDowntimeResponse {
        start: params.start,
        end: params.end,
        down_seconds,
    }))
}
