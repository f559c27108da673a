use std::sync::Arc;
use std::time::{Instant, SystemTime};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alert::csv::CsvJournal;
use crate::alert::log::LogSink;
use crate::alert::webhook::WebhookSink;
use crate::alert::AlertSink;
use crate::config::{CollectorConfig, Config};
use crate::engine::key::InterfaceKey;
use crate::engine::sample::{CycleBatch, Sample};
use crate::engine::{StatusEngine, StatusPipeline};
use crate::export::health::HealthMetrics;
use crate::source::parse::parse_stats;
use crate::source::Source;

/// Agent orchestrates all components: collector pollers, the status
/// pipeline, alert sinks, and the health/query server.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    engine: Arc<StatusEngine>,
    pipeline: Option<StatusPipeline>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent, initializing the engine and health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);
        let engine = Arc::new(StatusEngine::new(cfg.aggregation.freshness_window));

        Ok(Self {
            cfg,
            health,
            engine,
            pipeline: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Start all components and begin polling.
    pub async fn start(&mut self) -> Result<()> {
        // 1. Start the health and query server.
        self.health
            .start(Arc::clone(&self.engine))
            .await
            .context("starting health and query server")?;

        // 2. Build the status pipeline with the configured alert sinks.
        let mut pipeline = StatusPipeline::new(
            Arc::clone(&self.engine),
            self.cfg.aggregation.cycle_interval,
        );
        pipeline.set_health(Arc::clone(&self.health));

        if self.cfg.alerts.log.enabled {
            pipeline.add_sink(AlertSink::Log(LogSink::new()));
        }

        if self.cfg.alerts.csv.enabled {
            pipeline.add_sink(AlertSink::Csv(CsvJournal::new(self.cfg.alerts.csv.path.clone())));
            info!(path = %self.cfg.alerts.csv.path.display(), "CSV journal configured");
        }

        if self.cfg.alerts.webhook.enabled {
            pipeline.add_sink(AlertSink::Webhook(WebhookSink::new(
                self.cfg.alerts.webhook.url.clone(),
                self.cfg.alerts.webhook.timeout,
            )));
            info!(url = %self.cfg.alerts.webhook.url, "webhook sink configured");
        }

        // 3. Start the pipeline run loop.
        pipeline
            .start(self.cancel.child_token())
            .await
            .context("starting status pipeline")?;

        // 4. Spawn one poller per collector.
        for collector in &self.cfg.collectors {
            let source = Source::from_config(collector)
                .with_context(|| format!("building source for collector {:?}", collector.name))?;

            info!(
                collector = %collector.name,
                poll_interval = ?collector.poll_interval,
                "collector poller starting",
            );

            self.spawn_poller(collector.clone(), source, pipeline.sender());
        }

        self.pipeline = Some(pipeline);

        info!("agent fully started");

        Ok(())
    }

    /// Gracefully stop all components.
    pub async fn stop(&mut self) -> Result<()> {
        // Signal pollers and the pipeline to stop.
        self.cancel.cancel();

        // Wait for the pipeline to run its final cycle and stop sinks.
        if let Some(pipeline) = &self.pipeline {
            pipeline.wait_for_shutdown().await;
        }

        // Stop the health and query server.
        self.health.stop().await?;

        Ok(())
    }

    /// Spawn the background poll loop for one collector.
    fn spawn_poller(
        &self,
        cfg: CollectorConfig,
        source: Source,
        batch_tx: mpsc::Sender<CycleBatch>,
    ) {
        let cancel = self.cancel.clone();
        let health = Arc::clone(&self.health);

        tokio::spawn(async move {
            let collector: Arc<str> = Arc::from(cfg.name.as_str());

            let mut ticker = tokio::time::interval(cfg.poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let start = Instant::now();

                        let text = match tokio::time::timeout(cfg.timeout, source.fetch()).await {
                            Ok(Ok(text)) => text,
                            Ok(Err(e)) => {
                                warn!(collector = %cfg.name, error = %e, "poll failed");
                                health.polls_total.with_label_values(&[&cfg.name, "error"]).inc();
                                health.collector_up.with_label_values(&[&cfg.name]).set(0.0);
                                continue;
                            }
                            Err(_) => {
                                warn!(
                                    collector = %cfg.name,
                                    timeout = ?cfg.timeout,
                                    "poll timed out",
                                );
                                health.polls_total.with_label_values(&[&cfg.name, "timeout"]).inc();
                                health.collector_up.with_label_values(&[&cfg.name]).set(0.0);
                                continue;
                            }
                        };

                        health
                            .poll_duration
                            .with_label_values(&[&cfg.name])
                            .observe(start.elapsed().as_secs_f64());

                        let retrieved_at = SystemTime::now();

                        let document = match parse_stats(&text) {
                            Ok(document) => document,
                            Err(e) => {
                                warn!(collector = %cfg.name, error = %e, "stats document rejected");
                                health.polls_total.with_label_values(&[&cfg.name, "error"]).inc();
                                health.collector_up.with_label_values(&[&cfg.name]).set(0.0);
                                continue;
                            }
                        };

                        for error in &document.row_errors {
                            warn!(collector = %cfg.name, error = %error, "discarding malformed row");
                        }
                        if !document.row_errors.is_empty() {
                            health
                                .parse_row_errors
                                .with_label_values(&[&cfg.name])
                                .inc_by(document.row_errors.len() as f64);
                        }

                        health.polls_total.with_label_values(&[&cfg.name, "success"]).inc();
                        health.collector_up.with_label_values(&[&cfg.name]).set(1.0);
                        health
                            .samples_ingested
                            .with_label_values(&[&cfg.name])
                            .inc_by(document.rows.len() as f64);

                        let samples = document
                            .rows
                            .into_iter()
                            .map(|row| Sample {
                                key: InterfaceKey::new(row.exporter.as_str(), row.ifindex),
                                collector: Arc::clone(&collector),
                                bps: row.bps,
                                observed_at: retrieved_at,
                            })
                            .collect();

                        let batch = CycleBatch {
                            collector: Arc::clone(&collector),
                            retrieved_at,
                            samples,
                        };

                        if batch_tx.send(batch).await.is_err() {
                            debug!(collector = %cfg.name, "pipeline closed, stopping poller");
                            return;
                        }
                    }
                }
            }
        });
    }
}
