use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::status::Transition;

/// JSON body posted for each transition.
#[derive(Debug, Serialize)]
struct TransitionPayload<'a> {
    exporter: &'a str,
    ifindex: u32,
    direction: &'static str,
    from: &'static str,
    to: &'static str,
    occurred_at: DateTime<Utc>,
    bps: f64,
}

/// Posts transition events as JSON to an HTTP endpoint.
///
/// External consumers (syslog relays, mail gateways, dashboards) hang
/// off this endpoint rather than being driven directly.
pub struct WebhookSink {
    url: String,
    timeout: Duration,
    http: Option<reqwest::Client>,
}

impl WebhookSink {
    pub fn new(url: String, timeout: Duration) -> Self {
        Self {
            url,
            timeout,
            http: None,
        }
    }

    pub fn name(&self) -> &str {
        "webhook"
    }

    pub fn start(&mut self) -> Result<()> {
        let timeout = if self.timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            self.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building webhook HTTP client")?;

        self.http = Some(http);
        Ok(())
    }

    pub async fn notify(&self, transition: &Transition) -> Result<()> {
        let http = self
            .http
            .as_ref()
            .context("webhook sink used before start")?;

        let payload = TransitionPayload {
            exporter: &transition.key.exporter,
            ifindex: transition.key.ifindex,
            direction: transition.kind.as_str(),
            from: transition.from.as_str(),
            to: transition.to.as_str(),
            occurred_at: transition.occurred_at.into(),
            bps: transition.bps,
        };

        let response = http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("posting transition to {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("webhook {} returned status {}", self.url, status);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::engine::key::InterfaceKey;
    use crate::engine::status::{LinkStatus, TransitionKind};

    #[test]
    fn test_payload_serialization() {
        let at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let transition = Transition {
            key: InterfaceKey::new("10.0.0.1", 3),
            kind: TransitionKind::CameUp,
            from: LinkStatus::Down,
            to: LinkStatus::Up,
            occurred_at: at,
            bps: 500.0,
        };

        let payload = TransitionPayload {
            exporter: &transition.key.exporter,
            ifindex: transition.key.ifindex,
            direction: transition.kind.as_str(),
            from: transition.from.as_str(),
            to: transition.to.as_str(),
            occurred_at: transition.occurred_at.into(),
            bps: transition.bps,
        };

        let json = serde_json::to_value(&payload).expect("serializes");
        assert_eq!(json["exporter"], "10.0.0.1");
        assert_eq!(json["ifindex"], 3);
        assert_eq!(json["direction"], "came_up");
        assert_eq!(json["from"], "down");
        assert_eq!(json["to"], "up");
        assert_eq!(json["bps"], 500.0);
        assert_eq!(json["occurred_at"], "2023-11-14T22:13:20Z");
    }

    #[tokio::test]
    async fn test_notify_before_start_errors() {
        let sink = WebhookSink::new("http://localhost:9/hook".to_string(), Duration::ZERO);
        let transition = Transition {
            key: InterfaceKey::new("10.0.0.1", 3),
            kind: TransitionKind::WentDown,
            from: LinkStatus::Up,
            to: LinkStatus::Down,
            occurred_at: SystemTime::now(),
            bps: 0.0,
        };

        let err = sink.notify(&transition).await.expect_err("not started");
        assert!(err.to_string().contains("before start"));
    }
}
