pub mod csv;
pub mod log;
pub mod webhook;

use anyhow::Result;

use crate::engine::status::Transition;

use self::csv::CsvJournal;
use self::log::LogSink;
use self::webhook::WebhookSink;

/// Alert sink dispatching transition events to a backend.
///
/// Uses enum dispatch rather than trait objects for zero-cost async
/// dispatch on the notification path.
pub enum AlertSink {
    Log(LogSink),
    Csv(CsvJournal),
    Webhook(WebhookSink),
}

impl AlertSink {
    /// Returns the sink name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Log(s) => s.name(),
            Self::Csv(s) => s.name(),
            Self::Webhook(s) => s.name(),
        }
    }

    /// Initialize the sink.
    pub async fn start(&mut self) -> Result<()> {
        match self {
            Self::Log(_) => Ok(()),
            Self::Csv(s) => s.start().await,
            Self::Webhook(s) => s.start(),
        }
    }

    /// Deliver one transition event.
    pub async fn notify(&mut self, transition: &Transition) -> Result<()> {
        match self {
            Self::Log(s) => {
                s.notify(transition);
                Ok(())
            }
            Self::Csv(s) => s.notify(transition).await,
            Self::Webhook(s) => s.notify(transition).await,
        }
    }

    /// Shut down the sink.
    pub async fn stop(&mut self) -> Result<()> {
        match self {
            Self::Log(_) => Ok(()),
            Self::Csv(s) => s.stop().await,
            Self::Webhook(_) => Ok(()),
        }
    }
}
