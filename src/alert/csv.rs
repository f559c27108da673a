use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::engine::status::Transition;

const CSV_HEADER: &str = "exporter,ifindex,direction,occurred_at,bps\n";

/// Appends transition events to a persistent CSV journal.
///
/// The header row is written only when the file is created empty, so
/// the journal survives restarts as one continuous record.
pub struct CsvJournal {
    path: PathBuf,
    file: Option<File>,
}

impl CsvJournal {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    pub fn name(&self) -> &str {
        "csv"
    }

    pub async fn start(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening CSV journal {}", self.path.display()))?;

        let len = file
            .metadata()
            .await
            .with_context(|| format!("reading CSV journal metadata {}", self.path.display()))?
            .len();

        let mut file = file;
        if len == 0 {
            file.write_all(CSV_HEADER.as_bytes())
                .await
                .context("writing CSV journal header")?;
        }

        self.file = Some(file);
        Ok(())
    }

    pub async fn notify(&mut self, transition: &Transition) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .context("CSV journal used before start")?;

        let occurred_at: DateTime<Utc> = transition.occurred_at.into();
        let line = format!(
            "{},{},{},{},{}\n",
            transition.key.exporter,
            transition.key.ifindex,
            transition.kind.as_str(),
            occurred_at.to_rfc3339(),
            transition.bps,
        );

        file.write_all(line.as_bytes())
            .await
            .context("appending to CSV journal")?;
        file.flush().await.context("flushing CSV journal")?;

        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.context("flushing CSV journal")?;
        }
        Ok(())
    }
}
