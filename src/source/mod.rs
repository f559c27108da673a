pub mod parse;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::config::CollectorConfig;

/// Retrieves the raw stats document from a collector.
///
/// Enum dispatch over the supported transports; heavier transports
/// (SSH/SCP pipelines) integrate by dropping the document where a
/// `File` source can read it, or by serving it over HTTP.
pub enum Source {
    Http(HttpSource),
    File(FileSource),
}

impl Source {
    /// Builds the source described by a collector's configuration.
    pub fn from_config(cfg: &CollectorConfig) -> Result<Self> {
        match (&cfg.endpoint, &cfg.path) {
            (Some(endpoint), None) => Ok(Self::Http(HttpSource::new(
                &cfg.name,
                endpoint,
                cfg.timeout,
            )?)),
            (None, Some(path)) => Ok(Self::File(FileSource::new(&cfg.name, path.clone()))),
            _ => bail!(
                "collector {:?} must configure exactly one of endpoint/path",
                cfg.name
            ),
        }
    }

    /// Returns the collector name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Http(s) => s.name(),
            Self::File(s) => s.name(),
        }
    }

    /// Fetches the raw stats document.
    pub async fn fetch(&self) -> Result<String> {
        match self {
            Self::Http(s) => s.fetch().await,
            Self::File(s) => s.fetch().await,
        }
    }
}

/// Fetches the stats document from an HTTP(S) endpoint.
pub struct HttpSource {
    name: String,
    http: reqwest::Client,
    endpoint: String,
}

impl HttpSource {
    pub fn new(name: &str, endpoint: &str, timeout: Duration) -> Result<Self> {
        let timeout = if timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            name: name.to_string(),
            http,
            endpoint: endpoint.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn fetch(&self) -> Result<String> {
        let response = self
            .http
            .get(&self.endpoint)
            .send()
            .await
            .with_context(|| format!("requesting {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            bail!("unexpected status {} from {}", status, self.endpoint);
        }

        response
            .text()
            .await
            .with_context(|| format!("reading response body from {}", self.endpoint))
    }
}

/// Reads the stats document from a local path (e.g. a file dropped by
/// an external retrieval job).
pub struct FileSource {
    name: String,
    path: PathBuf,
}

impl FileSource {
    pub fn new(name: &str, path: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            path,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn fetch(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading stats file {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector(name: &str) -> CollectorConfig {
        CollectorConfig {
            name: name.to_string(),
            endpoint: None,
            path: None,
            poll_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_from_config_http() {
        let mut cfg = collector("fc-a");
        cfg.endpoint = Some("http://fc-a:8080/device_stats".to_string());

        let source = Source::from_config(&cfg).expect("builds");
        assert!(matches!(source, Source::Http(_)));
        assert_eq!(source.name(), "fc-a");
    }

    #[test]
    fn test_from_config_file() {
        let mut cfg = collector("fc-b");
        cfg.path = Some(PathBuf::from("/tmp/device_stats.txt"));

        let source = Source::from_config(&cfg).expect("builds");
        assert!(matches!(source, Source::File(_)));
        assert_eq!(source.name(), "fc-b");
    }

    #[test]
    fn test_from_config_rejects_neither() {
        let cfg = collector("fc-c");
        assert!(Source::from_config(&cfg).is_err());
    }

    #[test]
    fn test_from_config_rejects_both() {
        let mut cfg = collector("fc-d");
        cfg.endpoint = Some("http://fc-d:8080/device_stats".to_string());
        cfg.path = Some(PathBuf::from("/tmp/device_stats.txt"));
        assert!(Source::from_config(&cfg).is_err());
    }

    #[tokio::test]
    async fn test_file_source_missing_file_errors() {
        let source = FileSource::new("fc-e", PathBuf::from("/nonexistent/device_stats.txt"));
        let err = source.fetch().await.expect_err("missing file");
        assert!(err.to_string().contains("/nonexistent/device_stats.txt"));
    }
}
