//! Redrive configuration document.
//!
//! ```yaml
//! dataDirectory: messages
//! receiveCount: 100
//! parseBody: true
//! queueConfigs:
//!   - source: orders-dlq
//!     destination: orders
//!     processor: direct-redrive
//! ```

use crate::error::{RedriveError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// One source → destination pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Name of the queue messages are received from, usually a DLQ
    pub source: String,
    /// Name of the queue messages are redriven to
    pub destination: String,
    /// Registered processor name; none redrives messages unchanged
    #[serde(default)]
    pub processor: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedriveConfig {
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
    /// Messages requested from each source queue per receive
    #[serde(default = "default_receive_count")]
    pub receive_count: usize,
    /// Whether bodies are parsed as JSON on receive and serialized on send
    #[serde(default = "default_parse_body")]
    pub parse_body: bool,
    /// Messages reduced together during `process`
    #[serde(default = "default_processing_batch_size")]
    pub processing_batch_size: NonZeroUsize,
    /// Whether an unregistered processor name fails initialization
    #[serde(default)]
    pub strict_processors: bool,
    pub queue_configs: Vec<QueueConfig>,
}

fn default_data_directory() -> PathBuf {
    PathBuf::from("messages")
}

fn default_receive_count() -> usize {
    10
}

fn default_parse_body() -> bool {
    true
}

fn default_processing_batch_size() -> NonZeroUsize {
    NonZeroUsize::new(100).unwrap_or(NonZeroUsize::MIN)
}

impl RedriveConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| RedriveError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| RedriveError::io(path, e))?;
        Self::from_yaml_str(&yaml)
    }

    /// Rejects configurations whose queues would share a stage directory.
    pub fn validate(&self) -> Result<()> {
        if self.queue_configs.is_empty() {
            return Err(RedriveError::Config("no queueConfigs defined".to_string()));
        }

        let mut sources = HashSet::new();
        for queue in &self.queue_configs {
            if queue.source.is_empty() || queue.destination.is_empty() {
                return Err(RedriveError::Config(
                    "source and destination must not be empty".to_string(),
                ));
            }
            if queue.source.contains(['/', '\\']) || queue.source == "." || queue.source == ".." {
                return Err(RedriveError::Config(format!(
                    "source {:?} is not a valid directory name",
                    queue.source
                )));
            }
            if !sources.insert(queue.source.as_str()) {
                return Err(RedriveError::Config(format!(
                    "source {} is configured more than once",
                    queue.source
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_defaults() {
        let config = RedriveConfig::from_yaml_str(
            r#"
queueConfigs:
  - source: orders-dlq
    destination: orders
"#,
        )
        .unwrap();

        assert_eq!(config.data_directory, PathBuf::from("messages"));
        assert_eq!(config.receive_count, 10);
        assert!(config.parse_body);
        assert_eq!(config.processing_batch_size.get(), 100);
        assert!(!config.strict_processors);
        assert_eq!(config.queue_configs[0].processor, None);
    }

    #[test]
    fn reads_every_field() {
        let config = RedriveConfig::from_yaml_str(
            r#"
dataDirectory: /tmp/redrive
receiveCount: 250
parseBody: false
processingBatchSize: 25
strictProcessors: true
queueConfigs:
  - source: a-dlq
    destination: a
    processor: direct-redrive
  - source: b-dlq
    destination: b
"#,
        )
        .unwrap();

        assert_eq!(config.data_directory, PathBuf::from("/tmp/redrive"));
        assert_eq!(config.receive_count, 250);
        assert!(!config.parse_body);
        assert_eq!(config.processing_batch_size.get(), 25);
        assert!(config.strict_processors);
        assert_eq!(config.queue_configs.len(), 2);
        assert_eq!(
            config.queue_configs[0].processor.as_deref(),
            Some("direct-redrive")
        );
    }

    #[test]
    fn rejects_duplicate_sources() {
        let err = RedriveConfig::from_yaml_str(
            r#"
queueConfigs:
  - source: a-dlq
    destination: a
  - source: a-dlq
    destination: b
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn rejects_empty_and_malformed_documents() {
        assert!(RedriveConfig::from_yaml_str("queueConfigs: []").is_err());
        assert!(RedriveConfig::from_yaml_str("receiveCount: 5").is_err());
        assert!(RedriveConfig::from_yaml_str(
            "processingBatchSize: 0\nqueueConfigs:\n  - source: a\n    destination: b\n"
        )
        .is_err());
        assert!(RedriveConfig::from_yaml_str(
            "queueConfigs:\n  - source: ../a\n    destination: b\n"
        )
        .is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = RedriveConfig::from_path("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, RedriveError::Io { .. }));
    }
}
