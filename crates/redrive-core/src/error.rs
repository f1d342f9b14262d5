//! Error types for gateway calls and redrive phases.

use std::path::PathBuf;
use thiserror::Error;

/// Failure reported by a [`QueueGateway`](crate::QueueGateway) call.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("invalid batch entry: {0}")]
    InvalidEntry(String),

    #[error("SQS request failed: {0}")]
    Sdk(String),
}

/// Failure of a redrive phase or of initialization.
#[derive(Debug, Error)]
pub enum RedriveError {
    #[error("queue url for {queue} could not be resolved")]
    QueueNotFound {
        queue: String,
        #[source]
        source: GatewayError,
    },

    #[error("no attributes available for queue {queue}")]
    AttributesUnavailable {
        queue: String,
        #[source]
        source: GatewayError,
    },

    #[error("unknown message processor: {name}")]
    UnknownProcessor { name: String },

    #[error("queue {queue} has not been initialized")]
    NotInitialized { queue: String },

    #[error("message id {message_id:?} cannot be used as a file name")]
    InvalidMessageId { message_id: String },

    #[error("failed to parse body of message {message_id} as JSON")]
    BodyParse {
        message_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid message file {}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl RedriveError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = RedriveError> = std::result::Result<T, E>;
