//! The queue service as seen by the redrive pipeline.

use crate::error::GatewayError;
use crate::message::{Message, MessageAttribute};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Queue attributes fetched for every source queue.
pub const QUEUE_ATTRIBUTES: [&str; 3] = [
    "ApproximateNumberOfMessages",
    "CreatedTimestamp",
    "QueueArn",
];

/// One message of a send batch.
#[derive(Clone, Debug, PartialEq)]
pub struct SendEntry {
    /// Batch-local id, unique within the call
    pub id: String,
    pub body: Option<String>,
    pub message_attributes: BTreeMap<String, MessageAttribute>,
}

/// One message of a delete batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteEntry {
    /// Batch-local id, unique within the call
    pub id: String,
    pub receipt_handle: String,
}

/// Per-entry result of a batch call that reached the queue service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Ids of entries the service rejected
    pub failed_ids: Vec<String>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.failed_ids.is_empty()
    }
}

/// Remote operations the pipeline needs from the queue service.
///
/// Batch calls accept at most [`SQS_BATCH_LIMIT`](crate::SQS_BATCH_LIMIT)
/// entries.
#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// Resolves a queue name to its URL.
    async fn resolve_queue_url(&self, name: &str) -> Result<String, GatewayError>;

    /// Fetches the named attributes of a queue.
    async fn get_attributes(
        &self,
        queue_url: &str,
        names: &[&str],
    ) -> Result<BTreeMap<String, String>, GatewayError>;

    /// Receives up to `max_messages` messages with their bodies as raw text.
    ///
    /// An empty result means no messages are currently available.
    async fn receive(
        &self,
        queue_url: &str,
        max_messages: usize,
    ) -> Result<Vec<Message>, GatewayError>;

    async fn send_batch(
        &self,
        queue_url: &str,
        entries: Vec<SendEntry>,
    ) -> Result<BatchOutcome, GatewayError>;

    async fn delete_batch(
        &self,
        queue_url: &str,
        entries: Vec<DeleteEntry>,
    ) -> Result<BatchOutcome, GatewayError>;

    /// URLs of every queue visible to the caller.
    async fn list_queues(&self) -> Result<Vec<String>, GatewayError>;
}
