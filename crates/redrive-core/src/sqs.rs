//! [`QueueGateway`] backed by the AWS SQS API.

use crate::error::GatewayError;
use crate::gateway::{BatchOutcome, DeleteEntry, QueueGateway, SendEntry};
use crate::message::{Message, MessageAttribute};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_sqs as sqs;
use serde_json::Value;
use sqs::error::DisplayErrorContext;
use sqs::primitives::Blob;
use sqs::types::{
    DeleteMessageBatchRequestEntry, MessageAttributeValue, MessageSystemAttributeName,
    QueueAttributeName, SendMessageBatchRequestEntry,
};
use std::collections::{BTreeMap, HashMap};

/// Seconds a received message stays invisible to other consumers.
pub const DEFAULT_VISIBILITY_TIMEOUT: i32 = 20;

/// Client for the SQS operations used by a redrive.
///
/// # Example
///
/// ```no_run
/// use redrive::{QueueGateway, SqsGateway};
///
/// # async fn example() -> Result<(), redrive::GatewayError> {
/// let config = aws_config::from_env().load().await;
/// let gateway = SqsGateway::from_config(config);
///
/// for url in gateway.list_queues().await? {
///     println!("Queue: {}", url);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SqsGateway {
    /// The AWS SDK configuration used for SQS operations
    pub config: SdkConfig,
    /// The SQS client instance
    pub client: sqs::Client,
    visibility_timeout: i32,
}

impl SqsGateway {
    /// Creates a gateway from a pre-built AWS SDK config.
    ///
    /// The caller decides on credentials and endpoint, e.g. static test
    /// credentials and a LocalStack endpoint for local runs.
    pub fn from_config(config: SdkConfig) -> Self {
        let client = sqs::Client::new(&config);
        Self {
            config,
            client,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    pub fn with_visibility_timeout(mut self, seconds: i32) -> Self {
        self.visibility_timeout = seconds;
        self
    }
}

fn sdk_error<E: std::error::Error>(e: E) -> GatewayError {
    GatewayError::Sdk(DisplayErrorContext(e).to_string())
}

#[async_trait]
impl QueueGateway for SqsGateway {
    async fn resolve_queue_url(&self, name: &str) -> Result<String, GatewayError> {
        let not_found = || GatewayError::NotFound {
            what: format!("queue {name}"),
        };

        let output = match self.client.get_queue_url().queue_name(name).send().await {
            Ok(output) => output,
            Err(e) => {
                let missing = e
                    .as_service_error()
                    .is_some_and(|se| se.is_queue_does_not_exist());
                return Err(if missing { not_found() } else { sdk_error(e) });
            }
        };

        output.queue_url().map(str::to_string).ok_or_else(not_found)
    }

    async fn get_attributes(
        &self,
        queue_url: &str,
        names: &[&str],
    ) -> Result<BTreeMap<String, String>, GatewayError> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(queue_url)
            .set_attribute_names(Some(
                names.iter().map(|n| QueueAttributeName::from(*n)).collect(),
            ))
            .send()
            .await
            .map_err(sdk_error)?;

        let attributes: BTreeMap<String, String> = output
            .attributes()
            .map(|attributes| {
                attributes
                    .iter()
                    .map(|(name, value)| (name.as_str().to_string(), value.clone()))
                    .collect()
            })
            .unwrap_or_default();

        if attributes.is_empty() {
            return Err(GatewayError::NotFound {
                what: format!("attributes of {queue_url}"),
            });
        }
        Ok(attributes)
    }

    async fn receive(
        &self,
        queue_url: &str,
        max_messages: usize,
    ) -> Result<Vec<Message>, GatewayError> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(i32::try_from(max_messages).unwrap_or(i32::MAX))
            .visibility_timeout(self.visibility_timeout)
            .message_system_attribute_names(MessageSystemAttributeName::SentTimestamp)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(sdk_error)?;

        // none suggests the whole queue has been received recently
        output
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(from_aws_message)
            .collect()
    }

    async fn send_batch(
        &self,
        queue_url: &str,
        entries: Vec<SendEntry>,
    ) -> Result<BatchOutcome, GatewayError> {
        // SQS rejects empty batch requests
        if entries.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let entries = entries
            .into_iter()
            .map(to_send_entry)
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .send_message_batch()
            .queue_url(queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(BatchOutcome {
            failed_ids: output.failed().iter().map(|f| f.id().to_string()).collect(),
        })
    }

    async fn delete_batch(
        &self,
        queue_url: &str,
        entries: Vec<DeleteEntry>,
    ) -> Result<BatchOutcome, GatewayError> {
        if entries.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let entries = entries
            .into_iter()
            .map(|entry| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(entry.id)
                    .receipt_handle(entry.receipt_handle)
                    .build()
                    .map_err(|e| GatewayError::InvalidEntry(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .delete_message_batch()
            .queue_url(queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(BatchOutcome {
            failed_ids: output.failed().iter().map(|f| f.id().to_string()).collect(),
        })
    }

    /// Handles pagination, returning all queues regardless of count.
    async fn list_queues(&self) -> Result<Vec<String>, GatewayError> {
        let mut queues = Vec::new();

        let mut output = self.client.list_queues().send().await.map_err(sdk_error)?;
        loop {
            if let Some(mut list) = output.queue_urls {
                queues.append(&mut list);
            }

            let Some(token) = output.next_token else {
                break;
            };

            output = self
                .client
                .list_queues()
                .set_next_token(Some(token))
                .send()
                .await
                .map_err(sdk_error)?;
        }

        Ok(queues)
    }
}

/// Converts an AWS SDK message into the stage envelope.
///
/// The body is kept as raw text; messages without an id or receipt handle
/// cannot be tracked or deleted and are rejected.
pub fn from_aws_message(message: sqs::types::Message) -> Result<Message, GatewayError> {
    let message_id = message
        .message_id
        .ok_or_else(|| GatewayError::Sdk("received message without MessageId".to_string()))?;
    let receipt_handle = message.receipt_handle.ok_or_else(|| {
        GatewayError::Sdk(format!("message {message_id} has no ReceiptHandle"))
    })?;

    let attributes = message
        .attributes
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| (name.as_str().to_string(), value))
        .collect();

    let message_attributes = message
        .message_attributes
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| {
            let attribute = MessageAttribute {
                data_type: value.data_type().to_string(),
                string_value: value.string_value().map(str::to_string),
                binary_value: value.binary_value().map(|b| b.as_ref().to_vec()),
            };
            (name, attribute)
        })
        .collect();

    Ok(Message {
        message_id,
        receipt_handle,
        md5_of_body: message.md5_of_body,
        body: message.body.map(Value::String),
        attributes,
        message_attributes,
    })
}

fn to_send_entry(entry: SendEntry) -> Result<SendMessageBatchRequestEntry, GatewayError> {
    let attributes = entry
        .message_attributes
        .into_iter()
        .map(|(name, attribute)| {
            MessageAttributeValue::builder()
                .data_type(attribute.data_type)
                .set_string_value(attribute.string_value)
                .set_binary_value(attribute.binary_value.map(Blob::new))
                .build()
                .map(|value| (name, value))
                .map_err(|e| GatewayError::InvalidEntry(e.to_string()))
        })
        .collect::<Result<HashMap<_, _>, _>>()?;

    SendMessageBatchRequestEntry::builder()
        .id(entry.id)
        .set_message_body(entry.body)
        .set_message_attributes((!attributes.is_empty()).then_some(attributes))
        .build()
        .map_err(|e| GatewayError::InvalidEntry(e.to_string()))
}
