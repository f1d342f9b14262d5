//! The message envelope persisted in every stage directory.

use crate::error::{RedriveError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Serializable representation of an SQS message.
///
/// Field names follow the SQS API so that a stage file reads the same as the
/// message returned by `ReceiveMessage`.
///
/// The body holds the raw text as a JSON string until it is parsed; after
/// parsing it holds the structured document.
///
/// # See Also
///
/// - [AWS SQS Message API Reference](https://docs.aws.amazon.com/AWSSimpleQueueService/latest/APIReference/API_Message.html)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    /// Unique identifier for the message assigned by SQS
    pub message_id: String,
    /// Handle used to delete the message, valid for one receive only
    pub receipt_handle: String,
    /// MD5 digest of the message body as received
    #[serde(rename = "MD5OfBody", default, skip_serializing_if = "Option::is_none")]
    pub md5_of_body: Option<String>,
    /// Absent when the message had no body; a JSON `null` body is `Some(Value::Null)`
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present_body"
    )]
    pub body: Option<Value>,
    /// System attributes such as `SentTimestamp`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Custom message attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub message_attributes: BTreeMap<String, MessageAttribute>,
}

/// A `Body` key that is present always yields `Some`, even for `null`.
fn present_body<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// A custom message attribute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageAttribute {
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_value: Option<Vec<u8>>,
}

impl Message {
    /// Creates a message with a raw text body and no attributes.
    pub fn new(
        message_id: impl Into<String>,
        receipt_handle: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            receipt_handle: receipt_handle.into(),
            md5_of_body: None,
            body: Some(Value::String(body.into())),
            attributes: BTreeMap::new(),
            message_attributes: BTreeMap::new(),
        }
    }

    /// Name of the stage file holding this message.
    pub fn file_name(&self) -> Result<String> {
        file_name_for(&self.message_id)
    }

    /// Replaces a raw text body with the JSON document it contains.
    ///
    /// Bodies that are absent or already structured are left untouched.
    pub fn parse_body(mut self) -> Result<Self> {
        if let Some(Value::String(raw)) = &self.body {
            let parsed =
                serde_json::from_str(raw).map_err(|source| RedriveError::BodyParse {
                    message_id: self.message_id.clone(),
                    source,
                })?;
            self.body = Some(parsed);
        }
        Ok(self)
    }

    /// The body as it should be sent over the wire.
    ///
    /// With `parse_body` the body is serialized back to JSON text. Without it
    /// a string body is sent verbatim; a body a processor turned into a
    /// structured value is still serialized.
    pub fn wire_body(&self, parse_body: bool) -> Option<String> {
        match &self.body {
            None => None,
            Some(Value::String(raw)) if !parse_body => Some(raw.clone()),
            Some(value) => Some(value.to_string()),
        }
    }
}

/// Maps a message id to its stage file name, `<id>.json`.
///
/// Ids that would escape the stage directory are rejected.
pub fn file_name_for(message_id: &str) -> Result<String> {
    let invalid = message_id.is_empty()
        || message_id == "."
        || message_id == ".."
        || message_id.contains(['/', '\\', '\0']);

    if invalid {
        return Err(RedriveError::InvalidMessageId {
            message_id: message_id.to_string(),
        });
    }

    Ok(format!("{message_id}.json"))
}
