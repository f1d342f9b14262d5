//! # sqs-redrive-core
//!
//! Core library for redriving messages out of AWS SQS dead letter queues.
//!
//! Messages are not moved straight from one queue to another. Each phase
//! persists its result as one JSON file per message under
//! `<data directory>/<source queue>/`, so a redrive can be inspected, resumed
//! and audited:
//!
//! - **receive**: pull messages from the source into `received`
//! - **process**: classify each message with a [`MessageProcessor`] into
//!   deletes, skips, errors or updates
//! - **send**: forward updates to the destination queue
//! - **delete**: remove handled messages from the source queue
//! - **clean**: discard staged files
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use redrive::{FnProcessor, ProcessorRegistry, RedriveClient, RedriveConfig, SkipDecision, SqsGateway};
//!
//! # async fn example() -> Result<(), redrive::RedriveError> {
//! let registry = ProcessorRegistry::with_defaults().register(
//!     "drop-test-orders",
//!     FnProcessor::new(
//!         |_| Ok(SkipDecision::Keep),
//!         |message| Ok(message.attributes.contains_key("TestOrder")),
//!         Ok,
//!     ),
//! );
//!
//! let config = RedriveConfig::from_path("redrive.yaml")?;
//! let gateway = Arc::new(SqsGateway::from_config(aws_config::from_env().load().await));
//!
//! let mut client = RedriveClient::new(config, gateway, &registry)?;
//! client.initialize().await?;
//! for outcome in client.receive_messages().await {
//!     println!("{}: {:?}", outcome.source, outcome.result);
//! }
//! # Ok(())
//! # }
//! ```

mod batch;
mod client;
mod config;
mod error;
mod gateway;
mod message;
mod processor;
mod redrive_queue;
mod sqs;
mod stage;

#[cfg(test)]
mod test_utils;

pub use batch::*;
pub use client::*;
pub use config::*;
pub use error::*;
pub use gateway::*;
pub use message::*;
pub use processor::*;
pub use redrive_queue::*;
pub use sqs::*;
pub use stage::*;
