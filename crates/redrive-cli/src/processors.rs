//! Processors available to `processor:` in the redrive configuration.
//!
//! Register additional processors in [`registry`] and reference them by name
//! from a queue pair.

use redrive::{FnProcessor, Message, ProcessorRegistry, SkipDecision};

/// Example processor; edit it or register new ones next to it.
pub const CUSTOM_PROCESSOR: &str = "custom-processor";

/// Message attribute that keeps a message out of a redrive.
const HOLD_ATTRIBUTE: &str = "RedriveHold";

pub fn registry() -> ProcessorRegistry {
    ProcessorRegistry::with_defaults().register(
        CUSTOM_PROCESSOR,
        FnProcessor::new(skip_held, has_no_body, Ok),
    )
}

/// Held messages are set aside under `skips/held`.
fn skip_held(message: &Message) -> anyhow::Result<SkipDecision> {
    Ok(if message.message_attributes.contains_key(HOLD_ATTRIBUTE) {
        SkipDecision::skip_into("held")
    } else {
        SkipDecision::Keep
    })
}

/// Bodiless messages carry nothing worth redriving.
fn has_no_body(message: &Message) -> anyhow::Result<bool> {
    Ok(message.body.is_none())
}
