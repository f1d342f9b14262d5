//! Per-message classification and rewriting.
//!
//! A [`MessageProcessor`] decides, for each received message, whether it is
//! deleted without being redriven, skipped into a named bucket, or rewritten
//! and sent on to the destination. [`process_batch`] folds a processor over a
//! batch of messages, isolating failures per message.

use crate::error::{RedriveError, Result};
use crate::message::Message;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Bucket name used for skips that do not name a subcategory.
pub const ROOT_SKIP_CATEGORY: &str = "root";

/// Name the pass-through processor is registered under.
pub const DIRECT_REDRIVE: &str = "direct-redrive";

/// Outcome of the skip hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipDecision {
    Keep,
    Skip { subcategory: Option<String> },
}

impl SkipDecision {
    pub fn skip() -> Self {
        Self::Skip { subcategory: None }
    }

    pub fn skip_into(subcategory: impl Into<String>) -> Self {
        Self::Skip {
            subcategory: Some(subcategory.into()),
        }
    }
}

/// Decides what happens to each message of a queue.
///
/// Hooks are consulted in order: [`should_delete`](Self::should_delete),
/// then [`skip`](Self::skip), then [`transform`](Self::transform). The first
/// hook that claims the message wins.
pub trait MessageProcessor: Send + Sync {
    /// Whether the message is removed from the source without being redriven.
    fn should_delete(&self, _message: &Message) -> anyhow::Result<bool> {
        Ok(false)
    }

    /// Whether the message is set aside, and into which subcategory.
    fn skip(&self, _message: &Message) -> anyhow::Result<SkipDecision> {
        Ok(SkipDecision::Keep)
    }

    /// Rewrites a message that will be sent to the destination.
    fn transform(&self, message: Message) -> anyhow::Result<Message> {
        Ok(message)
    }
}

/// Redrives every message unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectRedrive;

impl MessageProcessor for DirectRedrive {}

type Predicate = Box<dyn Fn(&Message) -> anyhow::Result<bool> + Send + Sync>;
type Mapper = Box<dyn Fn(Message) -> anyhow::Result<Message> + Send + Sync>;

/// A processor assembled from closures.
///
/// ```
/// use redrive::{FnProcessor, Message, SkipDecision};
///
/// let processor = FnProcessor::new(
///     |_| Ok(SkipDecision::Keep),
///     |m: &Message| Ok(m.attributes.contains_key("Obsolete")),
///     Ok,
/// );
/// # let _ = processor;
/// ```
pub struct FnProcessor {
    skip: Box<dyn Fn(&Message) -> anyhow::Result<SkipDecision> + Send + Sync>,
    should_delete: Predicate,
    transform: Mapper,
}

impl FnProcessor {
    pub fn new<S, D, T>(skip: S, should_delete: D, transform: T) -> Self
    where
        S: Fn(&Message) -> anyhow::Result<SkipDecision> + Send + Sync + 'static,
        D: Fn(&Message) -> anyhow::Result<bool> + Send + Sync + 'static,
        T: Fn(Message) -> anyhow::Result<Message> + Send + Sync + 'static,
    {
        Self {
            skip: Box::new(skip),
            should_delete: Box::new(should_delete),
            transform: Box::new(transform),
        }
    }
}

impl MessageProcessor for FnProcessor {
    fn should_delete(&self, message: &Message) -> anyhow::Result<bool> {
        (self.should_delete)(message)
    }

    fn skip(&self, message: &Message) -> anyhow::Result<SkipDecision> {
        (self.skip)(message)
    }

    fn transform(&self, message: Message) -> anyhow::Result<Message> {
        (self.transform)(message)
    }
}

/// A message the processor failed on, kept unmodified with the cause.
#[derive(Clone, Debug)]
pub struct ProcessingFailure {
    pub message: Message,
    pub cause: String,
}

/// Outcome buckets of reducing a batch of messages.
#[derive(Clone, Debug, Default)]
pub struct ProcessedMessageBatch {
    pub deletes: Vec<Message>,
    pub errors: Vec<ProcessingFailure>,
    pub updates: Vec<Message>,
    /// Skipped messages keyed by subcategory.
    pub skips: BTreeMap<String, Vec<Message>>,
}

impl ProcessedMessageBatch {
    /// Concatenates `other` onto `self`, bucket by bucket.
    pub fn combine(mut self, other: ProcessedMessageBatch) -> Self {
        self.deletes.extend(other.deletes);
        self.errors.extend(other.errors);
        self.updates.extend(other.updates);
        for (subcategory, messages) in other.skips {
            self.skips.entry(subcategory).or_default().extend(messages);
        }
        self
    }

    pub fn skip_count(&self) -> usize {
        self.skips.values().map(Vec::len).sum()
    }

    /// Total number of messages across all buckets.
    pub fn len(&self) -> usize {
        self.deletes.len() + self.errors.len() + self.updates.len() + self.skip_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Decision {
    Delete,
    Skip(String),
    Update(Message),
}

/// Classifies one message and returns the accumulator with it appended.
pub fn reduce(
    processor: &dyn MessageProcessor,
    mut acc: ProcessedMessageBatch,
    message: Message,
) -> ProcessedMessageBatch {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| decide(processor, &message)))
        .unwrap_or_else(|payload| {
            Err(anyhow::anyhow!(
                "processor panicked: {}",
                panic_text(payload.as_ref())
            ))
        });

    match outcome {
        Ok(Decision::Delete) => acc.deletes.push(message),
        Ok(Decision::Skip(subcategory)) => {
            acc.skips.entry(subcategory).or_default().push(message)
        }
        Ok(Decision::Update(updated)) => acc.updates.push(updated),
        Err(e) => {
            log::warn!("processing failed for message {}: {e:#}", message.message_id);
            acc.errors.push(ProcessingFailure {
                message,
                cause: format!("{e:#}"),
            });
        }
    }

    acc
}

/// Folds `processor` over `messages`, starting from an empty batch.
pub fn process_batch(
    processor: &dyn MessageProcessor,
    messages: Vec<Message>,
) -> ProcessedMessageBatch {
    messages
        .into_iter()
        .fold(ProcessedMessageBatch::default(), |acc, message| {
            reduce(processor, acc, message)
        })
}

fn decide(processor: &dyn MessageProcessor, message: &Message) -> anyhow::Result<Decision> {
    if processor.should_delete(message)? {
        return Ok(Decision::Delete);
    }

    if let SkipDecision::Skip { subcategory } = processor.skip(message)? {
        let subcategory = subcategory.unwrap_or_else(|| ROOT_SKIP_CATEGORY.to_string());
        validate_subcategory(&subcategory)?;
        return Ok(Decision::Skip(subcategory));
    }

    // transform consumes its input; the original stays available for the errors bucket
    let updated = processor.transform(message.clone())?;
    if updated.message_id != message.message_id || updated.receipt_handle != message.receipt_handle
    {
        anyhow::bail!("transform must keep the message id and receipt handle");
    }
    Ok(Decision::Update(updated))
}

/// Checks that a skip subcategory is a relative path of plain segments.
pub fn validate_subcategory(subcategory: &str) -> anyhow::Result<()> {
    let valid = !subcategory.is_empty()
        && !subcategory.contains(['\\', '\0'])
        && subcategory
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");

    if !valid {
        anyhow::bail!("invalid skip subcategory {subcategory:?}");
    }
    Ok(())
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Name to processor lookup, built at startup.
#[derive(Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn MessageProcessor>>,
    default: Arc<dyn MessageProcessor>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProcessorRegistry {
    /// A registry holding the built-in processors.
    pub fn with_defaults() -> Self {
        let default: Arc<dyn MessageProcessor> = Arc::new(DirectRedrive);
        let mut processors = HashMap::new();
        processors.insert(DIRECT_REDRIVE.to_string(), Arc::clone(&default));
        Self {
            processors,
            default,
        }
    }

    /// Registers `processor` under `name`, replacing any previous entry.
    pub fn register(
        mut self,
        name: impl Into<String>,
        processor: impl MessageProcessor + 'static,
    ) -> Self {
        self.processors.insert(name.into(), Arc::new(processor));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.processors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Looks up the processor for a queue.
    ///
    /// No name selects the pass-through processor. An unregistered name is
    /// an error when `strict`, otherwise it falls back to the pass-through
    /// processor with a warning.
    pub fn resolve(&self, name: Option<&str>, strict: bool) -> Result<Arc<dyn MessageProcessor>> {
        let Some(name) = name else {
            return Ok(Arc::clone(&self.default));
        };

        match self.processors.get(name) {
            Some(processor) => Ok(Arc::clone(processor)),
            None if strict => Err(RedriveError::UnknownProcessor {
                name: name.to_string(),
            }),
            None => {
                log::warn!("unknown message processor {name:?}, falling back to {DIRECT_REDRIVE}");
                Ok(Arc::clone(&self.default))
            }
        }
    }
}
