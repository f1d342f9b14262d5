//! Staged redrive of a single source → destination queue pair.
//!
//! A [`RedriveQueue`] moves messages through its [`StageDirectory`] one phase
//! at a time:
//!
//! 1. `receive` writes messages from the source into `received`
//! 2. `process` classifies them into deletes, skips, errors or updates
//! 3. `send_messages` forwards `updates/pending` to the destination
//! 4. `delete_messages` removes `deletes/pending` from the source
//!
//! Wire-batches within a phase run one after another so that the file moves
//! following a batch never race the reads of the next one.

use crate::batch::{batch, SQS_BATCH_LIMIT};
use crate::config::QueueConfig;
use crate::error::{RedriveError, Result};
use crate::gateway::{DeleteEntry, QueueGateway, SendEntry, QUEUE_ATTRIBUTES};
use crate::message::Message;
use crate::processor::{process_batch, MessageProcessor, ProcessedMessageBatch};
use crate::stage::{Stage, StageDirectory};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

/// Batch sizes used by the phases.
#[derive(Clone, Copy, Debug)]
pub struct PipelineOptions {
    /// Entries per remote call
    pub wire_batch_limit: NonZeroUsize,
    /// Messages reduced together during `process`
    pub processing_batch_size: NonZeroUsize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            wire_batch_limit: SQS_BATCH_LIMIT,
            processing_batch_size: NonZeroUsize::new(100).unwrap_or(SQS_BATCH_LIMIT),
        }
    }
}

/// Queue URLs and source attributes known after initialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedQueue {
    pub source_url: String,
    pub destination_url: String,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReceiveSummary {
    pub received: usize,
    /// Receive calls issued, including the one that found the queue empty
    pub calls: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub processed: usize,
    pub deletes: usize,
    pub updates: usize,
    pub skips: BTreeMap<String, usize>,
    pub errors: usize,
    /// Received messages ignored because a later stage already holds them
    pub already_staged: usize,
}

/// Outcome of `send_messages` or `delete_messages`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanSummary {
    pub removed: usize,
}

pub struct RedriveQueue {
    config: QueueConfig,
    gateway: Arc<dyn QueueGateway>,
    processor: Arc<dyn MessageProcessor>,
    stage: StageDirectory,
    options: PipelineOptions,
    resolved: Option<ResolvedQueue>,
}

impl RedriveQueue {
    pub fn new(
        config: QueueConfig,
        gateway: Arc<dyn QueueGateway>,
        processor: Arc<dyn MessageProcessor>,
        data_directory: impl AsRef<Path>,
        options: PipelineOptions,
    ) -> Self {
        let stage = StageDirectory::new(data_directory, &config.source);
        Self {
            config,
            gateway,
            processor,
            stage,
            options,
            resolved: None,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn source(&self) -> &str {
        &self.config.source
    }

    pub fn stage(&self) -> &StageDirectory {
        &self.stage
    }

    pub fn resolved(&self) -> Option<&ResolvedQueue> {
        self.resolved.as_ref()
    }

    fn require_resolved(&self) -> Result<&ResolvedQueue> {
        self.resolved
            .as_ref()
            .ok_or_else(|| RedriveError::NotInitialized {
                queue: self.config.source.clone(),
            })
    }

    /// Resolves both queue URLs and the source attributes.
    ///
    /// A queue that cannot be resolved is unusable, so any failure here is
    /// returned rather than skipped.
    pub async fn initialize(&mut self) -> Result<&ResolvedQueue> {
        let resolve = |name: String| {
            let gateway = Arc::clone(&self.gateway);
            async move {
                gateway
                    .resolve_queue_url(&name)
                    .await
                    .map_err(|source| RedriveError::QueueNotFound {
                        queue: name.clone(),
                        source,
                    })
            }
        };

        let (source_url, destination_url) = futures::try_join!(
            resolve(self.config.source.clone()),
            resolve(self.config.destination.clone())
        )?;

        let attributes = self
            .gateway
            .get_attributes(&source_url, &QUEUE_ATTRIBUTES)
            .await
            .map_err(|source| RedriveError::AttributesUnavailable {
                queue: self.config.source.clone(),
                source,
            })?;

        debug!(
            "Resolved {} at {} (destination {}).",
            self.config.source, source_url, destination_url
        );

        Ok(&*self.resolved.insert(ResolvedQueue {
            source_url,
            destination_url,
            attributes,
        }))
    }

    /// Receives up to `count` messages from the source into `received`.
    ///
    /// Stops early once the queue returns no messages. With `parse_body`,
    /// a body that is not valid JSON fails the call; messages from earlier
    /// wire-batches stay on disk.
    pub async fn receive(&self, count: usize, parse_body: bool) -> Result<ReceiveSummary> {
        let source_url = &self.require_resolved()?.source_url;
        self.stage.ensure_layout().await?;

        let mut summary = ReceiveSummary::default();
        for chunk in batch((0..count).collect::<Vec<usize>>(), self.options.wire_batch_limit) {
            if chunk.is_empty() {
                continue;
            }

            let messages = self.gateway.receive(source_url, chunk.len()).await?;
            summary.calls += 1;

            if messages.is_empty() {
                debug!("No more messages available in {}.", self.config.source);
                break;
            }

            let messages = if parse_body {
                messages
                    .into_iter()
                    .map(Message::parse_body)
                    .collect::<Result<Vec<_>>>()?
            } else {
                messages
            };

            for message in &messages {
                self.stage.write(&Stage::Received, message).await?;
            }

            debug!(
                "Received batch of {} messages for {}.",
                messages.len(),
                self.config.source
            );
            summary.received += messages.len();
        }

        info!(
            "Received total of {} messages for {}.",
            summary.received, self.config.source
        );
        Ok(summary)
    }

    /// Classifies every received message that is not yet staged elsewhere.
    ///
    /// `received` is left untouched; each message is copied into exactly one
    /// of `deletes/pending`, `processing-errors`, `skips/*` or
    /// `updates/pending`, the latter with a twin in `deletes/pending`.
    pub async fn process(&self) -> Result<ProcessSummary> {
        self.stage.ensure_layout().await?;

        let staged = self.stage.staged_files().await?;
        let (pending, already_staged): (Vec<String>, Vec<String>) = self
            .stage
            .list(&Stage::Received)
            .await?
            .into_iter()
            .partition(|file| !staged.contains(file));

        let mut summary = ProcessSummary {
            already_staged: already_staged.len(),
            ..ProcessSummary::default()
        };

        if pending.is_empty() {
            info!("Nothing to process for {}.", self.config.source);
            return Ok(summary);
        }

        for files in batch(pending, self.options.processing_batch_size) {
            if files.is_empty() {
                continue;
            }

            let mut messages = Vec::with_capacity(files.len());
            let mut sources = HashMap::with_capacity(files.len());
            for file in &files {
                match self.stage.read(&Stage::Received, file).await {
                    Ok(message) => {
                        sources.insert(message.message_id.clone(), file.clone());
                        messages.push(message);
                    }
                    Err(RedriveError::Json { path, source }) => {
                        warn!("Unreadable message file {}: {source}", path.display());
                        self.quarantine_unreadable(file, &source.to_string())
                            .await?;
                        summary.processed += 1;
                        summary.errors += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            let processed = process_batch(self.processor.as_ref(), messages);
            debug!(
                "Processed batch of {} messages for {}.",
                processed.len(),
                self.config.source
            );
            self.route(processed, &sources, &mut summary).await?;
        }

        info!(
            "Processed total of {} messages for {}: {} updates, {} deletes, {} skips, {} errors.",
            summary.processed,
            self.config.source,
            summary.updates,
            summary.deletes,
            summary.skips.values().sum::<usize>(),
            summary.errors
        );
        Ok(summary)
    }

    async fn route(
        &self,
        processed: ProcessedMessageBatch,
        sources: &HashMap<String, String>,
        summary: &mut ProcessSummary,
    ) -> Result<()> {
        summary.processed += processed.len();

        for message in &processed.deletes {
            self.stage.write(&Stage::DeletesPending, message).await?;
        }
        summary.deletes += processed.deletes.len();

        for failure in &processed.errors {
            self.stage
                .write(&Stage::ProcessingErrors, &failure.message)
                .await?;
            self.stage
                .write_error_cause(&failure.message.message_id, &failure.cause)
                .await?;
        }
        summary.errors += processed.errors.len();

        for (subcategory, messages) in &processed.skips {
            let stage = Stage::Skips(subcategory.clone());
            for message in messages {
                self.stage.write(&stage, message).await?;
            }
            *summary.skips.entry(subcategory.clone()).or_default() += messages.len();
        }

        for message in &processed.updates {
            self.stage.write(&Stage::UpdatesPending, message).await?;
            // the original must eventually leave the source however the update fares
            let source = match sources.get(&message.message_id) {
                Some(file) => file.clone(),
                None => message.file_name()?,
            };
            self.stage
                .copy_file(&source, &Stage::Received, &Stage::DeletesPending)
                .await?;
        }
        summary.updates += processed.updates.len();

        Ok(())
    }

    async fn quarantine_unreadable(&self, file: &str, cause: &str) -> Result<()> {
        self.stage
            .copy_file(file, &Stage::Received, &Stage::ProcessingErrors)
            .await?;
        let message_id = file.strip_suffix(".json").unwrap_or(file);
        self.stage.write_error_cause(message_id, cause).await
    }

    /// Sends `updates/pending` to the destination, one wire-batch at a time.
    ///
    /// Any failure within a wire-batch, including a single rejected entry,
    /// moves the whole batch to `updates/errors`. A successful batch is
    /// archived and queued for deletion from the source.
    pub async fn send_messages(&self, parse_body: bool) -> Result<TransferSummary> {
        let destination_url = &self.require_resolved()?.destination_url;
        self.stage.ensure_layout().await?;

        let files = self.stage.list(&Stage::UpdatesPending).await?;
        if files.is_empty() {
            info!("No messages to send for {}.", self.config.source);
            return Ok(TransferSummary::default());
        }

        let mut summary = TransferSummary::default();
        for files in batch(files, self.options.wire_batch_limit) {
            if files.is_empty() {
                continue;
            }

            match self.send_batch(destination_url, &files, parse_body).await {
                Ok(()) => {
                    debug!(
                        "Sent batch of {} messages to {} for {}.",
                        files.len(),
                        self.config.destination,
                        self.config.source
                    );
                    for file in &files {
                        self.stage
                            .copy_file(file, &Stage::UpdatesPending, &Stage::DeletesPending)
                            .await?;
                        self.stage
                            .move_file(file, &Stage::UpdatesPending, &Stage::UpdatesArchived)
                            .await?;
                    }
                    summary.succeeded += files.len();
                }
                Err(e) => {
                    error!(
                        "Failed to send batch of {} messages to {} for {}: {e:#}",
                        files.len(),
                        self.config.destination,
                        self.config.source
                    );
                    for file in &files {
                        self.stage
                            .move_file(file, &Stage::UpdatesPending, &Stage::UpdatesErrors)
                            .await?;
                    }
                    summary.failed += files.len();
                }
            }
        }

        info!(
            "Sent total of {} messages to {} for {}.",
            summary.succeeded, self.config.destination, self.config.source
        );
        if summary.failed > 0 {
            warn!(
                "Error sending {} messages to {} for {}.",
                summary.failed, self.config.destination, self.config.source
            );
        }
        Ok(summary)
    }

    async fn send_batch(
        &self,
        destination_url: &str,
        files: &[String],
        parse_body: bool,
    ) -> anyhow::Result<()> {
        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let message = self.stage.read(&Stage::UpdatesPending, file).await?;
            entries.push(SendEntry {
                id: uuid::Uuid::new_v4().to_string(),
                body: message.wire_body(parse_body),
                message_attributes: message.message_attributes,
            });
        }

        let outcome = self.gateway.send_batch(destination_url, entries).await?;
        if !outcome.is_success() {
            anyhow::bail!(
                "{} of {} entries were rejected: {}",
                outcome.failed_ids.len(),
                files.len(),
                outcome.failed_ids.join(", ")
            );
        }
        Ok(())
    }

    /// Deletes `deletes/pending` from the source using the stored receipt handles.
    ///
    /// Batch failures are routed the same way as in
    /// [`send_messages`](Self::send_messages): to `deletes/errors` as a whole.
    pub async fn delete_messages(&self) -> Result<TransferSummary> {
        let source_url = &self.require_resolved()?.source_url;
        self.stage.ensure_layout().await?;

        let files = self.stage.list(&Stage::DeletesPending).await?;
        if files.is_empty() {
            info!("No messages to delete for {}.", self.config.source);
            return Ok(TransferSummary::default());
        }

        let mut summary = TransferSummary::default();
        for files in batch(files, self.options.wire_batch_limit) {
            if files.is_empty() {
                continue;
            }

            let target = match self.delete_batch(source_url, &files).await {
                Ok(()) => {
                    debug!(
                        "Deleted batch of {} messages from {}.",
                        files.len(),
                        self.config.source
                    );
                    summary.succeeded += files.len();
                    Stage::DeletesArchived
                }
                Err(e) => {
                    error!(
                        "Failed to delete batch of {} messages from {}: {e:#}",
                        files.len(),
                        self.config.source
                    );
                    summary.failed += files.len();
                    Stage::DeletesErrors
                }
            };

            for file in &files {
                self.stage
                    .move_file(file, &Stage::DeletesPending, &target)
                    .await?;
            }
        }

        info!(
            "Deleted total of {} messages from {}.",
            summary.succeeded, self.config.source
        );
        if summary.failed > 0 {
            warn!(
                "Error deleting {} messages from {}.",
                summary.failed, self.config.source
            );
        }
        Ok(summary)
    }

    async fn delete_batch(&self, source_url: &str, files: &[String]) -> anyhow::Result<()> {
        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let message = self.stage.read(&Stage::DeletesPending, file).await?;
            entries.push(DeleteEntry {
                id: message.message_id,
                receipt_handle: message.receipt_handle,
            });
        }

        let outcome = self.gateway.delete_batch(source_url, entries).await?;
        if !outcome.is_success() {
            anyhow::bail!(
                "{} of {} entries were rejected: {}",
                outcome.failed_ids.len(),
                files.len(),
                outcome.failed_ids.join(", ")
            );
        }
        Ok(())
    }

    /// Removes every staged file, keeping `received` unless `all`.
    pub async fn clean(&self, all: bool) -> Result<CleanSummary> {
        let removed = self.stage.clean(all).await?;
        info!("Deleted {} files for {}.", removed, self.config.source);
        Ok(CleanSummary { removed })
    }
}
