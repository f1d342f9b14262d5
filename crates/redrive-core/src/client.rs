//! Fan-out of redrive phases across every configured queue pair.

use crate::config::RedriveConfig;
use crate::error::Result;
use crate::gateway::QueueGateway;
use crate::processor::ProcessorRegistry;
use crate::redrive_queue::{
    CleanSummary, PipelineOptions, ProcessSummary, ReceiveSummary, RedriveQueue, TransferSummary,
};
use crate::SQS_BATCH_LIMIT;
use futures::future::{join_all, try_join_all};
use log::error;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

/// Result of one phase on one queue.
#[derive(Debug)]
pub struct QueueOutcome<T> {
    /// Source queue name
    pub source: String,
    pub result: Result<T>,
}

/// A row of the queue listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueSummary {
    pub source: String,
    pub destination: String,
    pub url: String,
    pub attributes: BTreeMap<String, String>,
}

impl QueueSummary {
    pub fn approximate_messages(&self) -> u64 {
        self.attributes
            .get("ApproximateNumberOfMessages")
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }
}

/// Drives one [`RedriveQueue`] per configured queue pair.
///
/// Phases run on every queue concurrently. A queue failing a phase does not
/// stop the others; each queue reports its own [`QueueOutcome`].
///
/// ```no_run
/// use std::sync::Arc;
/// use redrive::{ProcessorRegistry, RedriveClient, RedriveConfig, SqsGateway};
///
/// # async fn example() -> Result<(), redrive::RedriveError> {
/// let config = RedriveConfig::from_path("redrive.yaml")?;
/// let gateway = Arc::new(SqsGateway::from_config(aws_config::from_env().load().await));
///
/// let mut client = RedriveClient::new(config, gateway, &ProcessorRegistry::with_defaults())?;
/// client.initialize().await?;
/// client.receive_messages().await;
/// client.process_messages().await;
/// # Ok(())
/// # }
/// ```
pub struct RedriveClient {
    config: RedriveConfig,
    gateway: Arc<dyn QueueGateway>,
    queues: Vec<RedriveQueue>,
}

impl RedriveClient {
    /// Builds the queues, resolving each queue's processor in `registry`.
    pub fn new(
        config: RedriveConfig,
        gateway: Arc<dyn QueueGateway>,
        registry: &ProcessorRegistry,
    ) -> Result<Self> {
        let options = PipelineOptions {
            wire_batch_limit: SQS_BATCH_LIMIT,
            processing_batch_size: config.processing_batch_size,
        };

        let queues = config
            .queue_configs
            .iter()
            .map(|queue| {
                let processor =
                    registry.resolve(queue.processor.as_deref(), config.strict_processors)?;
                Ok(RedriveQueue::new(
                    queue.clone(),
                    Arc::clone(&gateway),
                    processor,
                    &config.data_directory,
                    options,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            gateway,
            queues,
        })
    }

    pub fn config(&self) -> &RedriveConfig {
        &self.config
    }

    pub fn queues(&self) -> &[RedriveQueue] {
        &self.queues
    }

    /// Resolves every queue concurrently, failing if any one cannot be resolved.
    pub async fn initialize(&mut self) -> Result<()> {
        try_join_all(self.queues.iter_mut().map(|queue| queue.initialize())).await?;
        Ok(())
    }

    /// Initialized queues, most messages first.
    pub fn queue_summaries(&self) -> Vec<QueueSummary> {
        let mut summaries: Vec<QueueSummary> = self
            .queues
            .iter()
            .filter_map(|queue| {
                let resolved = queue.resolved()?;
                Some(QueueSummary {
                    source: queue.config().source.clone(),
                    destination: queue.config().destination.clone(),
                    url: resolved.source_url.clone(),
                    attributes: resolved.attributes.clone(),
                })
            })
            .collect();

        summaries.sort_by_key(|s| std::cmp::Reverse(s.approximate_messages()));
        summaries
    }

    /// URLs of queues in the account that no queue pair mentions.
    pub async fn unconfigured_queues(&self) -> Result<Vec<String>> {
        let configured: HashSet<&str> = self
            .config
            .queue_configs
            .iter()
            .flat_map(|queue| [queue.source.as_str(), queue.destination.as_str()])
            .collect();

        Ok(self
            .gateway
            .list_queues()
            .await?
            .into_iter()
            .filter(|url| !configured.contains(url.rsplit('/').next().unwrap_or(url)))
            .collect())
    }

    pub async fn receive_messages(&self) -> Vec<QueueOutcome<ReceiveSummary>> {
        let (count, parse_body) = (self.config.receive_count, self.config.parse_body);
        self.fan_out("receive", |queue| queue.receive(count, parse_body))
            .await
    }

    pub async fn process_messages(&self) -> Vec<QueueOutcome<ProcessSummary>> {
        self.fan_out("process", |queue| queue.process()).await
    }

    pub async fn send_messages(&self) -> Vec<QueueOutcome<TransferSummary>> {
        let parse_body = self.config.parse_body;
        self.fan_out("send", |queue| queue.send_messages(parse_body))
            .await
    }

    pub async fn delete_messages(&self) -> Vec<QueueOutcome<TransferSummary>> {
        self.fan_out("delete", |queue| queue.delete_messages())
            .await
    }

    pub async fn clean(&self, all: bool) -> Vec<QueueOutcome<CleanSummary>> {
        self.fan_out("clean", |queue| queue.clean(all)).await
    }

    async fn fan_out<'a, T, F, Fut>(&'a self, phase: &str, run: F) -> Vec<QueueOutcome<T>>
    where
        F: Fn(&'a RedriveQueue) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        join_all(self.queues.iter().map(|queue| {
            let fut = run(queue);
            async move {
                let result = fut.await;
                if let Err(e) = &result {
                    error!("{phase} failed for {}: {e}", queue.source());
                }
                QueueOutcome {
                    source: queue.source().to_string(),
                    result,
                }
            }
        }))
        .await
    }
}
