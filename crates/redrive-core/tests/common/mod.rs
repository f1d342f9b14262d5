#![allow(dead_code)]

use async_trait::async_trait;
use redrive::{
    BatchOutcome, DeleteEntry, GatewayError, Message, MessageProcessor, PipelineOptions,
    QueueConfig, QueueGateway, RedriveQueue, SendEntry, Stage, StageDirectory,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub fn url(name: &str) -> String {
    format!("https://sqs.us-east-1.amazonaws.com/000000000000/{name}")
}

/// How the fake rejects a batch call.
#[derive(Clone, Copy, Debug)]
pub enum Failure {
    /// The call itself fails
    Error,
    /// The call succeeds but the first entry is reported as failed
    RejectFirst,
}

#[derive(Default)]
struct QueueState {
    available: VecDeque<Message>,
    sent: Vec<String>,
    deleted: Vec<String>,
    attributes: bool,
    send_failure: Option<Failure>,
    delete_failure: Option<Failure>,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, QueueState>,
    receive_calls: Vec<usize>,
    send_calls: Vec<usize>,
    delete_calls: Vec<usize>,
}

/// In-memory stand-in for SQS.
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<State>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue(self, name: &str) -> Self {
        self.with_messages(name, Vec::new())
    }

    pub fn with_messages(self, name: &str, messages: Vec<Message>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let queue = state.queues.entry(name.to_string()).or_default();
            queue.attributes = true;
            queue.available.extend(messages);
        }
        self
    }

    pub fn without_attributes(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .queues
            .entry(name.to_string())
            .or_default()
            .attributes = false;
        self
    }

    pub fn fail_sends(&self, queue: &str, failure: Option<Failure>) {
        self.queue_mut(queue, |q| q.send_failure = failure);
    }

    pub fn fail_deletes(&self, queue: &str, failure: Option<Failure>) {
        self.queue_mut(queue, |q| q.delete_failure = failure);
    }

    pub fn receive_calls(&self) -> Vec<usize> {
        self.state.lock().unwrap().receive_calls.clone()
    }

    pub fn send_calls(&self) -> Vec<usize> {
        self.state.lock().unwrap().send_calls.clone()
    }

    pub fn delete_calls(&self) -> Vec<usize> {
        self.state.lock().unwrap().delete_calls.clone()
    }

    /// Bodies sent to `queue`, in order.
    pub fn sent(&self, queue: &str) -> Vec<String> {
        self.queue_ref(queue, |q| q.sent.clone())
    }

    /// Receipt handles deleted from `queue`, in order.
    pub fn deleted(&self, queue: &str) -> Vec<String> {
        self.queue_ref(queue, |q| q.deleted.clone())
    }

    fn queue_mut(&self, name: &str, f: impl FnOnce(&mut QueueState)) {
        let mut state = self.state.lock().unwrap();
        f(state.queues.get_mut(name).expect("unknown queue"));
    }

    fn queue_ref<T>(&self, name: &str, f: impl FnOnce(&QueueState) -> T) -> T {
        let state = self.state.lock().unwrap();
        f(state.queues.get(name).expect("unknown queue"))
    }
}

fn name_of(queue_url: &str) -> String {
    queue_url.rsplit('/').next().unwrap_or_default().to_string()
}

fn outcome(failure: Option<Failure>, ids: Vec<String>) -> Result<BatchOutcome, GatewayError> {
    match failure {
        None => Ok(BatchOutcome::default()),
        Some(Failure::Error) => Err(GatewayError::Sdk("service unavailable".to_string())),
        Some(Failure::RejectFirst) => Ok(BatchOutcome {
            failed_ids: ids.into_iter().take(1).collect(),
        }),
    }
}

#[async_trait]
impl QueueGateway for MemoryGateway {
    async fn resolve_queue_url(&self, name: &str) -> Result<String, GatewayError> {
        if self.state.lock().unwrap().queues.contains_key(name) {
            Ok(url(name))
        } else {
            Err(GatewayError::NotFound {
                what: format!("queue {name}"),
            })
        }
    }

    async fn get_attributes(
        &self,
        queue_url: &str,
        names: &[&str],
    ) -> Result<BTreeMap<String, String>, GatewayError> {
        let state = self.state.lock().unwrap();
        let name = name_of(queue_url);
        match state.queues.get(&name) {
            Some(queue) if queue.attributes => Ok(names
                .iter()
                .map(|attribute| {
                    let value = match *attribute {
                        "ApproximateNumberOfMessages" => queue.available.len().to_string(),
                        "QueueArn" => format!("arn:aws:sqs:us-east-1:000000000000:{name}"),
                        _ => "1700000000".to_string(),
                    };
                    (attribute.to_string(), value)
                })
                .collect()),
            _ => Err(GatewayError::NotFound {
                what: format!("attributes of {queue_url}"),
            }),
        }
    }

    async fn receive(
        &self,
        queue_url: &str,
        max_messages: usize,
    ) -> Result<Vec<Message>, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.receive_calls.push(max_messages);
        let queue = state
            .queues
            .get_mut(&name_of(queue_url))
            .ok_or_else(|| GatewayError::Sdk("no such queue".to_string()))?;
        let take = max_messages.min(queue.available.len());
        Ok(queue.available.drain(..take).collect())
    }

    async fn send_batch(
        &self,
        queue_url: &str,
        entries: Vec<SendEntry>,
    ) -> Result<BatchOutcome, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.send_calls.push(entries.len());
        let queue = state
            .queues
            .get_mut(&name_of(queue_url))
            .ok_or_else(|| GatewayError::Sdk("no such queue".to_string()))?;

        let result = outcome(
            queue.send_failure,
            entries.iter().map(|e| e.id.clone()).collect(),
        );
        let failed = result
            .as_ref()
            .map(|o| o.failed_ids.clone())
            .unwrap_or_default();
        if result.is_ok() {
            for entry in entries.into_iter().filter(|e| !failed.contains(&e.id)) {
                queue.sent.push(entry.body.unwrap_or_default());
            }
        }
        result
    }

    async fn delete_batch(
        &self,
        queue_url: &str,
        entries: Vec<DeleteEntry>,
    ) -> Result<BatchOutcome, GatewayError> {
        let mut state = self.state.lock().unwrap();
        state.delete_calls.push(entries.len());
        let queue = state
            .queues
            .get_mut(&name_of(queue_url))
            .ok_or_else(|| GatewayError::Sdk("no such queue".to_string()))?;

        let result = outcome(
            queue.delete_failure,
            entries.iter().map(|e| e.id.clone()).collect(),
        );
        let failed = result
            .as_ref()
            .map(|o| o.failed_ids.clone())
            .unwrap_or_default();
        if result.is_ok() {
            for entry in entries.into_iter().filter(|e| !failed.contains(&e.id)) {
                queue.deleted.push(entry.receipt_handle);
            }
        }
        result
    }

    async fn list_queues(&self) -> Result<Vec<String>, GatewayError> {
        let mut urls: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .queues
            .keys()
            .map(|name| url(name))
            .collect();
        urls.sort();
        Ok(urls)
    }
}

/// `count` messages with ids `m00`, `m01`, ... and JSON bodies.
pub fn messages(count: usize) -> Vec<Message> {
    (0..count)
        .map(|i| {
            Message::new(
                format!("m{i:02}"),
                format!("receipt-{i:02}"),
                format!(r#"{{"n":{i}}}"#),
            )
        })
        .collect()
}

pub fn queue_config(source: &str, destination: &str) -> QueueConfig {
    QueueConfig {
        source: source.to_string(),
        destination: destination.to_string(),
        processor: None,
    }
}

/// Routes phase logs to the test harness; `RUST_LOG=debug` shows per-batch lines.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn redrive_queue(
    gateway: &Arc<MemoryGateway>,
    data_directory: &Path,
    processor: impl MessageProcessor + 'static,
) -> RedriveQueue {
    init_logging();
    RedriveQueue::new(
        queue_config("orders-dlq", "orders"),
        Arc::clone(gateway) as Arc<dyn QueueGateway>,
        Arc::new(processor),
        data_directory,
        PipelineOptions::default(),
    )
}

/// Message file names in `stage`.
pub async fn files(stage: &StageDirectory, which: Stage) -> Vec<String> {
    stage.list(&which).await.unwrap()
}

pub fn file_names(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| format!("{id}.json")).collect()
}
