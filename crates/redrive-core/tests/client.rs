mod common;

use common::{messages, queue_config, MemoryGateway};
use redrive::{
    DirectRedrive, ProcessorRegistry, QueueGateway, RedriveClient, RedriveConfig, RedriveError,
};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

fn config(data_directory: &Path) -> RedriveConfig {
    RedriveConfig {
        data_directory: data_directory.to_path_buf(),
        receive_count: 25,
        parse_body: true,
        processing_batch_size: NonZeroUsize::new(4).unwrap(),
        strict_processors: false,
        queue_configs: vec![
            queue_config("billing-dlq", "billing"),
            queue_config("orders-dlq", "orders"),
        ],
    }
}

fn gateway() -> Arc<MemoryGateway> {
    Arc::new(
        MemoryGateway::new()
            .with_messages("billing-dlq", messages(3))
            .with_messages("orders-dlq", messages(12))
            .with_queue("billing")
            .with_queue("orders"),
    )
}

fn client(config: RedriveConfig, gateway: &Arc<MemoryGateway>) -> RedriveClient {
    common::init_logging();
    RedriveClient::new(
        config,
        Arc::clone(gateway) as Arc<dyn QueueGateway>,
        &ProcessorRegistry::with_defaults(),
    )
    .unwrap()
}

#[tokio::test]
async fn summaries_are_sorted_by_depth() {
    let dir = tempfile::tempdir().unwrap();
    let mut client = client(config(dir.path()), &gateway());
    assert!(client.queue_summaries().is_empty());

    client.initialize().await.unwrap();

    let summaries = client.queue_summaries();
    let order: Vec<(&str, u64)> = summaries
        .iter()
        .map(|s| (s.source.as_str(), s.approximate_messages()))
        .collect();
    assert_eq!(order, vec![("orders-dlq", 12), ("billing-dlq", 3)]);
    assert_eq!(summaries[0].destination, "orders");
    assert_eq!(summaries[0].url, common::url("orders-dlq"));
}

#[tokio::test]
async fn unconfigured_queues_exclude_every_configured_name() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(
        MemoryGateway::new()
            .with_queue("billing-dlq")
            .with_queue("billing")
            .with_queue("orders-dlq")
            .with_queue("orders")
            .with_queue("payments-dlq"),
    );
    let client = client(config(dir.path()), &gateway);

    assert_eq!(
        client.unconfigured_queues().await.unwrap(),
        vec![common::url("payments-dlq")]
    );
}

#[tokio::test]
async fn initialize_fails_when_any_queue_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.queue_configs.push(queue_config("ghost-dlq", "ghost"));

    let mut client = client(config, &gateway());
    let err = client.initialize().await.unwrap_err();

    assert!(matches!(err, RedriveError::QueueNotFound { .. }));
}

#[tokio::test]
async fn phases_run_for_every_queue() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway();
    let mut client = client(config(dir.path()), &gateway);
    client.initialize().await.unwrap();

    let received = client.receive_messages().await;
    let totals: Vec<(String, usize)> = received
        .into_iter()
        .map(|o| (o.source, o.result.unwrap().received))
        .collect();
    assert_eq!(
        totals,
        vec![("billing-dlq".to_string(), 3), ("orders-dlq".to_string(), 12)]
    );

    for outcome in client.process_messages().await {
        assert!(outcome.result.unwrap().updates > 0);
    }
    for outcome in client.send_messages().await {
        assert_eq!(outcome.result.unwrap().failed, 0);
    }
    for outcome in client.delete_messages().await {
        assert_eq!(outcome.result.unwrap().failed, 0);
    }

    assert_eq!(gateway.sent("orders").len(), 12);
    assert_eq!(gateway.sent("billing").len(), 3);
    assert_eq!(gateway.deleted("orders-dlq").len(), 12);

    let cleaned: usize = client
        .clean(true)
        .await
        .into_iter()
        .map(|o| o.result.unwrap().removed)
        .sum();
    assert!(cleaned >= 15);
}

#[tokio::test]
async fn a_failing_queue_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = gateway();
    let mut client = client(config(dir.path()), &gateway);
    client.initialize().await.unwrap();
    client.receive_messages().await;
    client.process_messages().await;

    // a file in place of billing's updates/pending fails only billing's send
    let billing = dir.path().join("billing-dlq").join("updates").join("pending");
    std::fs::remove_dir_all(&billing).unwrap();
    std::fs::write(&billing, "not a directory").unwrap();

    let outcomes = client.send_messages().await;
    let billing = outcomes.iter().find(|o| o.source == "billing-dlq").unwrap();
    let orders = outcomes.iter().find(|o| o.source == "orders-dlq").unwrap();

    assert!(billing.result.is_err());
    assert_eq!(orders.result.as_ref().unwrap().succeeded, 12);
}

#[test]
fn strict_mode_rejects_unknown_processors() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.queue_configs[0].processor = Some("no-such-processor".to_string());

    let lenient = RedriveClient::new(
        config.clone(),
        gateway() as Arc<dyn QueueGateway>,
        &ProcessorRegistry::with_defaults(),
    );
    assert!(lenient.is_ok());

    config.strict_processors = true;
    let strict = RedriveClient::new(
        config,
        gateway() as Arc<dyn QueueGateway>,
        &ProcessorRegistry::with_defaults().register("no-such", DirectRedrive),
    );
    assert!(matches!(
        strict.err(),
        Some(RedriveError::UnknownProcessor { ref name }) if name == "no-such-processor"
    ));
}
