use crate::sqs::SqsGateway;
use aws_sdk_sqs::config::Credentials;
use testcontainers::ContainerAsync;
use testcontainers_modules::{
    localstack::LocalStack,
    testcontainers::{runners::AsyncRunner, ImageExt, TestcontainersError},
};

/// A LocalStack container running only SQS, with a gateway pointed at it.
pub struct LocalSqs {
    pub gateway: SqsGateway,
    container: ContainerAsync<LocalStack>,
}

impl LocalSqs {
    pub async fn start() -> Result<Self, TestcontainersError> {
        let container = LocalStack::default()
            .with_tag("latest")
            .with_env_var("SERVICES", "sqs")
            .with_env_var("SKIP_SSL_CERT_DOWNLOAD", "1")
            .start()
            .await?;

        let host_ip = container.get_host().await?;
        let host_port = container.get_host_port_ipv4(4566).await?;
        let endpoint_url = format!("http://{host_ip}:{host_port}");

        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .endpoint_url(&endpoint_url)
            .region("us-east-1")
            .credentials_provider(Credentials::new("test", "test", None, None, "static"))
            .load()
            .await;

        Ok(Self {
            gateway: SqsGateway::from_config(config),
            container,
        })
    }

    /// Creates a queue named `<prefix>-<uuid>` and returns its name.
    pub async fn create_queue(&self, prefix: &str) -> String {
        let name = unique_queue_name(prefix);
        self.gateway
            .client
            .create_queue()
            .queue_name(&name)
            .send()
            .await
            .unwrap();
        name
    }

    pub async fn stop(self) {
        self.container.stop().await.unwrap();
    }
}

pub fn unique_queue_name(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}
