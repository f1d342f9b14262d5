use anyhow::Context;
use clap::Parser;
use log::{error, info};
use redrive::{QueueOutcome, RedriveClient, RedriveConfig, SqsGateway};
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

mod list;
mod processors;

const LOCALSTACK_ENDPOINT: &str = "http://localhost:4566";

#[tokio::main]
pub async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().run().await {
        Ok(true) => (),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "sqs-redrive")]
#[command(about = "stage, filter and redrive messages out of your AWS DLQs", long_about = None)]
pub struct Cli {
    /// YAML file describing the queue pairs to redrive
    #[arg(short, long)]
    config: PathBuf,

    /// Print every configured source queue with its approximate depth
    #[arg(long)]
    list: bool,

    /// Receive messages from each source queue into `received`
    #[arg(long)]
    receive: bool,

    /// Classify received messages with each queue's processor
    #[arg(long)]
    process: bool,

    /// Send pending updates to each destination queue
    #[arg(long)]
    send: bool,

    /// Delete pending deletes from each source queue
    #[arg(long)]
    delete: bool,

    /// Remove staged files, keeping `received`
    #[arg(long, conflicts_with = "clean_all")]
    clean: bool,

    /// Remove staged files including `received`
    #[arg(long)]
    clean_all: bool,

    /// Talk to LocalStack with static test credentials
    #[arg(long)]
    local: bool,

    /// Endpoint override, defaults to LocalStack when --local is set
    #[arg(long)]
    endpoint: Option<String>,
}

impl Cli {
    /// Runs the selected phases in order. Returns `false` when any queue
    /// failed a phase.
    pub async fn run(self) -> anyhow::Result<bool> {
        let config = RedriveConfig::from_path(&self.config)
            .with_context(|| format!("loading {}", self.config.display()))?;

        let gateway = Arc::new(SqsGateway::from_config(self.aws_config().await));
        let mut client = RedriveClient::new(config, gateway, &processors::registry())?;

        let mut ok = true;

        if self.clean || self.clean_all {
            ok &= report(client.clean(self.clean_all).await);
        }

        if !(self.list || self.receive || self.process || self.send || self.delete) {
            return Ok(ok);
        }

        client
            .initialize()
            .await
            .context("initializing queues")?;

        if self.list {
            print!("{}", list::render(&client.queue_summaries()));
            match client.unconfigured_queues().await {
                Ok(urls) if !urls.is_empty() => {
                    println!("\nqueues without a redrive configuration:");
                    for url in urls {
                        println!("  {url}");
                    }
                }
                Ok(_) => (),
                Err(e) => {
                    error!("listing queues failed: {e}");
                    ok = false;
                }
            }
        }
        if self.receive {
            ok &= report(client.receive_messages().await);
        }
        if self.process {
            ok &= report(client.process_messages().await);
        }
        if self.send {
            ok &= report(client.send_messages().await);
        }
        if self.delete {
            ok &= report(client.delete_messages().await);
        }

        Ok(ok)
    }

    async fn aws_config(&self) -> aws_config::SdkConfig {
        let mut loader = aws_config::from_env();

        if self.local {
            loader = loader
                .region(
                    // supports loading region from known env variables
                    aws_config::meta::region::RegionProviderChain::default_provider()
                        .or_else(aws_config::Region::from_static("us-east-1")),
                )
                .credentials_provider(aws_sdk_sqs::config::Credentials::new(
                    "test", "test", None, None, "static",
                ))
                .endpoint_url(self.endpoint.as_deref().unwrap_or(LOCALSTACK_ENDPOINT));
        } else if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        loader.load().await
    }
}

fn report<T: Debug>(outcomes: Vec<QueueOutcome<T>>) -> bool {
    let mut ok = true;
    for outcome in outcomes {
        match outcome.result {
            Ok(summary) => info!("{}: {:?}", outcome.source, summary),
            Err(e) => {
                error!("{}: {e}", outcome.source);
                ok = false;
            }
        }
    }
    ok
}
