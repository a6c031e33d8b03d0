//! augur-worker: the inference consumer process.
//!
//! Wires the pieces together: load the model once at startup, connect to the
//! broker, declare the durable work queue, and run a prefetch-bounded
//! consumer group until the operator signals shutdown.
//!
//! The broker is the in-process [`InMemoryBroker`]; `--job` bodies published
//! at startup make the binary a self-contained demo that drains the queue
//! and exits. The `Subscription` seam in augur-core is where a networked
//! broker would plug in.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use augur_core::broker::{InMemoryBroker, Subscription};
use augur_core::config::{ConnectConfig, ConsumerConfig};
use augur_core::consumer::WorkerGroup;
use augur_core::domain::FailurePolicy;
use augur_core::lifecycle::{connect_with_backoff, shutdown_signal};
use augur_core::predict::{LinearModel, Predictor};

#[derive(Parser, Debug)]
#[command(name = "augur-worker")]
#[command(about = "Durable work-queue inference consumer")]
struct Cli {
    /// Model JSON file: {"labels": [...], "weights": [[...], ...], "bias": [...]}.
    #[arg(long)]
    model: PathBuf,

    /// Durable queue to consume from.
    #[arg(long, default_value = "task_queue")]
    queue: String,

    /// Maximum unacknowledged deliveries per session.
    #[arg(long, default_value_t = 1)]
    prefetch: usize,

    /// Concurrent handler tasks (still capped by --prefetch).
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Requeue failed predictions up to this many redeliveries instead of
    /// dead-lettering them.
    #[arg(long)]
    max_redeliveries: Option<u32>,

    /// Connection attempts before giving up at startup.
    #[arg(long, default_value_t = 1)]
    connect_attempts: u32,

    /// JSON job bodies to publish before consuming. When given, the worker
    /// drains the queue and exits instead of waiting for ctrl-c.
    #[arg(long = "job")]
    jobs: Vec<String>,
}

impl Cli {
    fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            queue: self.queue.clone(),
            prefetch: self.prefetch,
            workers: self.workers,
            on_failure: match self.max_redeliveries {
                Some(max_redeliveries) => FailurePolicy::Requeue { max_redeliveries },
                None => FailurePolicy::DeadLetter,
            },
            connect: ConnectConfig {
                max_attempts: self.connect_attempts,
                ..ConnectConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,augur_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.consumer_config();

    let model = LinearModel::from_json_file(&cli.model)
        .with_context(|| format!("loading model from {}", cli.model.display()))?;
    info!(
        labels = model.labels().len(),
        dimension = model.dimension(),
        "model loaded"
    );
    let predictor: Arc<dyn Predictor> = Arc::new(model);

    let broker = InMemoryBroker::new();

    let publisher = connect_with_backoff(&broker, &config.connect)
        .await
        .context("connecting publish channel")?;
    publisher
        .queue_declare(&config.queue, true)
        .await
        .context("declaring work queue")?;
    for body in &cli.jobs {
        let message_id = publisher
            .publish(&config.queue, body.clone().into_bytes(), true)
            .await
            .context("publishing job")?;
        info!(%message_id, "job published");
    }

    let mut channel = connect_with_backoff(&broker, &config.connect)
        .await
        .context("connecting consume channel")?;
    channel.qos(config.prefetch);
    let subscription: Arc<dyn Subscription> = Arc::new(
        channel
            .consume(&config.queue)
            .await
            .context("subscribing to work queue")?,
    );

    info!(
        queue = %config.queue,
        prefetch = config.prefetch,
        workers = config.workers,
        "consuming; press ctrl-c to stop"
    );
    let group = WorkerGroup::spawn(config.workers, subscription, predictor, config.on_failure);

    if cli.jobs.is_empty() {
        shutdown_signal().await;
    } else {
        // Demo mode: wait for the published jobs to reach a disposition.
        while !broker.counts().await.is_drained() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    // Stop taking new deliveries, let in-flight ones finish, then close.
    group.shutdown_and_join().await;
    broker.close().await;

    let counts = broker.counts().await;
    info!(
        acked = counts.acked,
        rejected = counts.rejected,
        requeued = counts.requeued,
        "consumer stopped"
    );
    Ok(())
}
