//! lazybus-demo: pushes a batch of messages through an in-process bus.
//!
//! Registers one consumer, starts dispatch, publishes `--messages` JSON and
//! string messages, waits until every one is delivered (or Ctrl+C), then
//! prints the per-topic counters as JSON.
//!
//! # Usage
//!
//! ```bash
//! lazybus-demo --messages 50 --max-message 2 --worker-pool 1
//!
//! # Via environment variables or a TOML file
//! LAZYBUS_WORKER_POOL=8 lazybus-demo --config lazybus.toml
//! ```

use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use lazybus::{BoxError, Bus, BusConfig, Producer};

/// Drive an in-process lazybus with a synthetic workload.
#[derive(Parser, Debug)]
#[command(name = "lazybus-demo", version, about)]
struct Cli {
    /// Optional TOML config file (`max_message`, `worker_pool`).
    #[arg(long, env = "LAZYBUS_CONFIG")]
    config: Option<PathBuf>,

    /// Per-topic queue capacity. Overrides the config file.
    #[arg(long)]
    max_message: Option<usize>,

    /// Dispatch workers per topic. Overrides the config file.
    #[arg(long)]
    worker_pool: Option<usize>,

    /// Topic to publish on.
    #[arg(long, default_value = "demo")]
    topic: String,

    /// Number of messages to publish.
    #[arg(long, default_value_t = 10)]
    messages: u64,

    /// Simulated handler latency in milliseconds.
    #[arg(long, default_value_t = 0)]
    handler_delay_ms: u64,
}

impl Cli {
    fn bus_config(&self) -> anyhow::Result<BusConfig> {
        let mut config = match &self.config {
            Some(path) => BusConfig::from_file(path)?,
            None => BusConfig::from_env(),
        };
        if let Some(max_message) = self.max_message {
            config.max_message = max_message;
        }
        if let Some(worker_pool) = self.worker_pool {
            config.worker_pool = worker_pool;
        }
        Ok(config.normalized())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!(?cli, "starting lazybus-demo");

    let bus = Arc::new(Bus::builder().config(cli.bus_config()?).build());

    let handled = Arc::new(AtomicU64::new(0));
    let counter = handled.clone();
    let delay = Duration::from_millis(cli.handler_delay_ms);
    bus.register_consumer(cli.topic.clone(), move |id, mut message| {
        let counter = counter.clone();
        async move {
            let mut body = String::new();
            message.read_to_string(&mut body)?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            tracing::info!(message_id = %id, body = %body.trim_end(), "consumed");
            counter.fetch_add(1, Ordering::Relaxed);
            Ok::<(), BoxError>(())
        }
    })?;
    bus.listen()?;

    let total = cli.messages;
    let publisher = {
        let bus = bus.clone();
        let topic = cli.topic.clone();
        tokio::spawn(async move {
            for seq in 0..total {
                let producer = if seq % 2 == 0 {
                    Producer::json(serde_json::json!({ "seq": seq, "kind": "json" }))
                } else {
                    Producer::string(format!("message {seq}"))
                };
                bus.publish(&topic, producer).await?;
            }
            Ok::<(), lazybus::BusError>(())
        })
    };

    tokio::select! {
        _ = wait_for_all(&handled, total) => {
            tracing::info!(total, "all messages handled");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }

    bus.shutdown_and_join().await;
    match publisher.await? {
        Ok(()) | Err(lazybus::BusError::ShutDown) => {}
        Err(e) => return Err(e.into()),
    }

    println!("{}", serde_json::to_string_pretty(&bus.snapshot())?);
    Ok(())
}

async fn wait_for_all(handled: &AtomicU64, total: u64) {
    let mut interval = tokio::time::interval(Duration::from_millis(20));
    while handled.load(Ordering::Relaxed) < total {
        interval.tick().await;
    }
}
