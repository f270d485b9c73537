//! The `qid worker` command.

use clap::Args;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use qid_api::Client;
use qid_worker::Worker;

#[derive(Args)]
pub struct WorkerArgs {
    /// URL of the QID server
    #[arg(
        long = "qid-url",
        short = 'u',
        env = "QID_URL",
        default_value = "http://localhost:8080"
    )]
    pub qid_url: String,

    /// Number of workers to start in this process
    #[arg(long, env = "QID_CONCURRENCY", default_value_t = 1)]
    pub concurrency: usize,
}

pub async fn run(args: WorkerArgs) -> anyhow::Result<()> {
    let client = Client::new(&args.qid_url);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::new();
    for num in 1..=args.concurrency {
        info!(num, url = %args.qid_url, "starting worker");
        let worker = Worker::new(
            Arc::new(client.clone()),
            Arc::new(client.clone()),
            Arc::new(client.clone()),
        );
        let rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { worker.run(rx).await }));
    }

    tokio::signal::ctrl_c().await?;
    let _ = shutdown_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}
