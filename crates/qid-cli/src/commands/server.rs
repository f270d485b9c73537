//! The `qid server` command.

use clap::Args;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use qid_api::{routes, AppState, QueueBridge};
use qid_core::Service;
use qid_queue::MemoryQueue;
use qid_service::{CheckScheduler, Qid};
use qid_store::MemoryStore;
use qid_worker::Worker;

#[derive(Args)]
pub struct ServerArgs {
    /// Port to serve the API on
    #[arg(long, short, env = "QID_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Run a co-resident worker pool
    #[arg(long, env = "QID_RUN_WORKER", default_value_t = true)]
    pub run_worker: bool,

    /// Number of co-resident workers
    #[arg(long, env = "QID_CONCURRENCY", default_value_t = 1)]
    pub concurrency: usize,
}

pub async fn run(args: ServerArgs) -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let queue = MemoryQueue::new();

    info!("initializing service");
    let svc = Arc::new(Qid::new(
        Arc::new(queue.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = CheckScheduler::new(
        Arc::new(queue.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    );
    tokio::spawn(scheduler.run(shutdown_rx.clone()));

    if args.run_worker {
        for num in 1..=args.concurrency {
            info!(num, "starting worker");
            let worker = Worker::new(
                svc.clone() as Arc<dyn Service>,
                Arc::new(queue.clone()),
                Arc::new(queue.clone()),
            );
            let rx = shutdown_rx.clone();
            tokio::spawn(async move { worker.run(rx).await });
        }
    }

    let bridge = Arc::new(QueueBridge::new(
        Arc::new(queue.clone()),
        Arc::new(queue.clone()),
    ));
    let app = routes::router(AppState::new(svc, bridge))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(%addr, "serving HTTP");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let _ = shutdown_tx.send(true);
    Ok(())
}
