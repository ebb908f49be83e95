//! Try-on worker binary.

use std::sync::Arc;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clozet_queue::JobQueue;
use clozet_worker::{build_orchestrator, JobExecutor, Sweeper, WorkerConfig};

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("clozet=info".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("aws_smithy_runtime=warn".parse()?);
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_current_span(true)).try_init()?;
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Required for TLS to Redis, R2 and Google APIs
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing()?;

    let config = WorkerConfig::from_env();
    info!(?config, "Starting clozet-worker");

    if let Some(port) = config.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("Failed to start metrics exporter")?;
        info!(port, "Serving Prometheus metrics");
    }

    let queue = JobQueue::from_env().context("Failed to create job queue")?;
    let orchestrator = build_orchestrator(queue.clone())
        .await
        .context("Failed to build orchestrator")?;

    let executor = Arc::new(JobExecutor::new(
        config.clone(),
        queue,
        Arc::clone(&orchestrator),
    ));

    let sweeper = Sweeper::new(orchestrator, config);
    let sweep_task = {
        let shutdown = executor.shutdown_token();
        tokio::spawn(async move { sweeper.run(shutdown).await })
    };

    {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down, draining in-flight jobs");
            executor.shutdown();
        });
    }

    executor.run().await.context("Executor stopped with an error")?;
    sweep_task.await.ok();

    info!("Worker stopped");
    Ok(())
}
