use std::{sync::Arc, time::Duration};

use anyhow::Context;
use jemallocator::Jemalloc;
use log::{error, info, warn, LevelFilter};
use simple_logger::SimpleLogger;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use daopulse::{build_retrievers, db, Aggregator, CronScheduler, MetricsPipeline, Settings, Store};

#[tokio::main()]
async fn main() -> anyhow::Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .env()
        .init()
        .unwrap();

    let settings = Arc::new(
        Settings::new()
            .context("Failed to load config.yaml. Please ensure it exists and is valid")?,
    );

    let backend = db::connect(&settings)
        .await
        .context("Failed to initialize metric store")?;

    let retrievers = build_retrievers(
        &settings.sources,
        Duration::from_secs(settings.schedule.request_timeout_secs),
    )
    .context("Failed to build source retrievers")?;

    let sources: Vec<_> = retrievers.iter().map(|r| r.source().as_str()).collect();
    if sources.is_empty() {
        warn!("No sources configured, only empty runs will be scheduled");
    } else {
        info!("Configured sources: {}", sources.join(", "));
    }

    let pipeline = Arc::new(MetricsPipeline::new(
        retrievers,
        Arc::new(Store::new(backend)),
        Aggregator::new(settings.schedule.annualization_factor),
        Duration::from_secs(settings.schedule.source_timeout_secs),
    ));

    run_service(settings, pipeline).await
}

async fn run_service(
    settings: Arc<Settings>,
    pipeline: Arc<MetricsPipeline>,
) -> anyhow::Result<()> {
    let cancellation_token = CancellationToken::new();

    let cron_scheduler = CronScheduler::new(pipeline, settings.schedule.clone());

    let cron_token = cancellation_token.child_token();
    let cron_handle = tokio::spawn(async move {
        if let Err(e) = cron_scheduler.run(cron_token).await {
            error!("Cron scheduler failed: {:#}", e);
        }
    });

    info!("Cron scheduler started - metrics will be retrieved periodically");

    #[cfg(unix)]
    let mut sigterm_stream = {
        use tokio::signal::unix::{signal, SignalKind};
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?
    };

    info!("Service running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
            _ = sigterm_stream.recv() => {
                info!("Received SIGTERM, exiting gracefully...");
            },
        };
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal (Ctrl+C), exiting gracefully...");
            },
        };
    }

    cancellation_token.cancel();

    info!("Waiting for cron scheduler to stop...");
    let _ = cron_handle.await;

    info!("Shutdown complete");
    Ok(())
}
