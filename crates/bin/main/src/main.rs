//! Main entrypoint.

use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::Layer as _;

/// Wire the log sinks: an info file, an error file, and a console layer
/// controlled by `RUST_LOG`.
///
/// The returned guards keep the non-blocking writers alive.
fn init_logging(
    log: &config_core::LogConfig,
) -> (
    tracing_appender::non_blocking::WorkerGuard,
    tracing_appender::non_blocking::WorkerGuard,
) {
    let info_appender = tracing_appender::rolling::never(&log.dir, &log.info_file);
    let (info_writer, info_guard) = tracing_appender::non_blocking(info_appender);

    let error_appender = tracing_appender::rolling::never(&log.dir, &log.error_file);
    let (error_writer, error_guard) = tracing_appender::non_blocking(error_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(info_writer)
                .with_filter(tracing_subscriber::filter::LevelFilter::INFO),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(error_writer)
                .with_filter(tracing_subscriber::filter::LevelFilter::ERROR),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_filter(tracing_subscriber::EnvFilter::from_default_env()),
        )
        .init();

    (info_guard, error_guard)
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;

    let config_path: PathBuf = envfury::must("MAIL2TICKET_CONFIG")?;
    let config = config_yaml::load(&config_path).await?;

    let _log_guards = init_logging(&config.log);

    let gateway = ticket_api::Client::new(&config.rest)?;
    let pipeline =
        message_dispatch::Pipeline::new(gateway, std::sync::Arc::new(config.runtime))?;

    tracing::info!(
        servers = config.servers.len(),
        "starting mail2ticket ingestion"
    );
    let orchestrator = server_supervisor::spawn(config.servers, pipeline);

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, waiting for in-flight work");

    orchestrator.stop().await?;
    tracing::info!("all connections closed");

    Ok(())
}
