use crate::cli::Cli;
use crate::config::{Config, FileConfig, LogFormat};
use crate::state::RunContext;
use clap::Parser;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

mod cli;
mod cluster;
mod config;
mod error;
mod image_reference;
mod reconcile;
mod registry;
mod retry;
mod runner;
mod state;
mod tags;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref(), cli.log_format);
    info!("Starting eks-image-updater {}", env!("CARGO_PKG_VERSION"));

    let file_config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => FileConfig::default(),
    };
    let config = Config::resolve(&cli, file_config)?;

    let cluster = cluster::create_client(&config.cluster).await?;
    let registry = registry::create_client(&config.region).await;

    let cancel = CancellationToken::new();
    runner::cancel_on_interrupt_or_timeout(cancel.clone(), config.timeout);

    let ctx = RunContext {
        config,
        cluster,
        registry,
        cancel,
    };
    let report = runner::run(&ctx).await;
    ctx.cancel.cancel();
    report.log_summary();

    Ok(match report.has_failures() {
        true => ExitCode::FAILURE,
        false => ExitCode::SUCCESS,
    })
}

/// Logs to stdout.
fn init_tracing(level: Option<&str>, format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(log_filter(level))
        .with_writer(std::io::stdout);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Accepts a plain level or a full filter directive; anything else falls back to `info`.
fn log_filter(level: Option<&str>) -> EnvFilter {
    match level.map(str::trim).filter(|level| !level.is_empty()) {
        Some(level) if level.parse::<LevelFilter>().is_ok() => EnvFilter::new(level),
        Some(directives) if directives.contains('=') => {
            EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
        }
        _ => EnvFilter::new("info"),
    }
}
