use anyhow::{Context, Result};
use clap::Parser;
use prometheus::Registry;
use prometheus_gmail_exporter::auth;
use prometheus_gmail_exporter::cli::{Cli, Commands, LogFormat, RunArgs};
use prometheus_gmail_exporter::client::{ClientOptions, MailClient, ProductionMailClient};
use prometheus_gmail_exporter::config::{self, Config};
use prometheus_gmail_exporter::engine::RefreshEngine;
use prometheus_gmail_exporter::error::ExporterError;
use prometheus_gmail_exporter::readiness::{Readiness, ReadinessHandle};
use prometheus_gmail_exporter::scheduler::{ScheduleMode, Scheduler};
use prometheus_gmail_exporter::server::{self, ServerState};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        display_error(&e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // aws-lc-rs everywhere except Windows, where ring avoids the NASM/CMake toolchain
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command() {
        Commands::InitConfig { output, force } => init_config(output, force).await,
        Commands::Auth { force } => {
            let config = load_config(&cli, None).await?;
            tracing::info!("Authorizing with Gmail API...");
            auth::authorize(&config.auth, force).await?;
            println!("Authorization successful");
            Ok(())
        }
        Commands::Run(args) => {
            let config = load_config(&cli, Some(&args)).await?;
            serve_and_refresh(config).await
        }
    }
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("prometheus_gmail_exporter=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("prometheus_gmail_exporter=info,warn"))
    };

    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init(),
    }
}

/// File configuration, then CLI overrides, then validation
async fn load_config(cli: &Cli, run_args: Option<&RunArgs>) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path).await?,
        None => Config::load_default().await?,
    };

    cli.apply_to(&mut config);
    if let Some(args) = run_args {
        args.apply_to(&mut config);
    }

    config.validate()?;
    Ok(config)
}

async fn init_config(output: Option<PathBuf>, force: bool) -> Result<()> {
    let output =
        output.unwrap_or_else(|| config::home_config_path("prometheus-gmail-exporter.toml"));

    if output.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {:?}. Use --force to overwrite.",
            output
        );
    }

    Config::create_example(&output).await?;
    println!("Created example configuration at {:?}", output);
    Ok(())
}

fn log_startup(config: &Config) {
    let labels = if config.labels.include.is_empty() {
        "all".to_string()
    } else {
        config.labels.include.join(",")
    };
    let mode = match ScheduleMode::from(&config.refresh) {
        ScheduleMode::Foreground => "single refresh".to_string(),
        ScheduleMode::Daemon { interval } => format!("refresh every {}s", interval.as_secs()),
    };

    tracing::info!(
        labels = %labels,
        sender_count = %config.labels.sender_count.join(","),
        custom_queries = config.custom_queries.len(),
        namespace = %config.metrics.namespace,
        mode = %mode,
        "prometheus-gmail-exporter {} starting",
        env!("CARGO_PKG_VERSION")
    );
    tracing::debug!(
        "Client secret {:?}, token cache {:?}",
        config.auth.client_secret_file,
        config.auth.token_cache
    );
}

async fn serve_and_refresh(config: Config) -> Result<()> {
    log_startup(&config);

    let registry = Registry::new();
    let readiness = ReadinessHandle::new(Readiness::AwaitingAuthorization);
    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let listener = server::bind(&config.server.bind_address, config.server.port).await?;
    let mut state = ServerState::new(registry.clone());
    if config.server.readiness {
        state = state.with_readiness(readiness.clone());
    }
    let server_handle = tokio::spawn(server::serve(listener, state, shutdown.clone()));

    let hub = tokio::select! {
        hub = auth::initialize_gmail_hub(&config.auth) => hub?,
        _ = shutdown.cancelled() => {
            tracing::info!("Shutdown requested before authorization completed");
            return Ok(());
        }
    };
    tracing::info!("Got Gmail client successfully");

    let client: Arc<dyn MailClient> = Arc::new(ProductionMailClient::new(
        hub,
        ClientOptions::from(&config.api),
    ));
    let mut engine =
        RefreshEngine::from_config(&config, client, registry).with_readiness(readiness.clone());

    match engine.prepare().await {
        Ok(count) => tracing::info!("Monitoring {} labels", count),
        Err(e) if e.is_fatal() => return Err(e.into()),
        Err(e) => tracing::warn!("Label resolution failed, will retry on the first cycle: {}", e),
    }

    let scheduler = Scheduler::new(ScheduleMode::from(&config.refresh));
    let cycles = scheduler.run(&mut engine, shutdown.clone()).await;
    tracing::info!("Ran {} refresh cycles", cycles);

    shutdown.cancel();
    server_handle
        .await
        .context("Metrics server task panicked")??;

    match engine.take_fatal_error() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => return,
    }

    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}

/// Display error with helpful context
fn display_error(error: &anyhow::Error) {
    eprintln!("Error: {}", error);

    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  Caused by: {}", e);
        cause = e.source();
    }

    if let Some(exporter_err) = error.downcast_ref::<ExporterError>() {
        match exporter_err {
            ExporterError::ClientSecretMissing { .. } => {
                eprintln!("\nHint: Download an OAuth client secret (Desktop app) from the Google API console");
                eprintln!("      and save it at that path, or pass --client-secret-file.");
            }
            ExporterError::AuthError(_) | ExporterError::AuthRequired(_) => {
                eprintln!("\nHint: Make sure your client secret file is valid.");
                eprintln!("      Try running: prometheus-gmail-exporter auth --force");
            }
            ExporterError::NoLabels => {
                eprintln!("\nHint: The account has no labels to export.");
                eprintln!("      Pass label ids explicitly with --labels.");
            }
            ExporterError::ConfigError(_) => {
                eprintln!("\nHint: Check your configuration file for errors.");
                eprintln!("      Run: prometheus-gmail-exporter init-config --force");
            }
            _ => {}
        }
    }

    eprintln!("\nFor help, run: prometheus-gmail-exporter --help");
}
