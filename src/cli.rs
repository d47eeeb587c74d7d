//! Command-line interface

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "prometheus-gmail-exporter")]
#[command(version)]
#[command(about = "Export Gmail label thread counts as Prometheus metrics", long_about = None)]
pub struct Cli {
    /// Path to configuration file (defaults to ~/.prometheus-gmail-exporter/prometheus-gmail-exporter.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the OAuth2 client secret downloaded from the Google API console
    #[arg(long, global = true)]
    pub client_secret_file: Option<PathBuf>,

    /// Where the OAuth2 token is stored
    #[arg(long, global = true)]
    pub credentials_path: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve metrics and refresh them from Gmail (the default)
    Run(RunArgs),

    /// Authorize with Gmail and store the token, then exit
    Auth {
        /// Discard any stored token and authorize again
        #[arg(long)]
        force: bool,
    },

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Label ids to monitor (all labels when omitted)
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub labels: Vec<String>,

    /// Label ids that also get per-sender unread counts
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub labels_sender_count: Vec<String>,

    /// Seconds between refresh cycles in daemon mode
    #[arg(long)]
    pub update_delay_seconds: Option<u64>,

    /// Port serving /metrics
    #[arg(long)]
    pub prom_port: Option<u16>,

    /// Keep refreshing forever instead of running a single cycle
    #[arg(long)]
    pub daemonize: bool,

    /// Port of the local OAuth2 redirect listener
    #[arg(long)]
    pub oauth_bind_port: Option<u16>,
}

impl Cli {
    /// The subcommand to run; bare invocation means `run` with no overrides
    pub fn command(&self) -> Commands {
        match &self.command {
            Some(Commands::Run(args)) => Commands::Run(args.clone()),
            Some(Commands::Auth { force }) => Commands::Auth { force: *force },
            Some(Commands::InitConfig { output, force }) => Commands::InitConfig {
                output: output.clone(),
                force: *force,
            },
            None => Commands::Run(RunArgs::default()),
        }
    }

    /// Apply global path overrides on top of the file configuration
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(path) = &self.client_secret_file {
            config.auth.client_secret_file = path.clone();
        }
        if let Some(path) = &self.credentials_path {
            config.auth.token_cache = path.clone();
        }
    }
}

impl RunArgs {
    /// Apply the flags that were given on top of the file configuration
    pub fn apply_to(&self, config: &mut Config) {
        if !self.labels.is_empty() {
            config.labels.include = self.labels.clone();
        }
        if !self.labels_sender_count.is_empty() {
            config.labels.sender_count = self.labels_sender_count.clone();
        }
        if let Some(delay) = self.update_delay_seconds {
            config.refresh.interval_secs = delay;
        }
        if let Some(port) = self.prom_port {
            config.server.port = port;
        }
        if self.daemonize {
            config.refresh.daemonize = true;
        }
        if let Some(port) = self.oauth_bind_port {
            config.auth.oauth_bind_port = port;
        }
    }
}
