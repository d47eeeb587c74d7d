//! Prometheus exporter for Gmail label metrics
//!
//! Polls a Gmail account on a fixed interval and republishes per-label thread
//! counts, optional per-sender unread breakdowns and saved-search counts as
//! Prometheus gauges.
//!
//! # Overview
//!
//! - **Label resolution**: configured label ids, or every label in the
//!   account, resolved once per process
//! - **Refresh engine**: one cycle updates `<label>_total`, `<label>_unread`,
//!   `<label>_sender{sender=...}` and one gauge per custom query, isolating
//!   failures per unit of work
//! - **Sender cache**: each thread's first sender is fetched at most once
//! - **Scheduler**: a single cycle, or a cycle every `interval_secs`
//! - **Exposition**: `/metrics` (and `/readyz`) served by axum
//!
//! # Example Usage
//!
//! ```no_run
//! use prometheus_gmail_exporter::{auth, client::ProductionMailClient, config::Config};
//! use prometheus_gmail_exporter::engine::RefreshEngine;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("prometheus-gmail-exporter.toml".as_ref()).await?;
//!
//!     let hub = auth::initialize_gmail_hub(&config.auth).await?;
//!     let client = Arc::new(ProductionMailClient::new(hub, (&config.api).into()));
//!
//!     let registry = prometheus::Registry::new();
//!     let mut engine = RefreshEngine::from_config(&config, client, registry.clone());
//!     engine.run_cycle().await;
//!
//!     println!("{}", prometheus_gmail_exporter::metrics::render_registry(&registry)?);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 credential provider and Gmail hub construction
//! - [`client`] - Gmail API client with timeouts and retries
//! - [`cli`] - Command-line interface
//! - [`config`] - Configuration management
//! - [`engine`] - Refresh cycle orchestration
//! - [`error`] - Error types and result aliases
//! - [`labels`] - Monitored label resolution
//! - [`metrics`] - Gauge registry
//! - [`models`] - Core data structures
//! - [`readiness`] - Readiness state shared with the HTTP server
//! - [`scheduler`] - Foreground and daemon scheduling
//! - [`senders`] - Thread sender cache
//! - [`server`] - HTTP exposition

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod labels;
pub mod metrics;
pub mod models;
pub mod readiness;
pub mod scheduler;
pub mod senders;
pub mod server;

// Re-export commonly used types for convenience
pub use error::{ExporterError, Result};

pub use models::{
    CustomQuery, CycleReport, LabelDetail, LabelInfo, ThreadDetail, ThreadPage, UnitOutcome,
};

pub use config::Config;

pub use client::{MailClient, ProductionMailClient};

pub use engine::{EngineOptions, RefreshEngine};
pub use labels::LabelResolver;
pub use metrics::{GaugeHandle, MetricRegistry};
pub use readiness::{Readiness, ReadinessHandle};
pub use scheduler::{ScheduleMode, Scheduler};
pub use senders::SenderCache;
