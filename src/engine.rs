//! Refresh engine: one pass over labels, sender breakdowns and custom queries
//!
//! A cycle never fails outward. Every label, sender aggregation and custom
//! query is an independent unit: its error is logged, recorded in the
//! [`CycleReport`] and the cycle moves on. Gauges whose source keeps failing
//! simply go stale at their last value. The one exception is an account with
//! no labels to export: that error is kept and halts the scheduler.

use prometheus::Registry;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::client::MailClient;
use crate::config::Config;
use crate::error::{ExporterError, Result};
use crate::labels::LabelResolver;
use crate::metrics::{MetricRegistry, SENDER_DIMENSION};
use crate::models::{CustomQuery, CycleReport, LabelDetail, UnitOutcome};
use crate::readiness::{Readiness, ReadinessHandle};
use crate::senders::SenderCache;

/// Thread search used for sender aggregation
pub const UNREAD_QUERY: &str = "is:unread";

const SENDER_DESCRIPTION: &str = "Label sender info";

/// Behavioural switches of the engine
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Labels (by id) that also get a per-sender unread breakdown
    pub sender_count_labels: Vec<String>,
    pub custom_queries: Vec<CustomQuery>,
    /// Drop a label's previous sender series before writing new counts
    pub zero_absent_senders: bool,
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            sender_count_labels: config.labels.sender_count.clone(),
            custom_queries: config.custom_queries.clone(),
            zero_absent_senders: config.metrics.zero_absent_senders,
        }
    }
}

pub struct RefreshEngine {
    client: Arc<dyn MailClient>,
    labels: LabelResolver,
    senders: SenderCache,
    metrics: MetricRegistry,
    sender_count_labels: HashSet<String>,
    custom_queries: Vec<CustomQuery>,
    zero_absent_senders: bool,
    readiness: ReadinessHandle,
    fatal: Option<ExporterError>,
}

impl RefreshEngine {
    pub fn new(
        client: Arc<dyn MailClient>,
        labels: LabelResolver,
        senders: SenderCache,
        metrics: MetricRegistry,
        options: EngineOptions,
    ) -> Self {
        Self {
            client,
            labels,
            senders,
            metrics,
            sender_count_labels: options.sender_count_labels.into_iter().collect(),
            custom_queries: options.custom_queries,
            zero_absent_senders: options.zero_absent_senders,
            readiness: ReadinessHandle::new(Readiness::Refreshing),
            fatal: None,
        }
    }

    /// Wire an engine from configuration, writing gauges into `registry`
    pub fn from_config(config: &Config, client: Arc<dyn MailClient>, registry: Registry) -> Self {
        Self::new(
            client,
            LabelResolver::new(config.labels.include.clone()),
            SenderCache::with_capacity(config.metrics.sender_cache_capacity),
            MetricRegistry::with_registry(config.metrics.namespace.clone(), registry),
            EngineOptions::from(config),
        )
    }

    /// Report readiness transitions through `handle`
    pub fn with_readiness(mut self, handle: ReadinessHandle) -> Self {
        self.readiness = handle;
        self
    }

    pub fn metrics(&self) -> &MetricRegistry {
        &self.metrics
    }

    pub fn sender_cache(&self) -> &SenderCache {
        &self.senders
    }

    /// Resolve the label set up front so an empty account fails at startup
    ///
    /// Returns the number of monitored labels.
    pub async fn prepare(&mut self) -> Result<usize> {
        self.readiness.set(Readiness::Refreshing);
        let labels = self.labels.resolve(self.client.as_ref()).await?;
        Ok(labels.len())
    }

    /// Whether a cycle hit an error that further cycles cannot fix
    pub fn is_halted(&self) -> bool {
        self.fatal.is_some()
    }

    /// Take the error that halted the engine, if any
    pub fn take_fatal_error(&mut self) -> Option<ExporterError> {
        self.fatal.take()
    }

    /// Run one cycle, logging its outcome
    pub async fn run_cycle(&mut self) {
        self.readiness.set(Readiness::Refreshing);
        let report = self.refresh().await;
        self.readiness.set(Readiness::Ready);

        if report.fatal {
            error!(
                cycle_id = %report.cycle_id,
                "Refresh cycle aborted, no further cycles will run"
            );
        } else if report.is_clean() {
            info!(
                cycle_id = %report.cycle_id,
                duration_ms = report.duration_ms(),
                "Refresh cycle complete"
            );
        } else {
            warn!(
                cycle_id = %report.cycle_id,
                duration_ms = report.duration_ms(),
                failures = report.failures(),
                "Refresh cycle complete with failures"
            );
        }
    }

    /// Run one cycle and return what happened to each unit of work
    pub async fn refresh(&mut self) -> CycleReport {
        let mut report = CycleReport::new();
        let span = info_span!("refresh_cycle", cycle_id = %report.cycle_id);

        self.refresh_units(&mut report).instrument(span).await;

        report.finish();
        report
    }

    async fn refresh_units(&mut self, report: &mut CycleReport) {
        info!("Starting refresh cycle");

        let labels = match self.labels.resolve(self.client.as_ref()).await {
            Ok(labels) => labels.to_vec(),
            Err(e) => {
                error!("Could not resolve labels, skipping cycle: {}", e);
                report.resolution_error = Some(e.to_string());
                if e.is_fatal() {
                    report.fatal = true;
                    self.fatal = Some(e);
                }
                return;
            }
        };

        for label_id in &labels {
            match self.update_label(label_id).await {
                Ok(detail) => {
                    debug!(
                        "{}: {} total, {} unread",
                        label_id, detail.threads_total, detail.threads_unread
                    );
                    report.labels.push((label_id.clone(), UnitOutcome::Updated));
                }
                Err(e) => {
                    error!("Failed to refresh label {}: {}", label_id, e);
                    report
                        .labels
                        .push((label_id.clone(), UnitOutcome::Failed(e.to_string())));
                    continue;
                }
            }

            if self.sender_count_labels.contains(label_id) {
                let outcome = match self.aggregate_senders(label_id).await {
                    Ok(distinct) => {
                        debug!("{}: {} distinct unread senders", label_id, distinct);
                        UnitOutcome::Updated
                    }
                    Err(e) => {
                        error!("Failed to aggregate senders for {}: {}", label_id, e);
                        UnitOutcome::Failed(e.to_string())
                    }
                };
                report.sender_aggregations.push((label_id.clone(), outcome));
            }
        }

        let queries = self.custom_queries.clone();
        for query in &queries {
            let outcome = match self.update_custom_query(query).await {
                Ok(estimate) => {
                    debug!("Custom query {}: {}", query.name, estimate);
                    UnitOutcome::Updated
                }
                Err(e) => {
                    error!("Failed to run custom query {}: {}", query.name, e);
                    UnitOutcome::Failed(e.to_string())
                }
            };
            report.custom_queries.push((query.name.clone(), outcome));
        }
    }

    async fn update_label(&mut self, label_id: &str) -> Result<LabelDetail> {
        let detail = self.client.get_label(label_id).await?;

        self.metrics
            .get_or_create(
                &format!("{}_total", label_id),
                &format!("{} Total", detail.name),
                &[],
            )?
            .set(detail.threads_total as f64)?;

        self.metrics
            .get_or_create(
                &format!("{}_unread", label_id),
                &format!("{} Unread", detail.name),
                &[],
            )?
            .set(detail.threads_unread as f64)?;

        Ok(detail)
    }

    /// Count unread threads of `label_id` by first sender
    ///
    /// Returns the number of distinct senders seen. Any failed page or
    /// thread fetch fails the whole aggregation and leaves the gauge as it
    /// was.
    async fn aggregate_senders(&mut self, label_id: &str) -> Result<usize> {
        info!(
            "Listing unread threads for {} to count senders, this can be expensive",
            label_id
        );

        let thread_ids = self.list_unread_threads(label_id).await?;

        let mut tally: BTreeMap<String, u64> = BTreeMap::new();
        let client = &self.client;
        for thread_id in &thread_ids {
            let sender = self
                .senders
                .resolve_sender(thread_id, || client.get_thread(thread_id))
                .await?;
            *tally.entry(sender).or_default() += 1;
        }

        let gauge = self.metrics.get_or_create(
            &format!("{}_sender", label_id),
            SENDER_DESCRIPTION,
            &[SENDER_DIMENSION],
        )?;

        if self.zero_absent_senders {
            gauge.reset();
        }
        for (sender, count) in &tally {
            gauge.set_for(sender, *count as f64)?;
        }

        Ok(tally.len())
    }

    async fn list_unread_threads(&self, label_id: &str) -> Result<Vec<String>> {
        let mut thread_ids = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .client
                .list_threads(label_id, UNREAD_QUERY, page_token.clone())
                .await?;
            pages += 1;
            thread_ids.extend(page.thread_ids);

            match page.next_page_token {
                Some(next) if page_token.as_deref() == Some(next.as_str()) => {
                    return Err(ExporterError::InvalidResponse(format!(
                        "thread listing for {} repeated page token {}",
                        label_id, next
                    )));
                }
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!(
            "{}: {} unread threads over {} pages",
            label_id,
            thread_ids.len(),
            pages
        );
        Ok(thread_ids)
    }

    async fn update_custom_query(&mut self, query: &CustomQuery) -> Result<u64> {
        let estimate = self.client.search(&query.query).await?;

        self.metrics
            .get_or_create(&query.name, &query.name, &[])?
            .set(estimate as f64)?;

        Ok(estimate)
    }
}
