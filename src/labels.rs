//! Resolution of the label set the exporter monitors

use crate::client::MailClient;
use crate::error::{ExporterError, Result};
use tracing::{info, warn};

/// Computes the monitored label ids once and remembers them
///
/// Configured labels are used verbatim and in order. With no configured
/// labels, every label in the account is discovered with a single listing
/// call. Whatever the first successful resolution returns is kept for the
/// life of the process.
#[derive(Debug, Default)]
pub struct LabelResolver {
    configured: Vec<String>,
    resolved: Option<Vec<String>>,
}

impl LabelResolver {
    pub fn new(configured: Vec<String>) -> Self {
        Self {
            configured,
            resolved: None,
        }
    }

    /// Whether resolution has already happened
    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    /// Return the monitored label ids, resolving them on first use
    ///
    /// Discovery errors are not remembered, so a failed listing is retried
    /// on the next call. An empty discovery result is `NoLabels`.
    pub async fn resolve(&mut self, client: &dyn MailClient) -> Result<&[String]> {
        if self.resolved.is_none() {
            let labels = self.compute(client).await?;
            self.resolved = Some(labels);
        }

        Ok(self.resolved.as_deref().unwrap_or_default())
    }

    async fn compute(&self, client: &dyn MailClient) -> Result<Vec<String>> {
        info!("Getting metadata about labels");

        if !self.configured.is_empty() {
            info!("Using labels: {:?}", self.configured);
            return Ok(self.configured.clone());
        }

        warn!(
            "No labels specified, assuming all labels. \
             If you have a lot of labels you could hit API limits quickly."
        );

        let labels: Vec<String> = client
            .list_labels()
            .await?
            .into_iter()
            .map(|label| label.id)
            .collect();

        if labels.is_empty() {
            return Err(ExporterError::NoLabels);
        }

        info!("Discovered {} labels", labels.len());
        Ok(labels)
    }
}
