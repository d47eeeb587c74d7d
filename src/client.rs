//! Gmail API client used by the refresh engine

use async_trait::async_trait;
use google_gmail1::api::{Label, ListThreadsResponse, Thread};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::auth::{GmailHub, READONLY_SCOPE};
use crate::error::{ExporterError, Result};
use crate::models::{LabelDetail, LabelInfo, MessageHeader, MessageHeaders, ThreadDetail, ThreadPage};

/// Mail account operations the exporter depends on
#[async_trait]
pub trait MailClient: Send + Sync {
    /// List all labels in the account
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// Get a label with its thread totals; `NotFound` if it no longer exists
    async fn get_label(&self, label_id: &str) -> Result<LabelDetail>;

    /// Fetch one page of threads under a label matching a query
    async fn list_threads(
        &self,
        label_id: &str,
        query: &str,
        page_token: Option<String>,
    ) -> Result<ThreadPage>;

    /// Get the message headers of a thread
    async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetail>;

    /// Approximate number of messages matching a search query
    async fn search(&self, query: &str) -> Result<u64>;
}

#[async_trait]
impl<C: MailClient + ?Sized> MailClient for Arc<C> {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        self.as_ref().list_labels().await
    }

    async fn get_label(&self, label_id: &str) -> Result<LabelDetail> {
        self.as_ref().get_label(label_id).await
    }

    async fn list_threads(
        &self,
        label_id: &str,
        query: &str,
        page_token: Option<String>,
    ) -> Result<ThreadPage> {
        self.as_ref().list_threads(label_id, query, page_token).await
    }

    async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetail> {
        self.as_ref().get_thread(thread_id).await
    }

    async fn search(&self, query: &str) -> Result<u64> {
        self.as_ref().search(query).await
    }
}

/// Settings for request timeouts, retries and concurrency
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub max_concurrent: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_retries: 2,
            max_concurrent: 10,
        }
    }
}

impl From<&crate::config::ApiConfig> for ClientOptions {
    fn from(api: &crate::config::ApiConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(api.request_timeout_secs),
            max_retries: api.max_retries,
            max_concurrent: api.max_concurrent_requests,
        }
    }
}

/// Production Gmail client
///
/// Every call is bounded by a timeout, retried with exponential backoff on
/// transient errors, and gated by a semaphore.
pub struct ProductionMailClient {
    hub: GmailHub,
    rate_limiter: Arc<Semaphore>,
    options: ClientOptions,
}

impl ProductionMailClient {
    pub fn new(hub: GmailHub, options: ClientOptions) -> Self {
        Self {
            hub,
            rate_limiter: Arc::new(Semaphore::new(options.max_concurrent.max(1))),
            options,
        }
    }

    /// Check if an error is retryable
    fn should_retry(error: &ExporterError) -> bool {
        error.is_transient()
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(
        operation_name: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if Self::should_retry(&e) && attempts <= max_retries => {
                    // Honour the server's hint when it is longer than our own delay
                    if let ExporterError::RateLimitExceeded { retry_after } = &e {
                        delay = delay.max(Duration::from_secs(*retry_after));
                    }
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run one API call under the semaphore and the request timeout
    async fn call<T, Fut>(&self, operation_name: &str, api_call: Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = std::result::Result<T, google_gmail1::Error>>,
    {
        let _permit = self.rate_limiter.acquire().await.map_err(|e| {
            ExporterError::Unknown(format!("Failed to acquire rate limit permit: {}", e))
        })?;

        debug!("Calling Gmail API: {}", operation_name);
        match tokio::time::timeout(self.options.request_timeout, api_call).await {
            Ok(result) => result.map_err(ExporterError::from),
            Err(_) => {
                warn!(
                    "Gmail API {} call timed out after {:?}",
                    operation_name, self.options.request_timeout
                );
                Err(ExporterError::NetworkError(format!(
                    "API call timed out after {:?}",
                    self.options.request_timeout
                )))
            }
        }
    }
}

/// Convert an API label into our detail type; missing fields are upstream garbage
fn parse_label_detail(label: Label) -> Result<LabelDetail> {
    let id = label
        .id
        .ok_or_else(|| ExporterError::InvalidResponse("Label without id".to_string()))?;
    let name = label.name.unwrap_or_else(|| id.clone());

    let threads_total = label.threads_total.ok_or_else(|| {
        ExporterError::InvalidResponse(format!("Label {} is missing threadsTotal", id))
    })?;
    let threads_unread = label.threads_unread.ok_or_else(|| {
        ExporterError::InvalidResponse(format!("Label {} is missing threadsUnread", id))
    })?;

    let threads_total = u64::try_from(threads_total).map_err(|_| {
        ExporterError::InvalidResponse(format!(
            "Label {} has negative threadsTotal {}",
            id, threads_total
        ))
    })?;
    let threads_unread = u64::try_from(threads_unread).map_err(|_| {
        ExporterError::InvalidResponse(format!(
            "Label {} has negative threadsUnread {}",
            id, threads_unread
        ))
    })?;

    Ok(LabelDetail {
        id,
        name,
        threads_total,
        threads_unread,
    })
}

fn parse_thread_page(response: ListThreadsResponse) -> ThreadPage {
    ThreadPage {
        thread_ids: response
            .threads
            .unwrap_or_default()
            .into_iter()
            .filter_map(|thread| thread.id)
            .collect(),
        next_page_token: response.next_page_token.filter(|token| !token.is_empty()),
        result_size_estimate: response.result_size_estimate.map(u64::from).unwrap_or(0),
    }
}

fn parse_thread_detail(thread_id: &str, thread: Thread) -> ThreadDetail {
    let messages = thread
        .messages
        .unwrap_or_default()
        .into_iter()
        .map(|message| MessageHeaders {
            headers: message
                .payload
                .and_then(|payload| payload.headers)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|header| match (header.name, header.value) {
                    (Some(name), Some(value)) => Some(MessageHeader { name, value }),
                    _ => None,
                })
                .collect(),
        })
        .collect();

    ThreadDetail {
        id: thread.id.unwrap_or_else(|| thread_id.to_string()),
        messages,
    }
}

#[async_trait]
impl MailClient for ProductionMailClient {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        Self::with_retry("list_labels", self.options.max_retries, || async {
            let (_, response) = self
                .call(
                    "labels.list",
                    self.hub
                        .users()
                        .labels_list("me")
                        .add_scope(READONLY_SCOPE)
                        .doit(),
                )
                .await?;

            let labels: Vec<LabelInfo> = response
                .labels
                .unwrap_or_default()
                .into_iter()
                .filter_map(|label| match (label.id, label.name) {
                    (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                    _ => None,
                })
                .collect();

            debug!("Successfully parsed {} labels", labels.len());
            Ok(labels)
        })
        .await
    }

    async fn get_label(&self, label_id: &str) -> Result<LabelDetail> {
        Self::with_retry("get_label", self.options.max_retries, || async {
            let (_, label) = self
                .call(
                    "labels.get",
                    self.hub
                        .users()
                        .labels_get("me", label_id)
                        .add_scope(READONLY_SCOPE)
                        .doit(),
                )
                .await
                .map_err(|e| match e {
                    ExporterError::NotFound(_) => {
                        ExporterError::NotFound(format!("Label {}", label_id))
                    }
                    other => other,
                })?;

            parse_label_detail(label)
        })
        .await
    }

    async fn list_threads(
        &self,
        label_id: &str,
        query: &str,
        page_token: Option<String>,
    ) -> Result<ThreadPage> {
        Self::with_retry("list_threads", self.options.max_retries, || async {
            let mut request = self
                .hub
                .users()
                .threads_list("me")
                .add_label_ids(label_id)
                .q(query);

            if let Some(token) = page_token.as_deref() {
                request = request.page_token(token);
            }

            let (_, response) = self
                .call("threads.list", request.add_scope(READONLY_SCOPE).doit())
                .await?;

            Ok(parse_thread_page(response))
        })
        .await
    }

    async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetail> {
        Self::with_retry("get_thread", self.options.max_retries, || async {
            let (_, thread) = self
                .call(
                    "threads.get",
                    self.hub
                        .users()
                        .threads_get("me", thread_id)
                        .format("metadata")
                        .add_metadata_headers("From")
                        .add_scope(READONLY_SCOPE)
                        .doit(),
                )
                .await?;

            Ok(parse_thread_detail(thread_id, thread))
        })
        .await
    }

    async fn search(&self, query: &str) -> Result<u64> {
        Self::with_retry("search", self.options.max_retries, || async {
            // Only the estimate is used, so one result is enough
            let (_, response) = self
                .call(
                    "messages.list",
                    self.hub
                        .users()
                        .messages_list("me")
                        .q(query)
                        .max_results(1)
                        .add_scope(READONLY_SCOPE)
                        .doit(),
                )
                .await?;

            Ok(response.result_size_estimate.map(u64::from).unwrap_or(0))
        })
        .await
    }
}
