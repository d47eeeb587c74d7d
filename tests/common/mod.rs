//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use prometheus_gmail_exporter::client::MailClient;
use prometheus_gmail_exporter::engine::{EngineOptions, RefreshEngine};
use prometheus_gmail_exporter::error::{ExporterError, Result};
use prometheus_gmail_exporter::labels::LabelResolver;
use prometheus_gmail_exporter::metrics::MetricRegistry;
use prometheus_gmail_exporter::models::{
    CustomQuery, LabelDetail, LabelInfo, MessageHeader, MessageHeaders, ThreadDetail, ThreadPage,
};
use prometheus_gmail_exporter::senders::SenderCache;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const PAGE_TOKEN_PREFIX: &str = "page-";

/// In-memory mailbox standing in for the Gmail API
#[derive(Default)]
pub struct FakeMailClient {
    labels: Mutex<Vec<LabelDetail>>,
    failing_labels: Mutex<HashSet<String>>,
    unread_pages: Mutex<HashMap<String, Vec<Vec<String>>>>,
    threads: Mutex<HashMap<String, ThreadDetail>>,
    failing_threads: Mutex<HashSet<String>>,
    searches: Mutex<HashMap<String, u64>>,
    list_labels_calls: AtomicUsize,
    list_threads_calls: AtomicUsize,
    get_thread_calls: AtomicUsize,
}

impl FakeMailClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(self, id: &str, name: &str, total: u64, unread: u64) -> Self {
        self.set_label(id, name, total, unread);
        self
    }

    /// Unread threads of `label_id`, one inner vec per page of `(thread id, sender)`
    pub fn with_unread_pages(self, label_id: &str, pages: Vec<Vec<(&str, &str)>>) -> Self {
        self.set_unread_pages(label_id, pages);
        self
    }

    pub fn with_search(self, query: &str, estimate: u64) -> Self {
        self.searches
            .lock()
            .unwrap()
            .insert(query.to_string(), estimate);
        self
    }

    /// Register a thread verbatim; later page setup keeps it as is
    pub fn with_thread(self, thread: ThreadDetail) -> Self {
        self.threads
            .lock()
            .unwrap()
            .insert(thread.id.clone(), thread);
        self
    }

    pub fn with_failing_label(self, id: &str) -> Self {
        self.fail_label(id);
        self
    }

    pub fn with_failing_thread(self, id: &str) -> Self {
        self.failing_threads.lock().unwrap().insert(id.to_string());
        self
    }

    pub fn set_label(&self, id: &str, name: &str, total: u64, unread: u64) {
        let mut labels = self.labels.lock().unwrap();
        labels.retain(|label| label.id != id);
        labels.push(LabelDetail {
            id: id.to_string(),
            name: name.to_string(),
            threads_total: total,
            threads_unread: unread,
        });
    }

    pub fn remove_label(&self, id: &str) {
        self.labels.lock().unwrap().retain(|label| label.id != id);
    }

    pub fn fail_label(&self, id: &str) {
        self.failing_labels.lock().unwrap().insert(id.to_string());
    }

    pub fn set_unread_pages(&self, label_id: &str, pages: Vec<Vec<(&str, &str)>>) {
        let mut threads = self.threads.lock().unwrap();
        let page_ids: Vec<Vec<String>> = pages
            .into_iter()
            .map(|page| {
                page.into_iter()
                    .map(|(thread_id, sender)| {
                        threads
                            .entry(thread_id.to_string())
                            .or_insert_with(|| thread_from(thread_id, sender));
                        thread_id.to_string()
                    })
                    .collect::<Vec<String>>()
            })
            .collect();

        self.unread_pages
            .lock()
            .unwrap()
            .insert(label_id.to_string(), page_ids);
    }

    pub fn list_labels_calls(&self) -> usize {
        self.list_labels_calls.load(Ordering::SeqCst)
    }

    pub fn list_threads_calls(&self) -> usize {
        self.list_threads_calls.load(Ordering::SeqCst)
    }

    pub fn get_thread_calls(&self) -> usize {
        self.get_thread_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailClient for FakeMailClient {
    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        self.list_labels_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .labels
            .lock()
            .unwrap()
            .iter()
            .map(|label| LabelInfo {
                id: label.id.clone(),
                name: label.name.clone(),
            })
            .collect())
    }

    async fn get_label(&self, label_id: &str) -> Result<LabelDetail> {
        if self.failing_labels.lock().unwrap().contains(label_id) {
            return Err(ExporterError::ServerError {
                status: 500,
                message: format!("backend error for {}", label_id),
            });
        }

        self.labels
            .lock()
            .unwrap()
            .iter()
            .find(|label| label.id == label_id)
            .cloned()
            .ok_or_else(|| ExporterError::NotFound(format!("Label {}", label_id)))
    }

    async fn list_threads(
        &self,
        label_id: &str,
        _query: &str,
        page_token: Option<String>,
    ) -> Result<ThreadPage> {
        self.list_threads_calls.fetch_add(1, Ordering::SeqCst);

        let index = match page_token {
            None => 0,
            Some(token) => token
                .strip_prefix(PAGE_TOKEN_PREFIX)
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| ExporterError::BadRequest(format!("bad page token {}", token)))?,
        };

        let pages = self.unread_pages.lock().unwrap();
        let Some(pages) = pages.get(label_id) else {
            return Ok(ThreadPage::default());
        };

        let thread_ids = pages.get(index).cloned().unwrap_or_default();
        let next_page_token = if index + 1 < pages.len() {
            Some(format!("{}{}", PAGE_TOKEN_PREFIX, index + 1))
        } else {
            None
        };

        Ok(ThreadPage {
            thread_ids,
            next_page_token,
            result_size_estimate: pages.iter().map(Vec::len).sum::<usize>() as u64,
        })
    }

    async fn get_thread(&self, thread_id: &str) -> Result<ThreadDetail> {
        self.get_thread_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_threads.lock().unwrap().contains(thread_id) {
            return Err(ExporterError::NetworkError("connection reset".to_string()));
        }

        self.threads
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .ok_or_else(|| ExporterError::NotFound(format!("Thread {}", thread_id)))
    }

    async fn search(&self, query: &str) -> Result<u64> {
        self.searches
            .lock()
            .unwrap()
            .get(query)
            .copied()
            .ok_or_else(|| ExporterError::BadRequest(format!("Invalid query {}", query)))
    }
}

/// Thread whose first message is from `sender`
pub fn thread_from(id: &str, sender: &str) -> ThreadDetail {
    ThreadDetail {
        id: id.to_string(),
        messages: vec![MessageHeaders {
            headers: vec![
                MessageHeader {
                    name: "Subject".to_string(),
                    value: format!("Subject of {}", id),
                },
                MessageHeader {
                    name: "From".to_string(),
                    value: sender.to_string(),
                },
            ],
        }],
    }
}

pub fn custom_query(name: &str, query: &str) -> CustomQuery {
    CustomQuery {
        name: name.to_string(),
        query: query.to_string(),
    }
}

/// Engine over `client` with the `gmail` namespace and an unbounded sender cache
pub fn build_engine(
    client: Arc<FakeMailClient>,
    labels: &[&str],
    options: EngineOptions,
) -> RefreshEngine {
    RefreshEngine::new(
        client,
        LabelResolver::new(labels.iter().map(|label| label.to_string()).collect()),
        SenderCache::unbounded(),
        MetricRegistry::new("gmail"),
        options,
    )
}

/// Options that count senders for `labels`
pub fn sender_options(labels: &[&str]) -> EngineOptions {
    EngineOptions {
        sender_count_labels: labels.iter().map(|label| label.to_string()).collect(),
        ..Default::default()
    }
}

/// Rendered exposition text of the engine's registry
pub fn scrape(engine: &RefreshEngine) -> String {
    engine
        .metrics()
        .render()
        .expect("registry renders as text")
}
