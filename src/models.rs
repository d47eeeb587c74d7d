use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sender recorded for a thread that came back without any messages
pub const UNKNOWN_THREAD_NO_MESSAGES: &str = "unknown-thread-no-messages";

/// Sender recorded when the first message carries no `From` header
pub const UNKNOWN_NO_FROM: &str = "unknown-no-from";

/// Label as returned by the label listing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// Label with its aggregate thread counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelDetail {
    pub id: String,
    pub name: String,
    pub threads_total: u64,
    pub threads_unread: u64,
}

/// One page of a thread search
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadPage {
    pub thread_ids: Vec<String>,
    pub next_page_token: Option<String>,
    pub result_size_estimate: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

/// Headers of a single message within a thread
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    pub headers: Vec<MessageHeader>,
}

/// Thread detail, reduced to what sender resolution needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadDetail {
    pub id: String,
    pub messages: Vec<MessageHeaders>,
}

impl ThreadDetail {
    /// Value of the first message's `From` header, or one of the sentinels
    pub fn first_sender(&self) -> String {
        let Some(first) = self.messages.first() else {
            return UNKNOWN_THREAD_NO_MESSAGES.to_string();
        };

        first
            .headers
            .iter()
            .find(|header| header.name == "From")
            .map(|header| header.value.clone())
            .unwrap_or_else(|| UNKNOWN_NO_FROM.to_string())
    }
}

/// Saved search exported as a single gauge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomQuery {
    pub name: String,
    pub query: String,
}

/// Outcome of one unit of work within a refresh cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Updated,
    Failed(String),
}

/// Per-cycle record of what was refreshed; used for logging only
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when the monitored label set could not be resolved this cycle
    pub resolution_error: Option<String>,
    /// The resolution error cannot be recovered from by retrying
    pub fatal: bool,
    pub labels: Vec<(String, UnitOutcome)>,
    pub sender_aggregations: Vec<(String, UnitOutcome)>,
    pub custom_queries: Vec<(String, UnitOutcome)>,
}

impl CycleReport {
    pub fn new() -> Self {
        Self {
            cycle_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            resolution_error: None,
            fatal: false,
            labels: Vec::new(),
            sender_aggregations: Vec::new(),
            custom_queries: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Number of units (labels, sender aggregations, queries) that failed
    pub fn failures(&self) -> usize {
        let resolution = usize::from(self.resolution_error.is_some());
        resolution
            + self
                .labels
                .iter()
                .chain(&self.sender_aggregations)
                .chain(&self.custom_queries)
                .filter(|(_, outcome)| matches!(outcome, UnitOutcome::Failed(_)))
                .count()
    }

    pub fn is_clean(&self) -> bool {
        self.failures() == 0
    }

    pub fn duration_ms(&self) -> i64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
            .unwrap_or_default()
    }
}

impl Default for CycleReport {
    fn default() -> Self {
        Self::new()
    }
}
