//! Session accountant: reasoning usage per thread, flushed once.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::fallback;
use super::state::{ConversationThread, SessionUsage};
use crate::llm::TokenUsage;
use crate::llm::costs;

/// One completed session in the usage log.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRecord {
    pub client_id: String,
    pub duration_seconds: f64,
    pub input_units: u64,
    pub output_units: u64,
}

impl std::fmt::Display for UsageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | {:.2} | {} | {}",
            self.client_id, self.duration_seconds, self.input_units, self.output_units
        )
    }
}

/// Destination for usage records.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn append(&self, record: &UsageRecord) -> std::io::Result<()>;
}

/// Append-only text file, one record per line.
pub struct FileUsageLog {
    path: PathBuf,
}

impl FileUsageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl UsageSink for FileUsageLog {
    async fn append(&self, record: &UsageRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{record}\n").as_bytes()).await?;
        file.flush().await
    }
}

pub struct SessionAccountant {
    sink: Arc<dyn UsageSink>,
    costs: (Decimal, Decimal),
}

impl SessionAccountant {
    pub fn new(sink: Arc<dyn UsageSink>, costs: (Decimal, Decimal)) -> Self {
        Self { sink, costs }
    }

    /// Add one reasoner invocation to the thread's counters.
    pub fn record(usage: &mut SessionUsage, tokens: TokenUsage) {
        if usage.started_at.is_none() {
            usage.started_at = Some(Utc::now());
        }
        usage.reasoner_calls += 1;
        usage.input_units += u64::from(tokens.input_tokens);
        usage.output_units += u64::from(tokens.output_tokens);
    }

    /// Write the usage record once a dispatched conversation says goodbye.
    /// Returns whether a record was written on this call.
    pub async fn maybe_flush(&self, thread: &mut ConversationThread, inbound: &str) -> bool {
        let usage = &thread.usage;
        if usage.flushed || !usage.dispatch_executed || !fallback::is_farewell(inbound) {
            return false;
        }

        let started = usage.started_at.unwrap_or(thread.created_at);
        let elapsed = Utc::now() - started;
        let record = UsageRecord {
            client_id: thread.client_id.clone(),
            duration_seconds: elapsed.num_milliseconds().max(0) as f64 / 1000.0,
            input_units: usage.input_units,
            output_units: usage.output_units,
        };

        match self.sink.append(&record).await {
            Ok(()) => {
                thread.usage.flushed = true;
                let cost = costs::estimate(self.costs, record.input_units, record.output_units);
                info!(
                    thread_id = %thread.thread_id,
                    input_units = record.input_units,
                    output_units = record.output_units,
                    estimated_cost = %cost,
                    "Session usage flushed"
                );
                true
            }
            Err(e) => {
                // Left unflushed so a later farewell can try again.
                warn!(thread_id = %thread.thread_id, "Failed to write usage record: {e}");
                false
            }
        }
    }
}
