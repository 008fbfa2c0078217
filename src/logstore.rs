//! The structured log collection: insertion-ordered entries with a
//! level, a type tag, a timestamp, and the entity references they
//! pertain to. Used by the ingest pipeline to record provenance and by
//! bulk-import tooling via `POST log`.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    Ingestion,
    LegacyStatistics,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    #[serde(rename = "type")]
    pub log_type: LogType,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub urls: Vec<String>,
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn append(&self, entry: LogEntry) -> Result<()>;

    async fn recent(&self, limit: usize, level: Option<LogLevel>) -> Result<Vec<LogEntry>>;
}

#[derive(Default)]
pub struct InMemoryLogStore {
    entries: RwLock<Vec<LogEntry>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn append(&self, entry: LogEntry) -> Result<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn recent(&self, limit: usize, level: Option<LogLevel>) -> Result<Vec<LogEntry>> {
        let guard = self.entries.read().await;
        Ok(guard
            .iter()
            .rev()
            .filter(|e| level.map(|l| e.level == l).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect())
    }
}

pub type SharedLogStore = Arc<dyn LogStore>;

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: LogLevel, message: &str) -> LogEntry {
        LogEntry {
            level,
            log_type: LogType::Ingestion,
            message: message.to_string(),
            timestamp: Utc::now(),
            urls: vec![],
        }
    }

    #[tokio::test]
    async fn recent_returns_in_reverse_insertion_order() {
        let store = InMemoryLogStore::new();
        store.append(entry(LogLevel::Info, "first")).await.unwrap();
        store.append(entry(LogLevel::Info, "second")).await.unwrap();
        let recent = store.recent(10, None).await.unwrap();
        assert_eq!(recent[0].message, "second");
        assert_eq!(recent[1].message, "first");
    }

    #[tokio::test]
    async fn recent_filters_by_level() {
        let store = InMemoryLogStore::new();
        store.append(entry(LogLevel::Info, "info")).await.unwrap();
        store.append(entry(LogLevel::Error, "error")).await.unwrap();
        let errors = store.recent(10, Some(LogLevel::Error)).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "error");
    }
}
