//! Statistics counters: a fire-and-forget bounded queue feeding a
//! time-bucketed counter store, per the asynchronous-counters design
//! note -- failures here never affect request success.

use chrono::{DateTime, Datelike, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bucket {
    Day,
    Week,
}

fn bucket_start(ts: DateTime<Utc>, bucket: Bucket) -> DateTime<Utc> {
    let date = ts.date_naive();
    let truncated = match bucket {
        Bucket::Day => date,
        Bucket::Week => date - Duration::days(date.weekday().num_days_from_monday() as i64),
    };
    truncated.and_hms_opt(0, 0, 0).unwrap().and_utc()
}

#[derive(Default)]
struct Counters {
    // key -> bucket-start (day granularity) -> count
    by_key: BTreeMap<Vec<String>, BTreeMap<DateTime<Utc>, u64>>,
}

struct Increment {
    key: Vec<String>,
    at: DateTime<Utc>,
}

pub struct StatsCollector {
    counters: Arc<RwLock<Counters>>,
    sender: mpsc::Sender<Increment>,
}

impl StatsCollector {
    pub fn new(capacity: usize) -> Self {
        let counters = Arc::new(RwLock::new(Counters::default()));
        let (sender, mut receiver) = mpsc::channel::<Increment>(capacity);
        let worker_counters = counters.clone();
        tokio::spawn(async move {
            while let Some(inc) = receiver.recv().await {
                let mut guard = worker_counters.write().await;
                let day = bucket_start(inc.at, Bucket::Day);
                *guard
                    .by_key
                    .entry(inc.key)
                    .or_default()
                    .entry(day)
                    .or_insert(0) += 1;
            }
        });
        Self { counters, sender }
    }

    /// Enqueue an increment for `key` at the current time. Never blocks
    /// the caller on a full queue -- drops the oldest-style by simply
    /// failing to send and logging, per the bounded-queue design note.
    pub fn increment(&self, key: Vec<String>) {
        self.increment_at(key, Utc::now());
    }

    pub fn increment_at(&self, key: Vec<String>, at: DateTime<Utc>) {
        let key_for_log = key.clone();
        if self.sender.try_send(Increment { key, at }).is_err() {
            warn!(key = ?key_for_log, "stats queue full, dropping increment");
        }
    }

    /// Sum of all buckets for an exact key.
    pub async fn total(&self, key: &[String]) -> u64 {
        self.counters
            .read()
            .await
            .by_key
            .get(key)
            .map(|buckets| buckets.values().sum())
            .unwrap_or(0)
    }

    /// Keys matching `prefix`, each with its total count, for the
    /// `list=1` / trailing-`:*` wildcard query form.
    pub async fn list_by_prefix(&self, prefix: &[String]) -> Vec<(Vec<String>, u64)> {
        self.counters
            .read()
            .await
            .by_key
            .iter()
            .filter(|(k, _)| k.len() >= prefix.len() && k[..prefix.len()] == *prefix)
            .map(|(k, buckets)| (k.clone(), buckets.values().sum()))
            .collect()
    }

    /// Per-bucket breakdown for an exact key within `[start, stop]`.
    pub async fn buckets(
        &self,
        key: &[String],
        bucket: Bucket,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> Vec<(DateTime<Utc>, u64)> {
        let guard = self.counters.read().await;
        let Some(daily) = guard.by_key.get(key) else {
            return vec![];
        };
        let mut merged: BTreeMap<DateTime<Utc>, u64> = BTreeMap::new();
        for (day, count) in daily {
            if *day < start || *day > stop {
                continue;
            }
            let bucket_key = bucket_start(*day, bucket);
            *merged.entry(bucket_key).or_insert(0) += count;
        }
        merged.into_iter().collect()
    }

    /// Bulk ingest for `PUT stats/update`, used to backfill counts from
    /// an external import without going through the normal enqueue path
    /// (so a huge backfill cannot itself overflow the live queue).
    pub async fn bulk_update(&self, entries: Vec<(Vec<String>, u64, DateTime<Utc>)>) {
        let mut guard = self.counters.write().await;
        for (key, count, at) in entries {
            let day = bucket_start(at, Bucket::Day);
            *guard.by_key.entry(key).or_default().entry(day).or_insert(0) += count;
        }
    }
}

pub type SharedStats = Arc<StatsCollector>;

/// Upload-stats key: (series, name, user). Revision is deliberately
/// excluded -- each revision uploads exactly once.
pub fn upload_key(series: &str, name: &str, user: Option<&str>) -> Vec<String> {
    vec![
        "upload".to_string(),
        series.to_string(),
        name.to_string(),
        user.unwrap_or("").to_string(),
    ]
}

pub fn failed_upload_key(series: &str, name: &str, user: Option<&str>) -> Vec<String> {
    let mut key = upload_key(series, name, user);
    key[0] = "upload-failed".to_string();
    key
}

/// Download-stats key: (series, name, user, revision).
pub fn download_key(series: &str, name: &str, user: Option<&str>, revision: i64) -> Vec<String> {
    vec![
        "download".to_string(),
        series.to_string(),
        name.to_string(),
        user.unwrap_or("").to_string(),
        revision.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn increment_then_total_reflects_count() {
        let stats = StatsCollector::new(16);
        let key = upload_key("precise", "wordpress", Some("charmers"));
        stats.increment(key.clone());
        stats.increment(key.clone());
        // give the background worker a tick to drain the channel
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(stats.total(&key).await, 2);
    }

    #[tokio::test]
    async fn list_by_prefix_finds_wildcarded_keys() {
        let stats = StatsCollector::new(16);
        stats.increment(download_key("precise", "wordpress", Some("charmers"), 0));
        stats.increment(download_key("precise", "wordpress", Some("charmers"), 1));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let matches = stats
            .list_by_prefix(&["download".to_string(), "precise".to_string(), "wordpress".to_string()])
            .await;
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn bulk_update_backfills_without_the_queue() {
        let stats = StatsCollector::new(1);
        let key = vec!["download".to_string(), "precise".to_string()];
        stats
            .bulk_update(vec![(key.clone(), 5, Utc::now())])
            .await;
        assert_eq!(stats.total(&key).await, 5);
    }

    #[test]
    fn upload_key_excludes_revision() {
        let a = upload_key("precise", "wordpress", Some("charmers"));
        assert_eq!(a.len(), 4);
        assert!(!a.iter().any(|s| s == "0"));
    }
}
