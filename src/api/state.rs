//! Shared application state: the `Arc<dyn Trait>` collaborators every
//! route handler needs, assembled once at startup and cloned cheaply
//! per request.

use crate::config::Config;
use crate::logstore::{InMemoryLogStore, LogStore};
use crate::search::{InMemorySearchIndex, SearchIndex};
use crate::stats::StatsCollector;
use crate::storage::{BlobStore, FilesystemBlobStore, InMemoryBlobStore};
use crate::store::{EntityStore, InMemoryEntityStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub entities: Arc<dyn EntityStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub search: Arc<dyn SearchIndex>,
    pub logs: Arc<dyn LogStore>,
    pub stats: Arc<StatsCollector>,
    pub config: Arc<Config>,
    pub http: Arc<reqwest::Client>,
}

impl AppState {
    /// All in-memory collaborators, built from [`Config::from_defaults`].
    pub fn new() -> Self {
        Self::with_config(Config::from_defaults())
    }

    /// Builds the default collaborator set for `config`: a filesystem
    /// blob store when `storage_path` is set, in-memory otherwise, with
    /// every other subsystem in-memory.
    pub fn with_config(config: Config) -> Self {
        let blobs: Arc<dyn BlobStore> = match &config.storage_path {
            Some(path) => Arc::new(FilesystemBlobStore::new(path.clone())),
            None => Arc::new(InMemoryBlobStore::new()),
        };
        let stats_capacity = config.stats_queue_capacity;
        Self {
            entities: Arc::new(InMemoryEntityStore::new()),
            blobs,
            search: Arc::new(InMemorySearchIndex::new()),
            logs: Arc::new(InMemoryLogStore::new()),
            stats: Arc::new(StatsCollector::new(stats_capacity)),
            config: Arc::new(config),
            http: Arc::new(reqwest::Client::new()),
        }
    }

    pub fn with_entities(mut self, entities: Arc<dyn EntityStore>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchIndex>) -> Self {
        self.search = search;
        self
    }

    pub fn with_logs(mut self, logs: Arc<dyn LogStore>) -> Self {
        self.logs = logs;
        self
    }

    pub fn with_stats(mut self, stats: Arc<StatsCollector>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_http(mut self, http: Arc<reqwest::Client>) -> Self {
        self.http = http;
        self
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
