//! Request/response DTOs for the HTTP boundary. Domain types live in
//! their owning modules ([`crate::entity`], [`crate::search`], …); this
//! module only holds shapes that exist purely for the wire format.

use crate::search::SearchDocument;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of the bulk `PUT stats/update` backfill array.
#[derive(Debug, Deserialize)]
pub struct StatsUpdateEntry {
    pub key: String,
    pub count: u64,
    pub timestamp: DateTime<Utc>,
}

/// A single `search`/`list` result row, optionally decorated with a
/// `meta/any`-shaped projection when the caller passed `include=`.
#[derive(Debug, Serialize)]
pub struct SearchResultItem {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Owner", skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(rename = "Series", skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(rename = "Promulgated")]
    pub promulgated: bool,
    #[serde(rename = "Summary")]
    pub summary: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
    #[serde(rename = "Type")]
    pub entity_type: &'static str,
    #[serde(rename = "Downloads")]
    pub downloads: u64,
    #[serde(rename = "Meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl SearchResultItem {
    pub fn from_document(doc: &SearchDocument) -> Self {
        Self {
            id: doc.reference.to_string(),
            name: doc.reference.name.clone(),
            owner: doc.owner.clone(),
            series: doc.reference.series.clone(),
            promulgated: doc.promulgated,
            summary: doc.summary.clone(),
            description: doc.description.clone(),
            tags: doc.tags.clone(),
            entity_type: if doc.is_bundle { "bundle" } else { "charm" },
            downloads: doc.total_downloads,
            meta: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    #[serde(rename = "Results")]
    pub results: Vec<SearchResultItem>,
    #[serde(rename = "Total")]
    pub total: usize,
}
