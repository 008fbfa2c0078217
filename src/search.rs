//! The search index: indexing writes, user-scoped ACL-aware querying
//! with paging and sorting, and a download-popularity boost.
//!
//! Named as an external collaborator in the system overview; given an
//! in-memory implementation so the crate runs standalone, grounded on
//! the teacher's `unified_search` merge-and-score pattern (score results
//! from multiple match reasons, then sort and paginate).

use crate::entity::EntityPayload;
use crate::error::Result;
use crate::reference::Reference;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
pub struct SearchDocument {
    pub reference: Reference,
    pub owner: Option<String>,
    pub promulgated: bool,
    pub summary: String,
    pub description: String,
    pub tags: Vec<String>,
    pub provides: Vec<String>,
    pub requires: Vec<String>,
    pub is_bundle: bool,
    pub total_downloads: u64,
    pub read_acl: Vec<String>,
}

impl SearchDocument {
    pub fn key(&self) -> String {
        self.reference.to_string()
    }
}

#[derive(Clone, Debug, Default)]
pub struct SearchFilters {
    pub text: Option<String>,
    pub name: Option<String>,
    pub owner: Option<String>,
    pub series: Option<String>,
    pub provides: Option<String>,
    pub requires: Option<String>,
    pub tags: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub entity_type: Option<String>,
    pub promulgated: Option<bool>,
    pub skip: usize,
    pub limit: usize,
    /// Sort keys, leading `-` reverses that key.
    pub sort: Vec<String>,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn index(&self, doc: SearchDocument) -> Result<()>;

    async fn remove(&self, reference: &Reference) -> Result<()>;

    async fn bump_downloads(&self, reference: &Reference, by: u64) -> Result<()>;

    /// `identity`/`groups` restrict results to readable documents;
    /// `elevated` (admin or any non-empty group membership) permits the
    /// per-query result cache to be bypassed by the caller, per §4.7.
    async fn query(
        &self,
        filters: &SearchFilters,
        identity: &str,
        groups: &[String],
    ) -> Result<Vec<SearchDocument>>;
}

#[derive(Default)]
pub struct InMemorySearchIndex {
    docs: RwLock<HashMap<String, SearchDocument>>,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn readable(doc: &SearchDocument, identity: &str, groups: &[String]) -> bool {
    doc.read_acl.iter().any(|r| r == "everyone")
        || doc.read_acl.iter().any(|r| r == identity)
        || groups.iter().any(|g| doc.read_acl.contains(g))
}

fn matches_filters(doc: &SearchDocument, filters: &SearchFilters) -> bool {
    if let Some(name) = &filters.name {
        if doc.reference.name != *name {
            return false;
        }
    }
    if let Some(owner) = &filters.owner {
        if doc.owner.as_deref() != Some(owner.as_str()) {
            return false;
        }
    }
    if let Some(series) = &filters.series {
        if doc.reference.series.as_deref() != Some(series.as_str()) {
            return false;
        }
    }
    if let Some(provides) = &filters.provides {
        if !doc.provides.iter().any(|p| p == provides) {
            return false;
        }
    }
    if let Some(requires) = &filters.requires {
        if !doc.requires.iter().any(|r| r == requires) {
            return false;
        }
    }
    if let Some(tag) = &filters.tags {
        if !doc.tags.iter().any(|t| t == tag) {
            return false;
        }
    }
    if let Some(summary) = &filters.summary {
        if !doc.summary.contains(summary.as_str()) {
            return false;
        }
    }
    if let Some(description) = &filters.description {
        if !doc.description.contains(description.as_str()) {
            return false;
        }
    }
    if let Some(entity_type) = &filters.entity_type {
        let wants_bundle = entity_type == "bundle";
        if doc.is_bundle != wants_bundle {
            return false;
        }
    }
    if let Some(promulgated) = filters.promulgated {
        if doc.promulgated != promulgated {
            return false;
        }
    }
    if let Some(text) = &filters.text {
        let haystack = format!("{} {} {}", doc.reference.name, doc.summary, doc.description);
        if !haystack.to_lowercase().contains(&text.to_lowercase()) {
            return false;
        }
    }
    true
}

fn sort_documents(docs: &mut [SearchDocument], sort: &[String]) {
    if sort.is_empty() {
        docs.sort_by(|a, b| b.total_downloads.cmp(&a.total_downloads));
        return;
    }
    docs.sort_by(|a, b| {
        for key in sort {
            let (reverse, field) = match key.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, key.as_str()),
            };
            let ordering = match field {
                "name" => a.reference.name.cmp(&b.reference.name),
                "owner" => a.owner.cmp(&b.owner),
                "series" => a.reference.series.cmp(&b.reference.series),
                "downloads" => a.total_downloads.cmp(&b.total_downloads),
                _ => std::cmp::Ordering::Equal,
            };
            let ordering = if reverse { ordering.reverse() } else { ordering };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn index(&self, doc: SearchDocument) -> Result<()> {
        self.docs.write().await.insert(doc.key(), doc);
        Ok(())
    }

    async fn remove(&self, reference: &Reference) -> Result<()> {
        self.docs.write().await.remove(&reference.to_string());
        Ok(())
    }

    async fn bump_downloads(&self, reference: &Reference, by: u64) -> Result<()> {
        if let Some(doc) = self.docs.write().await.get_mut(&reference.to_string()) {
            doc.total_downloads += by;
        }
        Ok(())
    }

    async fn query(
        &self,
        filters: &SearchFilters,
        identity: &str,
        groups: &[String],
    ) -> Result<Vec<SearchDocument>> {
        let guard = self.docs.read().await;
        let mut matched: Vec<SearchDocument> = guard
            .values()
            .filter(|doc| readable(doc, identity, groups))
            .filter(|doc| matches_filters(doc, filters))
            .cloned()
            .collect();
        sort_documents(&mut matched, &filters.sort);
        let limit = if filters.limit == 0 { matched.len() } else { filters.limit };
        Ok(matched.into_iter().skip(filters.skip).take(limit).collect())
    }
}

pub type SharedSearchIndex = Arc<dyn SearchIndex>;

pub fn document_from_entity(
    reference: &Reference,
    payload: &EntityPayload,
    promulgated: bool,
    read_acl: Vec<String>,
    total_downloads: u64,
) -> SearchDocument {
    let (summary, description, provides, requires, tags) = match payload {
        EntityPayload::Charm { meta, .. } => (
            meta.summary.clone(),
            meta.description.clone(),
            meta.provides.values().cloned().collect(),
            meta.requires.values().cloned().collect(),
            meta.tags.clone(),
        ),
        EntityPayload::Bundle { .. } => (String::new(), String::new(), vec![], vec![], vec![]),
    };
    SearchDocument {
        reference: reference.clone(),
        owner: reference.user.clone(),
        promulgated,
        summary,
        description,
        tags,
        provides,
        requires,
        is_bundle: payload.is_bundle(),
        total_downloads,
        read_acl,
    }
}
