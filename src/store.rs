//! The entity-and-base-entity document store.
//!
//! Named as an external collaborator ("the underlying document database
//! and its indices") in the system overview, but given an in-memory
//! implementation here so the crate is runnable without a real database.
//! A production deployment would implement [`EntityStore`] against
//! Postgres the way the teacher's `postgres` feature backs
//! `MetadataStore`.

use crate::entity::{BaseEntity, Entity};
use crate::error::{Result, StoreError};
use crate::reference::{Reference, ResolvedUrl, UNSPECIFIED_REVISION};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_base_entity(&self, user: Option<&str>, name: &str) -> Result<Option<BaseEntity>>;

    async fn put_base_entity(&self, base: BaseEntity) -> Result<()>;

    /// Every stored entity sharing the (user, name) identity.
    async fn list_by_base(&self, user: Option<&str>, name: &str) -> Result<Vec<Entity>>;

    async fn get_by_canonical(&self, reference: &Reference) -> Result<Option<Entity>>;

    /// Insert a brand-new entity. Fails with `DuplicateUpload` if the
    /// canonical or promulgated reference already exists.
    async fn insert(&self, entity: Entity) -> Result<()>;

    /// Overwrite an existing entity in place (extra-info and ACL-adjacent
    /// metadata writes). Fails with `NotFound` if the canonical reference
    /// is not already present.
    async fn update(&self, entity: Entity) -> Result<()>;

    async fn delete(&self, reference: &Reference) -> Result<Option<Entity>>;

    async fn all(&self) -> Result<Vec<Entity>>;
}

#[derive(Default)]
struct Inner {
    bases: BTreeMap<String, BaseEntity>,
    entities: BTreeMap<Reference, Entity>,
    promulgated_index: BTreeMap<(String, String, i64), Reference>,
}

#[derive(Default)]
pub struct InMemoryEntityStore {
    inner: RwLock<Inner>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn get_base_entity(&self, user: Option<&str>, name: &str) -> Result<Option<BaseEntity>> {
        let key = BaseEntity::key(user, name);
        Ok(self.inner.read().await.bases.get(&key).cloned())
    }

    async fn put_base_entity(&self, base: BaseEntity) -> Result<()> {
        let key = BaseEntity::key(base.user.as_deref(), &base.name);
        self.inner.write().await.bases.insert(key, base);
        Ok(())
    }

    async fn list_by_base(&self, user: Option<&str>, name: &str) -> Result<Vec<Entity>> {
        let guard = self.inner.read().await;
        Ok(guard
            .entities
            .values()
            .filter(|e| e.canonical.user.as_deref() == user && e.canonical.name == name)
            .cloned()
            .collect())
    }

    async fn get_by_canonical(&self, reference: &Reference) -> Result<Option<Entity>> {
        Ok(self.inner.read().await.entities.get(reference).cloned())
    }

    async fn insert(&self, entity: Entity) -> Result<()> {
        let mut guard = self.inner.write().await;
        if guard.entities.contains_key(&entity.canonical) {
            return Err(StoreError::DuplicateUpload(entity.canonical.to_string()));
        }
        if entity.is_promulgated() {
            let series = entity
                .canonical
                .series
                .clone()
                .ok_or_else(|| StoreError::Internal("promulgated entity missing series".into()))?;
            let idx_key = (entity.canonical.name.clone(), series, entity.promulgated_revision);
            if guard.promulgated_index.contains_key(&idx_key) {
                return Err(StoreError::DuplicateUpload(format!(
                    "promulgated revision {} of {}",
                    entity.promulgated_revision, entity.canonical.name
                )));
            }
            guard
                .promulgated_index
                .insert(idx_key, entity.canonical.clone());
        }
        guard.entities.insert(entity.canonical.clone(), entity);
        Ok(())
    }

    async fn update(&self, entity: Entity) -> Result<()> {
        let mut guard = self.inner.write().await;
        if !guard.entities.contains_key(&entity.canonical) {
            return Err(StoreError::not_found(format!(
                "entity \"{}\" not found",
                entity.canonical
            )));
        }
        guard.entities.insert(entity.canonical.clone(), entity);
        Ok(())
    }

    async fn delete(&self, reference: &Reference) -> Result<Option<Entity>> {
        let mut guard = self.inner.write().await;
        let removed = guard.entities.remove(reference);
        if let Some(entity) = &removed {
            if entity.is_promulgated() {
                if let Some(series) = &entity.canonical.series {
                    guard.promulgated_index.remove(&(
                        entity.canonical.name.clone(),
                        series.clone(),
                        entity.promulgated_revision,
                    ));
                }
            }
        }
        Ok(removed)
    }

    async fn all(&self) -> Result<Vec<Entity>> {
        Ok(self.inner.read().await.entities.values().cloned().collect())
    }
}

pub type SharedEntityStore = Arc<dyn EntityStore>;

/// Reference resolution (§4.1): given a possibly under-specified
/// reference and the caller's identity/groups, return the single best
/// matching entity's resolved URL.
pub async fn resolve(
    store: &dyn EntityStore,
    reference: &Reference,
    identity: &str,
    groups: &[String],
) -> Result<ResolvedUrl> {
    let candidates: Vec<Entity> = if reference.is_promulgated() {
        store
            .all()
            .await?
            .into_iter()
            .filter(|e| e.canonical.name == reference.name && e.is_promulgated())
            .collect()
    } else {
        store
            .list_by_base(reference.user.as_deref(), &reference.name)
            .await?
    };

    let mut candidates: Vec<Entity> = candidates
        .into_iter()
        .filter(|e| {
            reference.series.is_none() || e.canonical.series == reference.series
        })
        .filter(|e| {
            !reference.has_revision() || e.canonical.revision == reference.revision
        })
        .collect();

    if candidates.is_empty() {
        return Err(StoreError::not_found(format!(
            "entity \"{reference}\" not found"
        )));
    }

    // ACL evaluated after resolution: filter to readable candidates before
    // tie-breaking, so the existence of private entities is never revealed.
    let mut readable = Vec::new();
    for entity in &candidates {
        let base = store
            .get_base_entity(entity.canonical.user.as_deref(), &entity.canonical.name)
            .await?;
        let allowed = base
            .as_ref()
            .map(|b| b.acl.allows_read(identity, groups))
            .unwrap_or(false);
        if allowed {
            readable.push(entity.clone());
        }
    }

    if readable.is_empty() {
        if candidates.is_empty() {
            return Err(StoreError::not_found(format!(
                "entity \"{reference}\" not found"
            )));
        }
        // Candidates exist but none are readable by this caller; per
        // §4.1 do not reveal their existence -- surface not-found too.
        return Err(StoreError::not_found(format!(
            "entity \"{reference}\" not found"
        )));
    }

    candidates = readable;

    // Highest revision wins; ties across series broken by series name.
    candidates.sort_by(|a, b| {
        b.canonical
            .revision
            .cmp(&a.canonical.revision)
            .then_with(|| a.canonical.series.cmp(&b.canonical.series))
    });
    let best = candidates.into_iter().next().unwrap();
    let promulgated_revision = if best.is_promulgated() {
        best.promulgated_revision
    } else {
        UNSPECIFIED_REVISION
    };
    Ok(ResolvedUrl::new(best.canonical, promulgated_revision))
}
