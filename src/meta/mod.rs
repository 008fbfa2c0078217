//! The metadata dispatch table (§4.4): one generic routing engine over a
//! fixed set of named handlers, each declaring what it needs from the
//! entity and returning *metadata-not-relevant* when it does not apply
//! to the entity's kind.

use crate::entity::{BaseEntity, Entity, EntityPayload};
use crate::error::{Result, StoreError};
use crate::reference::Reference;
use crate::relations;
use crate::stats;
use crate::storage::BlobStore;
use crate::store::EntityStore;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Every name the dispatch table recognizes, used to validate `include=`
/// lists and to drive the `any` aggregation.
pub const DISPATCH_NAMES: &[&str] = &[
    "id",
    "charm-metadata",
    "bundle-metadata",
    "charm-config",
    "charm-actions",
    "archive-size",
    "manifest",
    "extra-info",
    "perm",
    "charm-related",
    "bundles-containing",
    "stats",
    "revision-info",
];

pub struct MetaContext<'a> {
    pub entities: &'a dyn EntityStore,
    pub blobs: &'a dyn BlobStore,
    pub stats: &'a stats::StatsCollector,
    pub identity: &'a str,
    pub groups: &'a [String],
}

fn charm_only<'a, T>(payload: &'a EntityPayload, extract: impl Fn(&'a EntityPayload) -> Option<T>) -> Result<T> {
    extract(payload).ok_or_else(|| StoreError::MetadataNotRelevant("charm-only metadata on a bundle".to_string()))
}

/// Dispatches a single metadata name to its handler. `tail` is the path
/// segment after the name (e.g. the key in `extra-info/<key>` or
/// `read`/`write` in `perm/<which>`). `query` carries the reference
/// widening flags for `bundles-containing`.
pub async fn get_meta(
    ctx: &MetaContext<'_>,
    entity: &Entity,
    base: &BaseEntity,
    name: &str,
    tail: Option<&str>,
    query: &HashMap<String, String>,
) -> Result<Value> {
    match name {
        "id" => Ok(json!(entity.canonical.to_string())),

        "charm-metadata" => {
            let meta = charm_only(&entity.payload, |p| match p {
                EntityPayload::Charm { meta, .. } => Some(meta.clone()),
                _ => None,
            })?;
            Ok(serde_json::to_value(meta)?)
        }

        "bundle-metadata" => match &entity.payload {
            EntityPayload::Bundle { data } => Ok(serde_json::to_value(data)?),
            EntityPayload::Charm { .. } => Err(StoreError::MetadataNotRelevant(name.to_string())),
        },

        "charm-config" => {
            let config = charm_only(&entity.payload, |p| match p {
                EntityPayload::Charm { config, .. } => Some(config.clone()),
                _ => None,
            })?;
            Ok(serde_json::to_value(config)?)
        }

        "charm-actions" => {
            let actions = charm_only(&entity.payload, |p| match p {
                EntityPayload::Charm { actions, .. } => Some(actions.clone()),
                _ => None,
            })?;
            Ok(serde_json::to_value(actions)?)
        }

        "archive-size" => {
            let size = ctx.blobs.size(&entity.blob_name).await?;
            Ok(json!(size))
        }

        "manifest" => {
            let bytes = ctx.blobs.get(&entity.blob_name).await?;
            let names = entity.manifest(&bytes)?;
            Ok(json!(names))
        }

        "extra-info" => match tail {
            Some(key) => Ok(entity.extra_info.get(key).cloned().unwrap_or(Value::Null)),
            None => Ok(serde_json::to_value(&entity.extra_info)?),
        },

        "perm" => match tail {
            Some("read") => Ok(json!(base.acl.read)),
            Some("write") => Ok(json!(base.acl.write)),
            Some(other) => Err(StoreError::bad_request(format!("unknown perm field {other}"))),
            None => Ok(serde_json::to_value(&base.acl)?),
        },

        "charm-related" => {
            if !matches!(entity.payload, EntityPayload::Charm { .. }) {
                return Ok(json!({}));
            }
            let grouped = relations::charm_related(ctx.entities, entity, ctx.identity, ctx.groups).await?;
            Ok(serde_json::to_value(grouped)?)
        }

        "bundles-containing" => {
            if !matches!(entity.payload, EntityPayload::Charm { .. }) {
                return Err(StoreError::MetadataNotRelevant(name.to_string()));
            }
            let any_series = query.get("any-series").map(|v| v == "1").unwrap_or(false);
            let any_revision = query.get("any-revision").map(|v| v == "1").unwrap_or(false);
            let all_results = query.get("all-results").map(|v| v == "1").unwrap_or(false);
            let mut target = entity.canonical.clone();
            if any_series {
                target.series = None;
            }
            if any_revision {
                target.revision = crate::reference::UNSPECIFIED_REVISION;
            }
            let bundles = relations::bundles_containing(
                ctx.entities,
                &target,
                any_series,
                any_revision,
                all_results,
                ctx.identity,
                ctx.groups,
            )
            .await?;
            let refs: Vec<String> = bundles.iter().map(|e| e.canonical.to_string()).collect();
            Ok(json!(refs))
        }

        "stats" => {
            let series = entity.canonical.series.clone().unwrap_or_default();
            let downloads = ctx
                .stats
                .total(&stats::download_key(
                    &series,
                    &entity.canonical.name,
                    entity.canonical.user.as_deref(),
                    entity.canonical.revision,
                ))
                .await;
            Ok(json!({ "ArchiveDownloadCount": downloads }))
        }

        "revision-info" => {
            let mut siblings = ctx
                .entities
                .list_by_base(entity.canonical.user.as_deref(), &entity.canonical.name)
                .await?;
            siblings.sort_by(|a, b| b.canonical.revision.cmp(&a.canonical.revision));
            let refs: Vec<String> = siblings.into_iter().map(|e| e.canonical.to_string()).collect();
            Ok(json!({ "Revisions": refs }))
        }

        other => Err(StoreError::not_found(format!("unknown metadata name {other}"))),
    }
}

/// PUT handlers: only `extra-info[/<key>]` and `perm/{read,write}` accept
/// writes. Returns the updated document so callers can persist it.
pub async fn put_meta(
    entity: &mut Entity,
    base: &mut BaseEntity,
    name: &str,
    tail: Option<&str>,
    body: Value,
) -> Result<()> {
    match (name, tail) {
        ("extra-info", Some(key)) => {
            entity.extra_info.insert(key.to_string(), body);
            Ok(())
        }
        ("extra-info", None) => {
            let map: std::collections::BTreeMap<String, Value> = serde_json::from_value(body)?;
            entity.extra_info = map;
            Ok(())
        }
        ("perm", Some("read")) => {
            base.acl.read = serde_json::from_value(body)?;
            Ok(())
        }
        ("perm", Some("write")) => {
            base.acl.write = serde_json::from_value(body)?;
            Ok(())
        }
        _ => Err(StoreError::MethodNotAllowed(format!("PUT not supported for {name}"))),
    }
}

/// `any?include=a&include=b`: aggregate several names into one object,
/// omitting any that returned *metadata-not-relevant*.
pub async fn get_any(
    ctx: &MetaContext<'_>,
    entity: &Entity,
    base: &BaseEntity,
    includes: &[String],
    query: &HashMap<String, String>,
) -> Result<Value> {
    let mut meta = serde_json::Map::new();
    for name in includes {
        match get_meta(ctx, entity, base, name, None, query).await {
            Ok(value) => {
                meta.insert(name.clone(), value);
            }
            Err(StoreError::MetadataNotRelevant(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(json!({ "Id": entity.canonical.to_string(), "Meta": meta }))
}

/// Bulk fan-out for `GET meta/<name>?id=a&id=b`, bounded by
/// `max_concurrency`. Partial failures are logged and the failed entries
/// simply omitted from the response map.
pub async fn get_bulk(
    ctx: &MetaContext<'_>,
    name: &str,
    references: &[Reference],
    query: &HashMap<String, String>,
    max_concurrency: usize,
) -> Result<serde_json::Map<String, Value>> {
    let results: Vec<(String, Option<Value>)> = stream::iter(references.iter().cloned())
        .map(|reference| {
            let query = query.clone();
            async move {
                let key = reference.to_string();
                match load_and_dispatch(ctx, &reference, name, query).await {
                    Ok(value) => (key, Some(value)),
                    Err(e) => {
                        tracing::warn!(reference = %key, error = %e, "bulk metadata lookup failed, omitting");
                        (key, None)
                    }
                }
            }
        })
        .buffer_unordered(max_concurrency.max(1))
        .collect()
        .await;

    let mut out = serde_json::Map::new();
    for (key, value) in results {
        if let Some(value) = value {
            out.insert(key, value);
        }
    }
    Ok(out)
}

async fn load_and_dispatch(
    ctx: &MetaContext<'_>,
    reference: &Reference,
    name: &str,
    query: HashMap<String, String>,
) -> Result<Value> {
    let resolved = crate::store::resolve(ctx.entities, reference, ctx.identity, ctx.groups).await?;
    let entity = ctx
        .entities
        .get_by_canonical(&resolved.canonical)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("entity \"{reference}\" not found")))?;
    let base = ctx
        .entities
        .get_base_entity(entity.canonical.user.as_deref(), &entity.canonical.name)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("entity \"{reference}\" not found")))?;
    get_meta(ctx, &entity, &base, name, None, &query).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_hash::ContentHash;
    use crate::entity::{Acl, BundleData, CharmActions, CharmConfig, CharmMeta};
    use crate::reference::UNSPECIFIED_REVISION;
    use crate::storage::InMemoryBlobStore;
    use crate::store::InMemoryEntityStore;
    use std::collections::BTreeMap;

    fn charm_entity() -> Entity {
        Entity {
            canonical: Reference::new(Some("charmers".into()), "wordpress").with_series("precise").with_revision(0),
            promulgated_revision: UNSPECIFIED_REVISION,
            hash: ContentHash::from_bytes(b"wordpress"),
            blob_name: "blob-wordpress".to_string(),
            size: 9,
            payload: EntityPayload::Charm {
                meta: CharmMeta {
                    summary: "s".into(),
                    description: "d".into(),
                    provides: BTreeMap::new(),
                    requires: BTreeMap::new(),
                    tags: vec![],
                },
                config: CharmConfig::default(),
                actions: CharmActions::default(),
            },
            extra_info: BTreeMap::new(),
            uploaded_at: chrono::Utc::now(),
        }
    }

    fn base_entity() -> BaseEntity {
        BaseEntity {
            user: Some("charmers".to_string()),
            name: "wordpress".to_string(),
            promulgated: false,
            acl: Acl { read: vec!["everyone".into()], write: vec!["charmers".into()] },
        }
    }

    #[tokio::test]
    async fn charm_config_on_bundle_is_metadata_not_relevant() {
        let entities = InMemoryEntityStore::new();
        let blobs = InMemoryBlobStore::new();
        let stats = stats::StatsCollector::new(16);
        let ctx = MetaContext { entities: &entities, blobs: &blobs, stats: &stats, identity: "charmers", groups: &[] };

        let mut entity = charm_entity();
        entity.payload = EntityPayload::Bundle { data: BundleData { services: BTreeMap::new(), relations: vec![], bundle_charms: vec![] } };
        let base = base_entity();

        let err = get_meta(&ctx, &entity, &base, "charm-config", None, &HashMap::new()).await.unwrap_err();
        assert_eq!(err.kind(), "metadata-not-relevant");
    }

    #[tokio::test]
    async fn any_omits_not_relevant_names() {
        let entities = InMemoryEntityStore::new();
        let blobs = InMemoryBlobStore::new();
        let stats = stats::StatsCollector::new(16);
        let ctx = MetaContext { entities: &entities, blobs: &blobs, stats: &stats, identity: "charmers", groups: &[] };
        let entity = charm_entity();
        let base = base_entity();

        let includes = vec!["id".to_string(), "bundle-metadata".to_string()];
        let result = get_any(&ctx, &entity, &base, &includes, &HashMap::new()).await.unwrap();
        let meta = result.get("Meta").unwrap().as_object().unwrap();
        assert!(meta.contains_key("id"));
        assert!(!meta.contains_key("bundle-metadata"));
    }

    #[tokio::test]
    async fn extra_info_round_trips_through_put_then_get() {
        let entities = InMemoryEntityStore::new();
        let blobs = InMemoryBlobStore::new();
        let stats = stats::StatsCollector::new(16);
        let ctx = MetaContext { entities: &entities, blobs: &blobs, stats: &stats, identity: "charmers", groups: &[] };
        let mut entity = charm_entity();
        let mut base = base_entity();

        put_meta(&mut entity, &mut base, "extra-info", Some("vcs-revision"), json!("abc123")).await.unwrap();
        let value = get_meta(&ctx, &entity, &base, "extra-info", Some("vcs-revision"), &HashMap::new()).await.unwrap();
        assert_eq!(value, json!("abc123"));
    }

    #[tokio::test]
    async fn bulk_fetch_omits_failures_and_keeps_successes() {
        let entities = InMemoryEntityStore::new();
        let blobs = InMemoryBlobStore::new();
        let stats = stats::StatsCollector::new(16);
        entities.put_base_entity(base_entity()).await.unwrap();
        entities.insert(charm_entity()).await.unwrap();
        let ctx = MetaContext { entities: &entities, blobs: &blobs, stats: &stats, identity: "charmers", groups: &[] };

        let ok_ref = Reference::new(Some("charmers".into()), "wordpress").with_series("precise").with_revision(0);
        let missing_ref = Reference::new(Some("charmers".into()), "missing");
        let out = get_bulk(&ctx, "id", &[ok_ref.clone(), missing_ref], &HashMap::new(), 4).await.unwrap();
        assert_eq!(out.len(), 1);
        assert!(out.contains_key(&ok_ref.to_string()));
    }
}
