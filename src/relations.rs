//! Relational queries (§4.5): `charm-related` interface matching and
//! `bundles-containing` reference widening, both re-entering the entity
//! store rather than relying on the search index's free-text matching.

use crate::entity::{BaseEntity, Entity, EntityPayload};
use crate::error::Result;
use crate::reference::Reference;
use crate::store::EntityStore;
use std::collections::BTreeMap;

#[derive(Clone, Debug, serde::Serialize)]
pub struct RelatedEntry {
    pub reference: Reference,
    pub summary: String,
}

/// `{"provides": {interface: [entries]}, "requires": {interface: [entries]}}`
/// grouped by interface name and sorted by reference within each group.
/// Bundles have no relations, so callers get an empty object for them.
pub async fn charm_related(
    store: &dyn EntityStore,
    entity: &Entity,
    identity: &str,
    groups: &[String],
) -> Result<BTreeMap<String, BTreeMap<String, Vec<RelatedEntry>>>> {
    let EntityPayload::Charm { meta, .. } = &entity.payload else {
        return Ok(BTreeMap::new());
    };

    let all = store.all().await?;
    let mut result: BTreeMap<String, BTreeMap<String, Vec<RelatedEntry>>> = BTreeMap::new();

    // This charm requires interface X -> list charms that provide X.
    let required_interfaces: std::collections::BTreeSet<&String> = meta.requires.values().collect();
    for interface in required_interfaces {
        let mut entries = matching_by_interface(&all, interface, true);
        entries = filter_readable(store, entries, identity, groups).await?;
        entries.sort_by(|a, b| a.canonical.cmp(&b.canonical));
        if !entries.is_empty() {
            result
                .entry("provides".to_string())
                .or_default()
                .insert(interface.clone(), to_related_entries(&entries));
        }
    }
    // This charm provides interface X -> list charms that require X.
    let provided_interfaces: std::collections::BTreeSet<&String> = meta.provides.values().collect();
    for interface in provided_interfaces {
        let mut entries = matching_by_interface(&all, interface, false);
        entries = filter_readable(store, entries, identity, groups).await?;
        entries.sort_by(|a, b| a.canonical.cmp(&b.canonical));
        if !entries.is_empty() {
            result
                .entry("requires".to_string())
                .or_default()
                .insert(interface.clone(), to_related_entries(&entries));
        }
    }

    Ok(result)
}

/// Entities whose `provides` (when `want_provides`) or `requires` array
/// names `interface`.
fn matching_by_interface(all: &[Entity], interface: &str, want_provides: bool) -> Vec<Entity> {
    all.iter()
        .filter(|e| {
            if let EntityPayload::Charm { meta, .. } = &e.payload {
                let values = if want_provides { &meta.provides } else { &meta.requires };
                values.values().any(|v| v == interface)
            } else {
                false
            }
        })
        .cloned()
        .collect()
}

fn to_related_entries(entities: &[Entity]) -> Vec<RelatedEntry> {
    entities
        .iter()
        .map(|e| RelatedEntry {
            reference: e.canonical.clone(),
            summary: match &e.payload {
                EntityPayload::Charm { meta, .. } => meta.summary.clone(),
                EntityPayload::Bundle { .. } => String::new(),
            },
        })
        .collect()
}

async fn filter_readable(
    store: &dyn EntityStore,
    entities: Vec<Entity>,
    identity: &str,
    groups: &[String],
) -> Result<Vec<Entity>> {
    let mut readable = Vec::new();
    for entity in entities {
        let base = store
            .get_base_entity(entity.canonical.user.as_deref(), &entity.canonical.name)
            .await?;
        if readable_base(&base, identity, groups) {
            readable.push(entity);
        }
    }
    Ok(readable)
}

fn readable_base(base: &Option<BaseEntity>, identity: &str, groups: &[String]) -> bool {
    base.as_ref()
        .map(|b| b.acl.allows_read(identity, groups))
        .unwrap_or(false)
}

/// Widens `reference` per the `any-series`/`any-revision` flags, matching
/// only against a `bundle_charms` entry carrying the same widened shape.
fn reference_matches(candidate: &Reference, target: &Reference, any_series: bool, any_revision: bool) -> bool {
    if candidate.user != target.user || candidate.name != target.name {
        return false;
    }
    if !any_series && candidate.series != target.series {
        return false;
    }
    if !any_revision && candidate.revision != target.revision {
        return false;
    }
    true
}

/// `bundles-containing` (§4.5): bundles whose `bundle_charms` contain a
/// reference matching `target` under the widening rules, deduplicated to
/// the highest revision per bundle unless `all_results` is set.
pub async fn bundles_containing(
    store: &dyn EntityStore,
    target: &Reference,
    any_series: bool,
    any_revision: bool,
    all_results: bool,
    identity: &str,
    groups: &[String],
) -> Result<Vec<Entity>> {
    let all = store.all().await?;
    let mut matches: Vec<Entity> = all
        .into_iter()
        .filter(|e| e.payload.is_bundle())
        .filter(|e| {
            if let EntityPayload::Bundle { data } = &e.payload {
                data.bundle_charms
                    .iter()
                    .any(|c| reference_matches(c, target, any_series, any_revision))
            } else {
                false
            }
        })
        .collect();

    matches = filter_readable(store, matches.drain(..).collect(), identity, groups).await?;

    if all_results {
        matches.sort_by(|a, b| a.canonical.cmp(&b.canonical));
        return Ok(matches);
    }

    // Keep only the highest revision per bundle identity, considering
    // both canonical and promulgated reference spaces so a bundle that
    // is both owned and promulgated is not counted twice.
    let mut best: BTreeMap<String, Entity> = BTreeMap::new();
    for entity in matches {
        let bundle_key = entity
            .canonical
            .user
            .clone()
            .unwrap_or_default()
            + "/"
            + &entity.canonical.name;
        match best.get(&bundle_key) {
            Some(existing) if existing.canonical.revision >= entity.canonical.revision => {}
            _ => {
                best.insert(bundle_key, entity);
            }
        }
    }
    let mut result: Vec<Entity> = best.into_values().collect();
    result.sort_by(|a, b| a.canonical.cmp(&b.canonical));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_hash::ContentHash;
    use crate::entity::{BundleData, BundleService, CharmActions, CharmConfig, CharmMeta};
    use crate::reference::UNSPECIFIED_REVISION;
    use crate::store::InMemoryEntityStore;
    use std::collections::BTreeMap as Map;

    fn charm(user: &str, name: &str, provides: &[(&str, &str)], requires: &[(&str, &str)]) -> Entity {
        Entity {
            canonical: Reference {
                user: Some(user.to_string()),
                name: name.to_string(),
                series: Some("precise".to_string()),
                revision: 0,
            },
            promulgated_revision: UNSPECIFIED_REVISION,
            hash: ContentHash::from_bytes(name.as_bytes()),
            blob_name: format!("blob-{name}"),
            size: 1,
            payload: EntityPayload::Charm {
                meta: CharmMeta {
                    summary: format!("{name} summary"),
                    description: String::new(),
                    provides: provides.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                    requires: requires.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                    tags: vec![],
                },
                config: CharmConfig::default(),
                actions: CharmActions::default(),
            },
            extra_info: Map::new(),
            uploaded_at: chrono::Utc::now(),
        }
    }

    fn bundle(user: &str, name: &str, bundle_charms: Vec<Reference>, revision: i64) -> Entity {
        Entity {
            canonical: Reference {
                user: Some(user.to_string()),
                name: name.to_string(),
                series: Some("bundle".to_string()),
                revision,
            },
            promulgated_revision: UNSPECIFIED_REVISION,
            hash: ContentHash::from_bytes(format!("{name}-{revision}").as_bytes()),
            blob_name: format!("blob-{name}-{revision}"),
            size: 1,
            payload: EntityPayload::Bundle {
                data: BundleData {
                    services: {
                        let mut services = Map::new();
                        services.insert(
                            "svc".to_string(),
                            BundleService { charm: bundle_charms[0].to_string(), gui_x: None, gui_y: None },
                        );
                        services
                    },
                    relations: vec![],
                    bundle_charms,
                },
            },
            extra_info: Map::new(),
            uploaded_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn charm_related_groups_by_interface_name() {
        let store = InMemoryEntityStore::new();
        store.put_base_entity(BaseEntity::new(Some("charmers".into()), "wordpress")).await.unwrap();
        store.put_base_entity(BaseEntity::new(Some("charmers".into()), "mysql")).await.unwrap();
        let wp = charm("charmers", "wordpress", &[], &[("db", "mysql")]);
        let db = charm("charmers", "mysql", &[("db", "mysql")], &[]);
        store.insert(wp.clone()).await.unwrap();
        store.insert(db).await.unwrap();

        let related = charm_related(&store, &wp, "charmers", &[]).await.unwrap();
        assert!(related["provides"]["mysql"].iter().any(|e| e.reference.name == "mysql"));
    }

    #[tokio::test]
    async fn charm_related_is_empty_for_bundles() {
        let store = InMemoryEntityStore::new();
        let wp_ref = Reference::new(Some("charmers".into()), "wordpress").with_series("precise").with_revision(0);
        let b = bundle("charmers", "wordpress-simple", vec![wp_ref], 0);
        let related = charm_related(&store, &b, "charmers", &[]).await.unwrap();
        assert!(related.is_empty());
    }

    #[tokio::test]
    async fn bundles_containing_deduplicates_to_highest_revision() {
        let store = InMemoryEntityStore::new();
        store.put_base_entity(BaseEntity::new(Some("charmers".into()), "wordpress-simple")).await.unwrap();
        let wp_ref = Reference::new(Some("charmers".into()), "wordpress").with_series("precise").with_revision(0);
        store.insert(bundle("charmers", "wordpress-simple", vec![wp_ref.clone()], 0)).await.unwrap();
        store.insert(bundle("charmers", "wordpress-simple", vec![wp_ref.clone()], 1)).await.unwrap();

        let results = bundles_containing(&store, &wp_ref, false, false, false, "charmers", &[])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].canonical.revision, 1);
    }

    #[tokio::test]
    async fn bundles_containing_any_series_widens_match() {
        let store = InMemoryEntityStore::new();
        store.put_base_entity(BaseEntity::new(Some("charmers".into()), "wordpress-simple")).await.unwrap();
        let trusty_ref = Reference::new(Some("charmers".into()), "wordpress").with_series("trusty").with_revision(0);
        store.insert(bundle("charmers", "wordpress-simple", vec![trusty_ref], 0)).await.unwrap();

        let precise_target = Reference::new(Some("charmers".into()), "wordpress").with_series("precise").with_revision(0);
        let narrow = bundles_containing(&store, &precise_target, false, false, false, "charmers", &[]).await.unwrap();
        assert!(narrow.is_empty());

        let widened = bundles_containing(&store, &precise_target, true, false, false, "charmers", &[]).await.unwrap();
        assert_eq!(widened.len(), 1);
    }
}
