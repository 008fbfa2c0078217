//! The entity record and the base-entity identity it hangs off of.
//!
//! Charms and bundles share this record shape but diverge in parsing,
//! verification, and which metadata handlers apply; the two are
//! distinguished by the `series == "bundle"` predicate carried on the
//! reference rather than a separate type hierarchy, per the polymorphism
//! note in the design notes.

use crate::content_hash::ContentHash;
use crate::reference::Reference;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A cyclic reference pair: an entity names its base; a base's ACL
/// governs its entities. Ownership is the base's -- deleting the last
/// entity for a base leaves the base (and its ACL) in place.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Acl {
    pub read: Vec<String>,
    pub write: Vec<String>,
}

pub const EVERYONE: &str = "everyone";

impl Acl {
    pub fn public() -> Self {
        Self {
            read: vec![EVERYONE.to_string()],
            write: vec![],
        }
    }

    pub fn allows_read(&self, identity: &str, groups: &[String]) -> bool {
        self.read.iter().any(|r| r == EVERYONE)
            || self.read.iter().any(|r| r == identity)
            || groups.iter().any(|g| self.read.contains(g))
    }

    pub fn allows_write(&self, identity: &str, groups: &[String]) -> bool {
        self.write.iter().any(|w| w == identity) || groups.iter().any(|g| self.write.contains(g))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BaseEntity {
    pub user: Option<String>,
    pub name: String,
    pub promulgated: bool,
    pub acl: Acl,
}

impl BaseEntity {
    pub fn key(user: Option<&str>, name: &str) -> String {
        match user {
            Some(u) => format!("~{u}/{name}"),
            None => name.to_string(),
        }
    }

    pub fn new(user: Option<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let default_acl = if user.is_some() {
            Acl {
                read: vec![EVERYONE.to_string()],
                write: user.clone().into_iter().collect(),
            }
        } else {
            Acl::public()
        };
        Self {
            user,
            name,
            promulgated: false,
            acl: default_acl,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CharmMeta {
    pub summary: String,
    pub description: String,
    #[serde(default)]
    pub provides: BTreeMap<String, String>,
    #[serde(default)]
    pub requires: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CharmConfig {
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CharmActions {
    #[serde(default)]
    pub actions: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundleService {
    pub charm: String,
    #[serde(default)]
    pub gui_x: Option<f64>,
    #[serde(default)]
    pub gui_y: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundleData {
    #[serde(default)]
    pub services: BTreeMap<String, BundleService>,
    #[serde(default)]
    pub relations: Vec<Vec<String>>,
    /// Every charm reference resolved from `services`, kept denormalized
    /// so `bundles-containing` can index on it without re-parsing.
    #[serde(default)]
    pub bundle_charms: Vec<Reference>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EntityPayload {
    Charm {
        meta: CharmMeta,
        config: CharmConfig,
        actions: CharmActions,
    },
    Bundle { data: BundleData },
}

impl EntityPayload {
    pub fn is_bundle(&self) -> bool {
        matches!(self, EntityPayload::Bundle { .. })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Entity {
    pub canonical: Reference,
    pub promulgated_revision: i64,
    pub hash: ContentHash,
    pub blob_name: String,
    pub size: u64,
    pub payload: EntityPayload,
    #[serde(default)]
    pub extra_info: BTreeMap<String, serde_json::Value>,
    pub uploaded_at: DateTime<Utc>,
}

impl Entity {
    pub fn base_key(&self) -> String {
        BaseEntity::key(self.canonical.user.as_deref(), &self.canonical.name)
    }

    pub fn is_promulgated(&self) -> bool {
        self.promulgated_revision >= 0
    }

    pub fn manifest(&self, archive: &[u8]) -> crate::error::Result<Vec<String>> {
        let reader = std::io::Cursor::new(archive);
        let zip = zip::ZipArchive::new(reader)?;
        Ok(zip.file_names().map(|s| s.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acl_everyone_grants_read_to_anyone() {
        let acl = Acl::public();
        assert!(acl.allows_read("anonymous", &[]));
        assert!(!acl.allows_write("anonymous", &[]));
    }

    #[test]
    fn acl_write_checks_identity_and_groups() {
        let acl = Acl {
            read: vec!["alice".into()],
            write: vec!["alice".into(), "admins".into()],
        };
        assert!(acl.allows_write("alice", &[]));
        assert!(acl.allows_write("bob", &["admins".to_string()]));
        assert!(!acl.allows_write("bob", &[]));
        assert!(!acl.allows_read("bob", &[]));
    }

    #[test]
    fn base_entity_key_reflects_ownership() {
        assert_eq!(BaseEntity::key(Some("charmers"), "wordpress"), "~charmers/wordpress");
        assert_eq!(BaseEntity::key(None, "wordpress"), "wordpress");
    }

    #[test]
    fn new_owned_base_entity_defaults_to_owner_write_everyone_read() {
        let base = BaseEntity::new(Some("charmers".to_string()), "wordpress");
        assert!(base.acl.allows_read("nobody", &[]));
        assert!(base.acl.allows_write("charmers", &[]));
        assert!(!base.acl.allows_write("nobody", &[]));
    }
}
