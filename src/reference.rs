//! Entity references and the resolved-URL type that reference resolution
//! produces.
//!
//! A reference embeds directly in a URL path as
//! `[~<user>/]<series>/<name>[-<revision>]`. Any of `user`, `series`, or
//! `revision` may be left unspecified; [`crate::store::EntityStore::resolve`]
//! fills in the rest.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const UNSPECIFIED_REVISION: i64 = -1;
pub const BUNDLE_SERIES: &str = "bundle";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Reference {
    pub user: Option<String>,
    pub name: String,
    pub series: Option<String>,
    pub revision: i64,
}

impl Reference {
    pub fn new(user: Option<String>, name: impl Into<String>) -> Self {
        Self {
            user,
            name: name.into(),
            series: None,
            revision: UNSPECIFIED_REVISION,
        }
    }

    pub fn with_series(mut self, series: impl Into<String>) -> Self {
        self.series = Some(series.into());
        self
    }

    pub fn with_revision(mut self, revision: i64) -> Self {
        self.revision = revision;
        self
    }

    pub fn is_promulgated(&self) -> bool {
        self.user.is_none()
    }

    pub fn is_bundle(&self) -> bool {
        self.series.as_deref() == Some(BUNDLE_SERIES)
    }

    pub fn is_fully_specified(&self) -> bool {
        self.series.is_some() && self.revision != UNSPECIFIED_REVISION
    }

    pub fn has_revision(&self) -> bool {
        self.revision != UNSPECIFIED_REVISION
    }

    /// Parse `[~user/]series/name[-revision]`. Accepts a leading `cs:`
    /// schema prefix, stripped before parsing.
    pub fn parse(path: &str) -> Result<Self, String> {
        let path = path.strip_prefix("cs:").unwrap_or(path);
        let mut parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.is_empty() {
            return Err("empty reference".to_string());
        }

        let user = if let Some(first) = parts.first() {
            if let Some(stripped) = first.strip_prefix('~') {
                if stripped.is_empty() {
                    return Err("empty user segment".to_string());
                }
                let u = stripped.to_string();
                parts.remove(0);
                Some(u)
            } else {
                None
            }
        } else {
            None
        };

        let (series, name_rev) = match parts.len() {
            1 => (None, parts[0]),
            2 => (Some(parts[0].to_string()), parts[1]),
            _ => return Err(format!("malformed reference path: {path}")),
        };

        let (name, revision) = split_name_revision(name_rev)?;

        if name.is_empty() {
            return Err("empty name segment".to_string());
        }

        Ok(Reference {
            user,
            name,
            series,
            revision,
        })
    }
}

fn split_name_revision(segment: &str) -> Result<(String, i64), String> {
    if let Some(idx) = segment.rfind('-') {
        let (name, rev) = segment.split_at(idx);
        let rev = &rev[1..];
        if let Ok(n) = rev.parse::<i64>() {
            if n >= 0 {
                return Ok((name.to_string(), n));
            }
        }
    }
    Ok((segment.to_string(), UNSPECIFIED_REVISION))
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cs:")?;
        if let Some(user) = &self.user {
            write!(f, "~{user}/")?;
        }
        if let Some(series) = &self.series {
            write!(f, "{series}/")?;
        }
        write!(f, "{}", self.name)?;
        if self.revision != UNSPECIFIED_REVISION {
            write!(f, "-{}", self.revision)?;
        }
        Ok(())
    }
}

/// Produced by reference resolution, consumed everywhere downstream so
/// handlers never have to re-resolve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedUrl {
    pub canonical: Reference,
    /// -1 when the base entity is not promulgated.
    pub promulgated_revision: i64,
}

impl ResolvedUrl {
    pub fn new(canonical: Reference, promulgated_revision: i64) -> Self {
        Self {
            canonical,
            promulgated_revision,
        }
    }

    pub fn is_promulgated(&self) -> bool {
        self.promulgated_revision != UNSPECIFIED_REVISION
    }

    /// The promulgated form of the reference, when the base entity is
    /// promulgated.
    pub fn promulgated(&self) -> Option<Reference> {
        if self.is_promulgated() {
            Some(Reference {
                user: None,
                name: self.canonical.name.clone(),
                series: self.canonical.series.clone(),
                revision: self.promulgated_revision,
            })
        } else {
            None
        }
    }

    /// The promulgated reference when promulgated, otherwise the
    /// canonical one.
    pub fn preferred(&self) -> Reference {
        self.promulgated().unwrap_or_else(|| self.canonical.clone())
    }
}
