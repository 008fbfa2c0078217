//! The archive read path (§4.3): raw blob serving with range support,
//! single-file extraction, and the readme/icon/diagram derivatives that
//! ride on top of it.

use crate::entity::{Entity, EntityPayload};
use crate::error::{Result, StoreError};
use crate::reference::ResolvedUrl;
use crate::search::SearchIndex;
use crate::stats::{self, StatsCollector};
use crate::storage::BlobStore;
use std::io::Read;
use std::sync::Arc;

pub const FULLY_SPECIFIED_MAX_AGE: u64 = 365 * 24 * 60 * 60;
pub const UNDER_SPECIFIED_MAX_AGE: u64 = 5 * 60;

pub fn cache_max_age(resolved: &ResolvedUrl) -> u64 {
    if resolved.canonical.is_fully_specified() {
        FULLY_SPECIFIED_MAX_AGE
    } else {
        UNDER_SPECIFIED_MAX_AGE
    }
}

pub struct RangeSpec {
    pub start: u64,
    pub end_inclusive: u64,
}

/// Parses a single-range `Range: bytes=start-end` header. Multi-range and
/// suffix-length forms are rejected by returning `None`, which callers
/// treat as "serve the whole body".
pub fn parse_range(header: &str, total_len: u64) -> Option<RangeSpec> {
    let spec = header.strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    if start.is_empty() {
        return None;
    }
    let start: u64 = start.parse().ok()?;
    let end_inclusive = if end.is_empty() {
        total_len.checked_sub(1)?
    } else {
        end.parse().ok()?
    };
    if start > end_inclusive || start >= total_len {
        return None;
    }
    Some(RangeSpec {
        start,
        end_inclusive: end_inclusive.min(total_len - 1),
    })
}

pub struct ArchiveDeps<'a> {
    pub blobs: &'a dyn BlobStore,
    pub search: Arc<dyn SearchIndex>,
    pub stats: &'a StatsCollector,
}

/// Loads the raw archive bytes for `entity`, honoring `range` if present,
/// and -- unless `skip_stats` is set -- records a download asynchronously.
pub async fn read_archive(
    deps: &ArchiveDeps<'_>,
    entity: &Entity,
    range: Option<&str>,
    skip_stats: bool,
) -> Result<(Vec<u8>, Option<(u64, u64, u64)>)> {
    let total_len = entity.size;
    let body = match range.and_then(|h| parse_range(h, total_len)) {
        Some(spec) => {
            let bytes = deps
                .blobs
                .get_range(&entity.blob_name, spec.start, spec.end_inclusive)
                .await?;
            (bytes, Some((spec.start, spec.end_inclusive, total_len)))
        }
        None => (deps.blobs.get(&entity.blob_name).await?, None),
    };

    if !skip_stats {
        record_download(deps, entity);
    }

    Ok(body)
}

fn record_download(deps: &ArchiveDeps<'_>, entity: &Entity) {
    let series = entity.canonical.series.clone().unwrap_or_default();
    let key = stats::download_key(
        &series,
        &entity.canonical.name,
        entity.canonical.user.as_deref(),
        entity.canonical.revision,
    );
    deps.stats.increment(key);
    if entity.is_promulgated() {
        let promulgated_key = stats::download_key(&series, &entity.canonical.name, None, entity.promulgated_revision);
        deps.stats.increment(promulgated_key);
    }
    let search = deps.search.clone();
    let reference = entity.canonical.clone();
    tokio::spawn(async move {
        let _ = search.bump_downloads(&reference, 1).await;
    });
}

fn clean_path(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

/// `GET <ref>/archive/<path>`: extract a single file from the archive.
pub fn extract_file(archive: &[u8], path: &str) -> Result<(Vec<u8>, String)> {
    let cleaned = clean_path(path);
    let reader = std::io::Cursor::new(archive);
    let mut zip = zip::ZipArchive::new(reader)?;
    let mut entry = zip
        .by_name(&cleaned)
        .map_err(|_| StoreError::not_found(format!("{cleaned} not found in archive")))?;
    if entry.is_dir() {
        return Err(StoreError::Forbidden(format!("{cleaned} is a directory")));
    }
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    let content_type = mime_guess::from_path(&cleaned)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string();
    Ok((buf, content_type))
}

const README_EXTENSIONS: &[&str] = &["", ".md", ".txt", ".rst"];

/// Locates a README by case-insensitive exact stem match against
/// `readme` plus one of a closed extension list, rejecting names that
/// merely start with `readme` (e.g. `readme-old.md`).
pub fn find_readme(names: &[String]) -> Option<String> {
    names
        .iter()
        .find(|name| {
            let lower = name.to_lowercase();
            README_EXTENSIONS.iter().any(|ext| lower == format!("readme{ext}"))
        })
        .cloned()
}

const DEFAULT_ICON_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 96 96" width="96" height="96"><rect width="96" height="96" fill="#dddddd"/></svg>"##;

/// `GET <ref>/icon.svg` (charms only): extract `icon.svg`, ensuring a
/// `viewBox` attribute is present, or fall back to a fixed default.
pub fn charm_icon(archive: &[u8]) -> String {
    match extract_file(archive, "icon.svg") {
        Ok((bytes, _)) => match String::from_utf8(bytes) {
            Ok(svg) => ensure_view_box(&svg),
            Err(_) => DEFAULT_ICON_SVG.to_string(),
        },
        Err(_) => DEFAULT_ICON_SVG.to_string(),
    }
}

fn ensure_view_box(svg: &str) -> String {
    if svg.contains("viewBox") {
        return svg.to_string();
    }
    match svg.find("<svg") {
        Some(idx) => {
            let insert_at = idx + "<svg".len();
            format!(
                "{}{}{}",
                &svg[..insert_at],
                r#" viewBox="0 0 96 96""#,
                &svg[insert_at..]
            )
        }
        None => DEFAULT_ICON_SVG.to_string(),
    }
}

/// `GET <ref>/diagram.svg` (bundles only): lay out services at their
/// stored `gui-x`/`gui-y` coordinates with `image` references to each
/// component charm's icon.
pub fn bundle_diagram(payload: &EntityPayload) -> Result<String> {
    let EntityPayload::Bundle { data } = payload else {
        return Err(StoreError::MetadataNotRelevant("diagram.svg".to_string()));
    };

    let mut images = String::new();
    let (mut max_x, mut max_y) = (600.0_f64, 400.0_f64);
    for (name, service) in &data.services {
        let x = service.gui_x.unwrap_or(0.0);
        let y = service.gui_y.unwrap_or(0.0);
        max_x = max_x.max(x + 96.0);
        max_y = max_y.max(y + 96.0);
        images.push_str(&format!(
            r#"<image x="{x}" y="{y}" width="96" height="96" xlink:href="{name}/icon.svg"/>"#
        ));
    }
    Ok(format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" viewBox="0 0 {max_x} {max_y}">{images}</svg>"#
    ))
}
