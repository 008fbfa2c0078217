//! Everything addressed by `<ref>/...`: the archive CRUD surface, its
//! single-file/readme/icon/diagram derivatives, `expand-id`, and the
//! ref-scoped metadata dispatch. All four HTTP methods on the catch-all
//! route fall through a single reference/suffix split because a
//! reference's segment count is not fixed (`[~user/]series/name[-rev]`),
//! so a literal Axum path pattern can't carve it from the rest.

use axum::body::{Body, Bytes};
use axum::extract::{Extension, Path, RawQuery, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::api::routes::{parse_query_pairs, query_map};
use crate::api::state::AppState;
use crate::archive::{self, ArchiveDeps};
use crate::auth::AuthContext;
use crate::entity::{BaseEntity, Entity};
use crate::error::{Result, StoreError};
use crate::ingest::{self, IngestDeps};
use crate::meta::{self, MetaContext};
use crate::reference::Reference;
use crate::store;

const SUFFIX_KEYWORDS: &[&str] = &["archive", "meta", "readme", "icon.svg", "diagram.svg", "expand-id"];

/// Splits `path` into the reference it addresses and the suffix segments
/// naming the operation, by scanning for the first recognized keyword.
fn split_reference_and_suffix(path: &str) -> Result<(Reference, Vec<String>)> {
    let mut segments: Vec<String> = path.split('/').filter(|s| !s.is_empty()).map(String::from).collect();
    if segments.is_empty() {
        return Err(StoreError::not_found("empty path"));
    }

    let mut ref_segments = Vec::new();
    if segments.first().map(|s| s.starts_with('~')).unwrap_or(false) {
        ref_segments.push(segments.remove(0));
    }

    let split_at = segments
        .iter()
        .position(|s| SUFFIX_KEYWORDS.contains(&s.as_str()))
        .ok_or_else(|| StoreError::not_found(format!("no recognized operation in {path}")))?;
    let suffix = segments.split_off(split_at);
    ref_segments.extend(segments);

    let reference = Reference::parse(&ref_segments.join("/")).map_err(StoreError::bad_request)?;
    Ok((reference, suffix))
}

async fn load_entity(
    state: &AppState,
    reference: &Reference,
    auth: &AuthContext,
) -> Result<(Entity, BaseEntity)> {
    let resolved = store::resolve(state.entities.as_ref(), reference, &auth.identity, &auth.groups).await?;
    let entity = state
        .entities
        .get_by_canonical(&resolved.canonical)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("entity \"{reference}\" not found")))?;
    let base = state
        .entities
        .get_base_entity(entity.canonical.user.as_deref(), &entity.canonical.name)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("entity \"{reference}\" not found")))?;
    Ok((entity, base))
}

fn meta_context<'a>(state: &'a AppState, auth: &'a AuthContext) -> MetaContext<'a> {
    MetaContext {
        entities: state.entities.as_ref(),
        blobs: state.blobs.as_ref(),
        stats: state.stats.as_ref(),
        identity: &auth.identity,
        groups: &auth.groups,
    }
}

fn archive_deps(state: &AppState) -> ArchiveDeps<'_> {
    ArchiveDeps {
        blobs: state.blobs.as_ref(),
        search: state.search.clone(),
        stats: state.stats.as_ref(),
    }
}

fn ingest_deps(state: &AppState) -> IngestDeps<'_> {
    IngestDeps {
        entities: state.entities.as_ref(),
        blobs: state.blobs.as_ref(),
        search: state.search.as_ref(),
        stats: state.stats.as_ref(),
    }
}

fn cache_headers(max_age: u64) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={max_age}")) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    headers
}

/// Rejects uploads whose `Content-Length` is unknown or whose declared
/// `Content-Type` isn't a zip archive.
fn validate_upload_headers(headers: &HeaderMap) -> Result<()> {
    headers
        .get(header::CONTENT_LENGTH)
        .ok_or_else(|| StoreError::bad_request("missing Content-Length header"))?;

    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        let content_type = content_type
            .to_str()
            .map_err(|_| StoreError::bad_request("invalid Content-Type header"))?;
        let mime = content_type.split(';').next().unwrap_or("").trim();
        if mime != "application/zip" {
            return Err(StoreError::bad_request(format!(
                "unsupported Content-Type \"{mime}\", expected application/zip"
            )));
        }
    }
    Ok(())
}

pub async fn get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    RawQuery(raw_query): RawQuery,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let (reference, suffix) = split_reference_and_suffix(&path)?;
    let pairs = parse_query_pairs(raw_query.as_deref());
    let query = query_map(&pairs);

    match suffix.first().map(String::as_str) {
        Some("archive") if suffix.len() == 1 => {
            let resolved = store::resolve(state.entities.as_ref(), &reference, &auth.identity, &auth.groups).await?;
            let entity = state
                .entities
                .get_by_canonical(&resolved.canonical)
                .await?
                .ok_or_else(|| StoreError::not_found(format!("entity \"{reference}\" not found")))?;
            let deps = archive_deps(&state);
            let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
            let (body, range_info) = archive::read_archive(&deps, &entity, range, false).await?;

            let mut response = Response::builder()
                .header(header::CONTENT_TYPE, "application/zip")
                .header("Content-Hash", entity.hash.to_string())
                .header("Entity-Id", entity.canonical.to_string())
                .header(header::CACHE_CONTROL, format!("public, max-age={}", archive::cache_max_age(&resolved)));

            response = match range_info {
                Some((start, end, total)) => response
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}"))
                    .header(header::CONTENT_LENGTH, (end - start + 1).to_string()),
                None => response.header(header::CONTENT_LENGTH, body.len().to_string()),
            };
            Ok(response.body(Body::from(body)).unwrap())
        }

        Some("archive") => {
            let resolved = store::resolve(state.entities.as_ref(), &reference, &auth.identity, &auth.groups).await?;
            let (entity, _) = load_entity(&state, &reference, &auth).await?;
            let bytes = state.blobs.get(&entity.blob_name).await?;
            let file_path = suffix[1..].join("/");
            let (data, content_type) = archive::extract_file(&bytes, &file_path)?;
            let mut response = Response::builder()
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(data))
                .unwrap();
            response.headers_mut().extend(cache_headers(archive::cache_max_age(&resolved)));
            Ok(response)
        }

        Some("readme") => {
            let resolved = store::resolve(state.entities.as_ref(), &reference, &auth.identity, &auth.groups).await?;
            let (entity, _) = load_entity(&state, &reference, &auth).await?;
            let bytes = state.blobs.get(&entity.blob_name).await?;
            let names = entity.manifest(&bytes)?;
            let readme_name = archive::find_readme(&names)
                .ok_or_else(|| StoreError::not_found("no readme in archive"))?;
            let (data, content_type) = archive::extract_file(&bytes, &readme_name)?;
            let mut response = Response::builder()
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(data))
                .unwrap();
            response.headers_mut().extend(cache_headers(archive::cache_max_age(&resolved)));
            Ok(response)
        }

        Some("icon.svg") => {
            let resolved = store::resolve(state.entities.as_ref(), &reference, &auth.identity, &auth.groups).await?;
            let (entity, _) = load_entity(&state, &reference, &auth).await?;
            let bytes = state.blobs.get(&entity.blob_name).await?;
            let svg = archive::charm_icon(&bytes);
            let mut response = Response::builder()
                .header(header::CONTENT_TYPE, "image/svg+xml")
                .body(Body::from(svg))
                .unwrap();
            response.headers_mut().extend(cache_headers(archive::cache_max_age(&resolved)));
            Ok(response)
        }

        Some("diagram.svg") => {
            let resolved = store::resolve(state.entities.as_ref(), &reference, &auth.identity, &auth.groups).await?;
            let (entity, _) = load_entity(&state, &reference, &auth).await?;
            let svg = archive::bundle_diagram(&entity.payload)?;
            let mut response = Response::builder()
                .header(header::CONTENT_TYPE, "image/svg+xml")
                .body(Body::from(svg))
                .unwrap();
            response.headers_mut().extend(cache_headers(archive::cache_max_age(&resolved)));
            Ok(response)
        }

        Some("expand-id") => {
            let base = state
                .entities
                .get_base_entity(reference.user.as_deref(), &reference.name)
                .await?
                .ok_or_else(|| StoreError::not_found(format!("entity \"{reference}\" not found")))?;
            if !auth.can_read(&base) {
                return Err(StoreError::not_found(format!("entity \"{reference}\" not found")));
            }
            let mut siblings = state
                .entities
                .list_by_base(reference.user.as_deref(), &reference.name)
                .await?;
            siblings.sort_by(|a, b| b.canonical.revision.cmp(&a.canonical.revision));
            let ids: Vec<serde_json::Value> = siblings
                .into_iter()
                .map(|e| json!({ "Id": e.canonical.to_string() }))
                .collect();
            Ok(Json(ids).into_response())
        }

        Some("meta") if suffix.len() >= 2 && suffix[1] == "any" => {
            let (entity, base) = load_entity(&state, &reference, &auth).await?;
            if !auth.can_read(&base) {
                return Err(StoreError::not_found(format!("entity \"{reference}\" not found")));
            }
            let includes = crate::api::routes::query_values(&pairs, "include");
            let ctx = meta_context(&state, &auth);
            let value = meta::get_any(&ctx, &entity, &base, &includes, &query).await?;
            Ok(Json(value).into_response())
        }

        Some("meta") if suffix.len() >= 2 => {
            let (entity, base) = load_entity(&state, &reference, &auth).await?;
            if !auth.can_read(&base) {
                return Err(StoreError::not_found(format!("entity \"{reference}\" not found")));
            }
            let name = &suffix[1];
            let tail = if suffix.len() > 2 { Some(suffix[2..].join("/")) } else { None };
            let ctx = meta_context(&state, &auth);
            let value = meta::get_meta(&ctx, &entity, &base, name, tail.as_deref(), &query).await?;
            Ok(Json(value).into_response())
        }

        _ => Err(StoreError::not_found(format!("unrecognized operation for \"{reference}\""))),
    }
}

pub async fn post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    RawQuery(raw_query): RawQuery,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let (reference, suffix) = split_reference_and_suffix(&path)?;
    if suffix != ["archive"] {
        return Err(StoreError::MethodNotAllowed(format!("POST not supported for {path}")));
    }
    validate_upload_headers(&headers)?;
    let pairs = parse_query_pairs(raw_query.as_deref());
    let query = query_map(&pairs);
    let hash = query
        .get("hash")
        .cloned()
        .ok_or_else(|| StoreError::bad_request("missing hash query parameter"))?;

    let deps = ingest_deps(&state);
    let resolved = ingest::post_archive(&deps, &auth, reference, hash, body.to_vec()).await?;
    Ok((StatusCode::OK, Json(json!({ "Id": resolved.preferred().to_string() }))).into_response())
}

pub async fn put(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    RawQuery(raw_query): RawQuery,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let (reference, suffix) = split_reference_and_suffix(&path)?;

    if suffix == ["archive"] {
        validate_upload_headers(&headers)?;
        let pairs = parse_query_pairs(raw_query.as_deref());
        let query = query_map(&pairs);
        let hash = query
            .get("hash")
            .cloned()
            .ok_or_else(|| StoreError::bad_request("missing hash query parameter"))?;
        let promulgated = match query.get("promulgated") {
            Some(p) => Some(Reference::parse(p).map_err(StoreError::bad_request)?),
            None => None,
        };
        let deps = ingest_deps(&state);
        let resolved = ingest::put_archive(&deps, &auth, reference, hash, body.to_vec(), promulgated).await?;
        return Ok((StatusCode::OK, Json(json!({ "Id": resolved.preferred().to_string() }))).into_response());
    }

    if suffix.first().map(String::as_str) == Some("meta") && suffix.len() >= 2 {
        let (mut entity, mut base) = load_entity(&state, &reference, &auth).await?;
        if !auth.can_write(&base) {
            return Err(StoreError::Forbidden(format!("no write access to \"{reference}\"")));
        }
        let name = &suffix[1];
        let tail = if suffix.len() > 2 { Some(suffix[2..].join("/")) } else { None };
        let value: serde_json::Value = serde_json::from_slice(&body)?;
        meta::put_meta(&mut entity, &mut base, name, tail.as_deref(), value).await?;
        state.entities.update(entity).await?;
        state.entities.put_base_entity(base).await?;
        return Ok(StatusCode::OK.into_response());
    }

    Err(StoreError::MethodNotAllowed(format!("PUT not supported for {path}")))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(path): Path<String>,
) -> Result<Response> {
    let (reference, suffix) = split_reference_and_suffix(&path)?;
    if suffix != ["archive"] {
        return Err(StoreError::MethodNotAllowed(format!("DELETE not supported for {path}")));
    }
    let deps = ingest_deps(&state);
    ingest::delete_archive(&deps, &auth, &reference).await?;
    Ok(StatusCode::OK.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_promulgated_archive_reference() {
        let (reference, suffix) = split_reference_and_suffix("precise/wordpress-0/archive").unwrap();
        assert_eq!(reference.name, "wordpress");
        assert_eq!(suffix, vec!["archive".to_string()]);
    }

    #[test]
    fn splits_owned_reference_with_file_path() {
        let (reference, suffix) = split_reference_and_suffix("~charmers/precise/wordpress-0/archive/hooks/install").unwrap();
        assert_eq!(reference.user.as_deref(), Some("charmers"));
        assert_eq!(suffix, vec!["archive", "hooks", "install"]);
    }

    #[test]
    fn splits_meta_with_tail() {
        let (_, suffix) = split_reference_and_suffix("~charmers/precise/wordpress-0/meta/extra-info/vcs-revision").unwrap();
        assert_eq!(suffix, vec!["meta", "extra-info", "vcs-revision"]);
    }

    #[test]
    fn rejects_path_with_no_recognized_operation() {
        assert!(split_reference_and_suffix("~charmers/precise/wordpress-0").is_err());
    }
}
