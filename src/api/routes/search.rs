//! `GET search` and `GET list` (§4.8): shared filter parsing, differing
//! only in the default sort -- `search` ranks by download popularity,
//! `list` is purely the requested sort keys (or stable name order).

use axum::extract::{Extension, RawQuery, State};
use axum::response::{IntoResponse, Json, Response};

use crate::api::routes::{parse_query_pairs, query_values};
use crate::api::state::AppState;
use crate::api::types::{SearchResponse, SearchResultItem};
use crate::auth::AuthContext;
use crate::entity::{BaseEntity, Entity};
use crate::error::Result;
use crate::meta::{self, MetaContext};
use crate::search::SearchFilters;

fn parse_filters(pairs: &[(String, String)]) -> SearchFilters {
    let get = |key: &str| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
    SearchFilters {
        text: get("text"),
        name: get("name"),
        owner: get("owner"),
        series: get("series"),
        provides: get("provides"),
        requires: get("requires"),
        tags: get("tags"),
        summary: get("summary"),
        description: get("description"),
        entity_type: get("type"),
        promulgated: get("promulgated").map(|v| v == "1"),
        skip: get("skip").and_then(|v| v.parse().ok()).unwrap_or(0),
        limit: get("limit").and_then(|v| v.parse().ok()).unwrap_or(usize::MAX),
        sort: query_values(pairs, "sort"),
    }
}

async fn decorate_with_meta(
    state: &AppState,
    auth: &AuthContext,
    item: &mut SearchResultItem,
    entity: &Entity,
    base: &BaseEntity,
    includes: &[String],
) -> Result<()> {
    let ctx = MetaContext {
        entities: state.entities.as_ref(),
        blobs: state.blobs.as_ref(),
        stats: state.stats.as_ref(),
        identity: &auth.identity,
        groups: &auth.groups,
    };
    let value = meta::get_any(&ctx, entity, base, includes, &Default::default()).await?;
    item.meta = Some(value);
    Ok(())
}

async fn run_query(
    state: &AppState,
    auth: &AuthContext,
    filters: SearchFilters,
    includes: Vec<String>,
) -> Result<SearchResponse> {
    let docs = state.search.query(&filters, &auth.identity, &auth.groups).await?;
    let total = docs.len();
    let mut results = Vec::with_capacity(docs.len());
    for doc in &docs {
        let mut item = SearchResultItem::from_document(doc);
        if !includes.is_empty() {
            if let Some(entity) = state.entities.get_by_canonical(&doc.reference).await? {
                if let Some(base) = state
                    .entities
                    .get_base_entity(entity.canonical.user.as_deref(), &entity.canonical.name)
                    .await?
                {
                    decorate_with_meta(state, auth, &mut item, &entity, &base, &includes).await?;
                }
            }
        }
        results.push(item);
    }
    Ok(SearchResponse { results, total })
}

/// `GET search`: relevance-ranked by download popularity when no
/// explicit sort is given.
pub async fn search(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response> {
    let pairs = parse_query_pairs(raw_query.as_deref());
    let filters = parse_filters(&pairs);
    let includes = query_values(&pairs, "include");
    let response = run_query(&state, &auth, filters, includes).await?;
    Ok(Json(response).into_response())
}

/// `GET list`: same filters as `search`, but with no relevance scoring
/// -- an absent sort falls back to a stable name order instead of the
/// download-popularity default.
pub async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response> {
    let pairs = parse_query_pairs(raw_query.as_deref());
    let mut filters = parse_filters(&pairs);
    if filters.sort.is_empty() {
        filters.sort = vec!["name".to_string()];
    }
    let includes = query_values(&pairs, "include");
    let response = run_query(&state, &auth, filters, includes).await?;
    Ok(Json(response).into_response())
}
