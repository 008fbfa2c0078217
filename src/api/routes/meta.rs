//! The top-level bulk metadata fan-out: `GET meta/<name>?id=a&id=b`, kept
//! separate from the ref-scoped dispatch in [`crate::api::routes::entity`]
//! because it addresses a list of references instead of one.

use axum::extract::{Extension, Path, RawQuery, State};
use axum::response::{IntoResponse, Json, Response};

use crate::api::routes::{parse_query_pairs, query_map, query_values};
use crate::api::state::AppState;
use crate::auth::AuthContext;
use crate::error::{Result, StoreError};
use crate::meta::{self, MetaContext};
use crate::reference::Reference;

pub async fn bulk(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(name): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response> {
    let pairs = parse_query_pairs(raw_query.as_deref());
    let ids = query_values(&pairs, "id");
    if ids.is_empty() {
        return Err(StoreError::bad_request("at least one id= parameter is required"));
    }
    let references: Vec<Reference> = ids
        .iter()
        .map(|id| Reference::parse(id).map_err(StoreError::bad_request))
        .collect::<Result<_>>()?;

    let query = query_map(&pairs);
    let ctx = MetaContext {
        entities: state.entities.as_ref(),
        blobs: state.blobs.as_ref(),
        stats: state.stats.as_ref(),
        identity: &auth.identity,
        groups: &auth.groups,
    };

    let out = meta::get_bulk(&ctx, &name, &references, &query, state.config.max_concurrency).await?;
    Ok(Json(out).into_response())
}
