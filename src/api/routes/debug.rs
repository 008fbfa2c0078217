//! `debug/status` and `debug/info`: the one-key-per-dependency health
//! check and static build metadata, grounded on the readiness-probe
//! pattern of checking every collaborator independently and folding the
//! results into a single overall boolean.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::api::state::AppState;
use crate::search::SearchFilters;

pub async fn status(State(state): State<AppState>) -> Response {
    let entities_ok = state.entities.all().await.is_ok();
    let blobs_ok = state.blobs.exists("__debug_status_probe__").await.is_ok();
    let search_ok = state
        .search
        .query(&SearchFilters::default(), crate::auth::ADMIN_IDENTITY, &[])
        .await
        .is_ok();
    let logs_ok = state.logs.recent(1, None).await.is_ok();

    let overall = entities_ok && blobs_ok && search_ok && logs_ok;
    let body = json!({
        "entity_store": entities_ok,
        "blob_store": blobs_ok,
        "search_index": search_ok,
        "log_store": logs_ok,
        "ok": overall,
    });

    let status = if overall { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body)).into_response()
}

pub async fn info() -> Response {
    Json(json!({
        "Name": env!("CARGO_PKG_NAME"),
        "Version": env!("CARGO_PKG_VERSION"),
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_is_ok_for_a_fresh_in_memory_state() {
        let state = AppState::new();
        let response = status(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
