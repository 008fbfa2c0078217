//! Route wiring: every handler lives in its own module grouped the way
//! §6's URL table groups them; this file only nests them under `/v4`.

pub mod debug;
pub mod entity;
pub mod macaroon;
pub mod meta;
pub mod search;
pub mod stats;

use axum::routing::{get, put};
use axum::Router;

use crate::api::state::AppState;

pub fn api_router(state: AppState) -> Router {
    let v4 = Router::new()
        .route("/search", get(search::search))
        .route("/list", get(search::list))
        .route("/log", get(stats::get_log).post(stats::post_log))
        .route("/stats/counter/*key", get(stats::counter))
        .route("/stats/update", put(stats::update))
        .route("/debug/status", get(debug::status))
        .route("/debug/info", get(debug::info))
        .route("/macaroon", get(macaroon::issue))
        .route("/meta/:name", get(meta::bulk))
        .route(
            "/*path",
            get(entity::get)
                .post(entity::post)
                .put(entity::put)
                .delete(entity::delete),
        )
        .with_state(state);

    Router::new().nest("/v4", v4)
}

/// Parses a raw query string into ordered `(key, value)` pairs,
/// preserving duplicates -- `axum::extract::Query` collapses repeated
/// keys into a `HashMap` and loses the rest, which `id=`/`include=`
/// fan-out needs.
pub(crate) fn parse_query_pairs(raw: Option<&str>) -> Vec<(String, String)> {
    match raw {
        Some(raw) => serde_urlencoded::from_str(raw).unwrap_or_default(),
        None => Vec::new(),
    }
}

pub(crate) fn query_values(pairs: &[(String, String)], key: &str) -> Vec<String> {
    pairs.iter().filter(|(k, _)| k == key).map(|(_, v)| v.clone()).collect()
}

pub(crate) fn query_map(pairs: &[(String, String)]) -> std::collections::HashMap<String, String> {
    pairs.iter().cloned().collect()
}
