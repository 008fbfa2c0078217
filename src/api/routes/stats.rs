//! `stats/counter/...`, `stats/update`, and the ingestion log (`log`).

use axum::extract::{Extension, Path, Query, RawQuery, State};
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;

use crate::api::routes::parse_query_pairs;
use crate::api::state::AppState;
use crate::api::types::StatsUpdateEntry;
use crate::auth::AuthContext;
use crate::error::{Result, StoreError};
use crate::logstore::{LogEntry, LogLevel};
use crate::stats::Bucket;

fn key_to_parts(key: &str) -> Vec<String> {
    key.trim_end_matches(":*").split(':').map(String::from).collect()
}

/// `GET stats/counter/<key>[:*]?list=1&by=day|week&start=...&stop=...`
pub async fn counter(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response> {
    let parts = key_to_parts(&key);
    let is_prefix_query = key.ends_with(":*") || query.get("list").map(|v| v == "1").unwrap_or(false);

    if let (Some(by), Some(start), Some(stop)) = (query.get("by"), query.get("start"), query.get("stop")) {
        let bucket = match by.as_str() {
            "day" => Bucket::Day,
            "week" => Bucket::Week,
            other => return Err(StoreError::bad_request(format!("unknown bucket kind {other}"))),
        };
        let start: DateTime<Utc> = start.parse().map_err(|_| StoreError::bad_request("invalid start timestamp"))?;
        let stop: DateTime<Utc> = stop.parse().map_err(|_| StoreError::bad_request("invalid stop timestamp"))?;
        let buckets = state.stats.buckets(&parts, bucket, start, stop).await;
        let body: Vec<_> = buckets.into_iter().map(|(at, count)| json!({ "Date": at, "Count": count })).collect();
        return Ok(Json(body).into_response());
    }

    if is_prefix_query {
        let entries = state.stats.list_by_prefix(&parts).await;
        let body: Vec<_> = entries
            .into_iter()
            .map(|(parts, count)| json!({ "Key": parts.join(":"), "Count": count }))
            .collect();
        return Ok(Json(body).into_response());
    }

    let total = state.stats.total(&parts).await;
    Ok(Json(json!({ "Count": total })).into_response())
}

/// `PUT stats/update` (admin-only): bulk backfill, bypassing the live
/// enqueue path so a large import cannot overflow the counter queue.
pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(entries): Json<Vec<StatsUpdateEntry>>,
) -> Result<Response> {
    if !auth.is_admin {
        return Err(StoreError::Forbidden("stats/update requires admin credentials".to_string()));
    }
    let parsed = entries
        .into_iter()
        .map(|e| (key_to_parts(&e.key), e.count, e.timestamp))
        .collect();
    state.stats.bulk_update(parsed).await;
    Ok(axum::http::StatusCode::OK.into_response())
}

/// `GET log?limit=&level=`
pub async fn get_log(State(state): State<AppState>, RawQuery(raw_query): RawQuery) -> Result<Response> {
    let pairs = parse_query_pairs(raw_query.as_deref());
    let get = |key: &str| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());
    let limit: usize = get("limit").and_then(|v| v.parse().ok()).unwrap_or(50);
    let level = match get("level").as_deref() {
        Some("info") => Some(LogLevel::Info),
        Some("warning") => Some(LogLevel::Warning),
        Some("error") => Some(LogLevel::Error),
        _ => None,
    };
    let entries = state.logs.recent(limit, level).await?;
    Ok(Json(entries).into_response())
}

/// `POST log` (admin-only): append a single structured entry, used by
/// bulk-import tooling to record provenance without going through the
/// ingest pipeline.
pub async fn post_log(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(entry): Json<LogEntry>,
) -> Result<Response> {
    if !auth.is_admin {
        return Err(StoreError::Forbidden("log append requires admin credentials".to_string()));
    }
    state.logs.append(entry).await?;
    Ok(axum::http::StatusCode::OK.into_response())
}
