//! `GET macaroon`: issues a discharge-required macaroon for clients to
//! take to the third-party identity service.

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};

use crate::api::state::AppState;
use crate::auth;

pub async fn issue(State(state): State<AppState>) -> Response {
    Json(auth::issue_macaroon(&state.config)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issue_returns_a_macaroon_body() {
        let state = AppState::new();
        let response = issue(State(state)).await;
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
