//! The HTTP API: route handlers, shared state, and the middleware stack
//! that sits between them, per the external-interfaces section of the
//! design (all routes rooted at `/v4`).
//!
//! ```no_run
//! use charmstore::api::{ApiServer, ApiConfig};
//!
//! # async fn run() -> charmstore::Result<()> {
//! let server = ApiServer::new(ApiConfig::from_env());
//! server.run().await
//! # }
//! ```

pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;
pub mod types;

pub use server::{ApiConfig, ApiServer};
pub use state::AppState;
