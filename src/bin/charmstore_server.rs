//! Process entry point: wires up tracing, reads configuration from the
//! environment, and runs the API server until the process is signaled
//! to stop.

use charmstore::api::{ApiConfig, ApiServer};
use charmstore::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("charmstore=info,tower_http=info")))
        .init();

    let server = ApiServer::new(ApiConfig::from_env());

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };

    server.run_until(shutdown).await
}
