//! Namespaced document store server
//!
//! Serves the levels and websites collections over HTTP. See
//! [`nsdoc::config`] for the environment variables it reads.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use nsdoc::config::ServiceConfig;
use nsdoc::http::run_server;
use nsdoc::observability::init_tracing;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = ServiceConfig::from_env()?;
    init_tracing(config.log_json)?;

    info!(
        "Starting nsdoc {} on port {} ({:?} store)",
        env!("CARGO_PKG_VERSION"),
        config.port,
        config.store.store_type
    );

    run_server(config).await
}
