//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the REST router on its own, reading the same settings file as `mtb-run`.
//!
//! ## Intended use
//! Development and debugging with the Swagger UI at `/swagger-ui`.

use mtb_core::config::SETTINGS_ENV_VAR;
use mtb_core::{MtbService, Settings};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// `RUST_LOG` plus info level for this crate and the mapping core.
fn env_filter() -> anyhow::Result<EnvFilter> {
    Ok(EnvFilter::from_default_env()
        .add_directive("mtb_core=info".parse()?)
        .add_directive("api_rest=info".parse()?))
}

/// # Errors
/// Returns an error if:
/// - the logging configuration cannot be initialised,
/// - the settings file cannot be read or is invalid,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(env_filter()?)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = Settings::resolve_path(std::env::args().nth(1), std::env::var(SETTINGS_ENV_VAR).ok());
    let settings = Settings::load(&path)?;
    let addr = format!("{}:{}", settings.bind_address, settings.port);

    let service = tokio::task::spawn_blocking(move || MtbService::from_settings(&settings)).await??;

    tracing::info!("-- Starting MTB REST API on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, api_rest::router(Arc::new(service))).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_events_are_logged_by_default() {
        let filter = env_filter().unwrap().to_string();
        assert!(filter.contains("mtb_core=info"));
        assert!(filter.contains("api_rest=info"));
    }
}
