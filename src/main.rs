use mtb_core::config::SETTINGS_ENV_VAR;
use mtb_core::{MtbService, Settings};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point of the MTB bridge.
///
/// Reads the settings file once, wires the FHIR repository, gene and publication lookups and the
/// optional HL7 v2 receiver, then serves the REST API until interrupted.
///
/// # Settings
/// The settings path is the first argument, else `MTB_SETTINGS`, else `settings.yaml`.
///
/// # Returns
/// * `Ok(())` - If the server shuts down cleanly
/// * `Err(anyhow::Error)` - If settings are invalid or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mtb=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = Settings::resolve_path(std::env::args().nth(1), std::env::var(SETTINGS_ENV_VAR).ok());
    tracing::info!("++ Loading settings from {}", path.display());
    let settings = Settings::load(&path)?;
    let addr = format!("{}:{}", settings.bind_address, settings.port);

    let service = tokio::task::spawn_blocking(move || MtbService::from_settings(&settings)).await??;
    let app = api_rest::router(Arc::new(service));

    tracing::info!("++ Starting MTB REST on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("-- Shutting down");
        })
        .await?;

    Ok(())
}
