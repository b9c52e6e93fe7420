use std::net::SocketAddr;

use anyhow::{Context, Result};
use nimbus_service::config::Config;
use nimbus_service::metric;
use nimbus_service::services::WeatherService;

use crate::endpoints;

/// Creates the weather service and serves the HTTP API on the configured address.
pub fn run(config: Config) -> Result<()> {
    // Log this metric before actually starting the server. This allows to see restarts even if
    // service creation fails.
    metric!(counter("server.starting") += 1);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("nimbus-web")
        .enable_all()
        .build()?;

    let socket = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid bind address `{}`", config.bind))?;

    // the cache sweepers need a runtime to be spawned onto
    let service = runtime
        .block_on(async { WeatherService::create(&config) })
        .context("failed to create the weather service")?;

    tracing::info!("Starting HTTP server on {}", socket);
    let app = endpoints::create_app(service, &config.http);
    // rate limits are tracked per client address
    let app = app.into_make_service_with_connect_info::<SocketAddr>();
    runtime.block_on(axum_server::bind(socket).serve(app))?;
    tracing::info!("System shutdown complete");

    Ok(())
}
