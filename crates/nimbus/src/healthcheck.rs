use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, bail};
use nimbus_service::config::Config;

/// Asks a running nimbus whether it is healthy.
///
/// Without an explicit `addr`, the server is expected at the configured `bind` address.
pub fn healthcheck(
    config: &Config,
    addr: Option<SocketAddr>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let addr = match addr {
        Some(addr) => addr,
        None => config
            .bind
            .parse()
            .with_context(|| format!("invalid bind address `{}`", config.bind))?,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()?;

    let url = format!("http://{addr}/healthcheck");
    tracing::debug!("Checking health at {}", url);

    let response = client
        .get(&url)
        .send()
        .with_context(|| format!("nimbus at {addr} is unreachable"))?;

    let status = response.status();
    if !status.is_success() {
        bail!("nimbus at {addr} is unhealthy: {status}");
    }

    let body = response.text()?;
    if body.trim() != "ok" {
        bail!("nimbus at {addr} answered the healthcheck with {body:?}");
    }

    println!("OK");
    Ok(())
}
