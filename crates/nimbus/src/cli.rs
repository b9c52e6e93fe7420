//! Exposes the command line application.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nimbus_service::config::Config;
use nimbus_service::metrics;

use crate::healthcheck;
use crate::logging;
use crate::server;

/// Nimbus commands.
#[derive(Subcommand)]
enum Command {
    /// Run the web server.
    Run,

    /// Check the health of a running nimbus.
    Healthcheck {
        /// The address of the server to check. Defaults to `bind` from the config.
        #[arg(long, value_name = "ADDR")]
        addr: Option<SocketAddr>,

        /// How long to wait for an answer, e.g. `5s`.
        #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
        timeout: Duration,
    },
}

/// Command line interface parser.
#[derive(Parser)]
#[command(bin_name = "nimbus", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        session_mode: sentry::SessionMode::Request,
        auto_session_tracking: false,
        ..Default::default()
    });

    // SAFETY: we are still single-threaded at this point
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();

        if let Some(hostname_tag) = config.metrics.hostname_tag.clone() {
            if tags.contains_key(&hostname_tag) {
                tracing::warn!(
                    "tag {} defined both as hostname tag and as a custom tag",
                    hostname_tag
                );
            }
            if let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
                tags.insert(hostname_tag, hostname);
            } else {
                tracing::error!("could not read host name");
            }
        }

        metrics::configure_statsd(&config.metrics.prefix, statsd, tags)
            .context("failed to configure metrics")?;
    }

    match cli.command {
        Command::Run => server::run(config).context("failed to start the server")?,
        Command::Healthcheck { addr, timeout } => {
            healthcheck::healthcheck(&config, addr, timeout).context("healthcheck failed")?
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_args() {
        let cli = Cli::parse_from(["nimbus", "-c", "nimbus.yml", "run"]);
        assert_eq!(cli.config(), Some(Path::new("nimbus.yml")));
        assert!(matches!(cli.command, Command::Run));

        let cli = Cli::parse_from(["nimbus", "healthcheck", "--addr", "127.0.0.1:4000"]);
        assert_eq!(cli.config(), None);
        assert!(matches!(
            cli.command,
            Command::Healthcheck { addr: Some(addr), timeout } if addr.port() == 4000
                && timeout == Duration::from_secs(10)
        ));

        let cli = Cli::parse_from(["nimbus", "healthcheck", "--timeout", "500ms"]);
        assert!(matches!(
            cli.command,
            Command::Healthcheck { addr: None, timeout } if timeout == Duration::from_millis(500)
        ));
    }
}
