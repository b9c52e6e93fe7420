//! Nimbus.
//!
//! Nimbus is a small web service proxying a third-party weather API. It normalizes the responses
//! of WeatherAPI.com and Open-Meteo into one schema, and caches them so that concurrent and
//! repeated requests for the same data only reach the upstream API once.

#![warn(
    missing_debug_implementations,
    unused_crate_dependencies,
    clippy::all
)]

mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod server;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
