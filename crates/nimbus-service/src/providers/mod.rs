//! Upstream weather APIs.
//!
//! A [`WeatherProvider`] fetches weather data from a third-party API and normalizes it into the
//! [`types`](crate::types) schema. Providers do not cache anything themselves; that is the job of
//! the [`WeatherService`](crate::services::WeatherService).

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{StatusCode, Url, header};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::{ProviderConfig, ProviderKind};
use crate::location::{Location, LocationError};
use crate::types::{CitySearchResult, CurrentWeather, DayReport, Forecast};

mod openmeteo;
mod weatherapi;

pub use openmeteo::OpenMeteoProvider;
pub use weatherapi::WeatherApiProvider;

const USER_AGENT: &str = concat!("nimbus/", env!("CARGO_PKG_VERSION"));

/// An error fetching data from a [`WeatherProvider`].
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested location can not be looked up.
    #[error("invalid location")]
    InvalidLocation(#[from] LocationError),

    /// The provider does not know the requested city.
    #[error("city not found: {0}")]
    NotFound(String),

    /// The provider has no API for the requested data.
    #[error("{operation} is not supported by {provider}")]
    Unsupported {
        provider: &'static str,
        operation: &'static str,
    },

    /// The provider answered with an error status.
    #[error("upstream responded with {status}")]
    Upstream { status: StatusCode, body: String },

    /// The request did not go through.
    #[error("failed to send upstream request")]
    Request(#[source] reqwest::Error),

    /// The response did not have the expected shape.
    #[error("malformed upstream response")]
    Malformed(#[source] Box<dyn Error + Send + Sync>),
}

impl ProviderError {
    pub(crate) fn malformed<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        Self::Malformed(err.into())
    }
}

/// A third-party weather API.
#[async_trait]
pub trait WeatherProvider: Send + Sync + fmt::Debug {
    /// A short name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// The current conditions at `location`.
    async fn current(&self, location: &Location) -> Result<CurrentWeather, ProviderError>;

    /// The largest number of days [`forecast`](Self::forecast) covers.
    fn max_forecast_days(&self) -> u32;

    /// A forecast for the next `days` days, including hourly entries.
    ///
    /// Providers clamp `days` to `1..=max_forecast_days()`.
    async fn forecast(&self, location: &Location, days: u32) -> Result<Forecast, ProviderError>;

    /// The weather on a past day.
    async fn historical(
        &self,
        location: &Location,
        date: NaiveDate,
    ) -> Result<DayReport, ProviderError>;

    /// The expected weather on a day beyond the forecast range.
    async fn future(&self, location: &Location, date: NaiveDate)
    -> Result<DayReport, ProviderError>;

    /// Up to `limit` cities matching `query`.
    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CitySearchResult>, ProviderError>;
}

/// Creates the provider selected in the config.
pub fn create_provider(config: &ProviderConfig) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let client = create_client(config)?;
    let provider: Arc<dyn WeatherProvider> = match config.kind {
        ProviderKind::WeatherApi => {
            let api_key = config
                .api_key
                .clone()
                .context("the weatherapi provider requires an `api_key`")?;
            Arc::new(WeatherApiProvider::new(
                client,
                &config.weatherapi_url,
                api_key,
            )?)
        }
        ProviderKind::OpenMeteo => Arc::new(OpenMeteoProvider::new(
            client,
            &config.openmeteo_url,
            &config.geocoding_url,
        )?),
    };
    tracing::info!("Using {} as weather provider", provider.name());
    Ok(provider)
}

/// Creates a [`reqwest::Client`] with the configured timeouts.
pub fn create_client(config: &ProviderConfig) -> anyhow::Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .gzip(true)
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .user_agent(USER_AGENT)
        .build()
        .context("failed to create HTTP client")
}

/// Parses a base URL that relative endpoint paths can be joined onto.
fn base_url(url: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(url).with_context(|| format!("invalid base URL `{url}`"))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Sends a request and parses the JSON response.
///
/// `endpoint` only names the request in logs and metrics.
async fn fetch_json<T: DeserializeOwned>(
    provider: &'static str,
    endpoint: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let start = Instant::now();
    let result = request
        .header(header::ACCEPT, "application/json")
        .send()
        .await;
    metric!(
        timer("upstream.duration") = start.elapsed(),
        "provider" => provider,
        "endpoint" => endpoint,
    );

    let response = result.map_err(ProviderError::Request)?;
    let status = response.status();
    metric!(
        counter("upstream.status_code") += 1,
        "provider" => provider,
        "status" => status.as_str(),
    );

    if !status.is_success() {
        tracing::debug!("Unexpected status code from {} {}: {}", provider, endpoint, status);
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Upstream { status, body });
    }

    let body = response.bytes().await.map_err(ProviderError::Request)?;
    tracing::trace!("Fetched {} bytes from {} {}", body.len(), provider, endpoint);
    serde_json::from_slice(&body).map_err(ProviderError::malformed)
}

/// Reads the `index`th value of a column in a column-oriented response.
fn column<T: Clone>(values: &[T], index: usize, name: &'static str) -> Result<T, ProviderError> {
    values
        .get(index)
        .cloned()
        .ok_or_else(|| ProviderError::malformed(format!("column `{name}` is too short")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        let url = base_url("https://api.weatherapi.com/v1").unwrap();
        assert_eq!(
            url.join("current.json").unwrap().as_str(),
            "https://api.weatherapi.com/v1/current.json"
        );

        let url = base_url("http://localhost:1234/").unwrap();
        assert_eq!(
            url.join("search").unwrap().as_str(),
            "http://localhost:1234/search"
        );

        assert!(base_url("not a url").is_err());
    }

    #[test]
    fn test_column() {
        let values = [1, 2, 3];
        assert_eq!(column(&values, 2, "values").unwrap(), 3);
        assert!(matches!(
            column(&values, 3, "values"),
            Err(ProviderError::Malformed(_))
        ));
    }

    #[test]
    fn test_weatherapi_requires_key() {
        let config = ProviderConfig {
            kind: ProviderKind::WeatherApi,
            api_key: None,
            ..Default::default()
        };
        let err = create_provider(&config).unwrap_err();
        assert!(err.to_string().contains("api_key"));
    }
}
