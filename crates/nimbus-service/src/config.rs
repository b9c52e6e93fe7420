use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::caching::{CacheName, StoreConfig};

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for nimbus.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "nimbus".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Expiration settings of one cache as written in the config file.
///
/// Omitted fields fall back to the defaults of the respective cache.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
struct StoreConfigOverrides {
    #[serde(with = "humantime_serde")]
    default_ttl: Option<Duration>,
    #[serde(with = "humantime_serde")]
    sweep_interval: Option<Duration>,
}

impl StoreConfigOverrides {
    fn apply(self, default_ttl: Duration) -> StoreConfig {
        StoreConfig {
            default_ttl: self.default_ttl.unwrap_or(default_ttl),
            sweep_interval: self.sweep_interval,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct RawCacheConfigs {
    current: StoreConfigOverrides,
    forecast: StoreConfigOverrides,
    hourly: StoreConfigOverrides,
    historical: StoreConfigOverrides,
    future: StoreConfigOverrides,
    search: StoreConfigOverrides,
}

/// Expiration settings of all weather caches.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(from = "RawCacheConfigs")]
pub struct CacheConfigs {
    /// Current conditions, one minute by default.
    pub current: StoreConfig,
    /// Multi-day forecasts, two minutes by default.
    pub forecast: StoreConfig,
    /// Hourly forecasts, two minutes by default.
    pub hourly: StoreConfig,
    /// Past days. These do not change anymore, so they are kept for an hour.
    pub historical: StoreConfig,
    /// Days further out than the forecast range, five minutes by default.
    pub future: StoreConfig,
    /// City search results, five minutes by default.
    pub search: StoreConfig,
}

impl CacheConfigs {
    /// Returns the settings of the cache with the given name.
    pub fn get(&self, name: CacheName) -> &StoreConfig {
        match name {
            CacheName::Current => &self.current,
            CacheName::Forecast => &self.forecast,
            CacheName::Hourly => &self.hourly,
            CacheName::Historical => &self.historical,
            CacheName::Future => &self.future,
            CacheName::Search => &self.search,
        }
    }
}

impl From<RawCacheConfigs> for CacheConfigs {
    fn from(raw: RawCacheConfigs) -> Self {
        CacheConfigs {
            current: raw.current.apply(Duration::from_secs(60)),
            forecast: raw.forecast.apply(Duration::from_secs(120)),
            hourly: raw.hourly.apply(Duration::from_secs(120)),
            historical: raw.historical.apply(Duration::from_secs(3600)),
            future: raw.future.apply(Duration::from_secs(300)),
            search: raw.search.apply(Duration::from_secs(300)),
        }
    }
}

impl Default for CacheConfigs {
    fn default() -> Self {
        RawCacheConfigs::default().into()
    }
}

/// The upstream weather API to proxy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// WeatherAPI.com, requires an API key.
    WeatherApi,
    /// Open-Meteo, free and keyless.
    OpenMeteo,
}

/// Configures the upstream weather API.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Which provider to use.
    pub kind: ProviderKind,

    /// The WeatherAPI.com API key.
    ///
    /// Defaults to the `WEATHER_API_KEY` environment variable. It is only ever sent upstream.
    pub api_key: Option<String>,

    /// Base URL of the WeatherAPI.com API.
    pub weatherapi_url: String,

    /// Base URL of the Open-Meteo forecast API.
    pub openmeteo_url: String,

    /// Base URL of the Open-Meteo geocoding API.
    pub geocoding_url: String,

    /// The timeout for establishing a connection to the provider.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// The timeout for a whole upstream request, including reading the response.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .field("weatherapi_url", &self.weatherapi_url)
            .field("openmeteo_url", &self.openmeteo_url)
            .field("geocoding_url", &self.geocoding_url)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            kind: ProviderKind::OpenMeteo,
            api_key: env::var("WEATHER_API_KEY").ok().filter(|key| !key.is_empty()),
            weatherapi_url: "https://api.weatherapi.com/v1/".into(),
            openmeteo_url: "https://api.open-meteo.com/v1/".into(),
            geocoding_url: "https://geocoding-api.open-meteo.com/v1/".into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Limits how many requests a single client may send within a sliding time window.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub struct RateLimit {
    /// The length of the window.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Requests allowed per client and window. `0` disables the limit.
    pub max_requests: u32,
}

/// Configures the HTTP API in front of the caches.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Origins which may call the API from a browser.
    ///
    /// When empty, every origin is allowed but credentials are not.
    pub cors_origins: Vec<String>,

    /// Limit for all requests below `/api/`.
    pub api_rate_limit: RateLimit,

    /// Additional limit for requests below `/api/weather/`.
    ///
    /// This is more generous than the general limit, since most weather requests are answered
    /// from the cache.
    pub weather_rate_limit: RateLimit,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            cors_origins: Vec::new(),
            api_rate_limit: RateLimit {
                window: Duration::from_secs(15 * 60),
                max_requests: 100,
            },
            weather_rate_limit: RateLimit {
                window: Duration::from_secs(60),
                max_requests: 200,
            },
        }
    }
}

/// The nimbus configuration, usually read from a YAML file.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Fine-tune cache expiry
    pub caches: CacheConfigs,

    /// The upstream weather API.
    pub provider: ProviderConfig,

    /// CORS and rate limits of the HTTP API.
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1:4000".to_owned(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            caches: CacheConfigs::default(),
            provider: ProviderConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
