//! The weather service, putting caches in front of a [`WeatherProvider`].

use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::caching::{
    CacheError, CacheName, CacheStats, Clock, CoalescingStore, ProducerError, SweeperHandle,
    SystemClock,
};
use crate::config::{CacheConfigs, Config};
use crate::location::Location;
use crate::providers::{self, ProviderError, WeatherProvider};
use crate::types::{CitySearchResult, CurrentWeather, DayReport, Forecast, HourlyForecast};

/// Hourly forecasts are cut from a forecast of this many days.
pub const HOURLY_FORECAST_DAYS: u32 = 3;

/// The largest number of hours an hourly forecast covers.
pub const MAX_FORECAST_HOURS: usize = HOURLY_FORECAST_DAYS as usize * 24;

/// One cache per kind of upstream request.
#[derive(Debug, Clone)]
pub struct Caches {
    pub current: CoalescingStore<CurrentWeather>,
    pub forecast: CoalescingStore<Forecast>,
    pub hourly: CoalescingStore<HourlyForecast>,
    pub historical: CoalescingStore<DayReport>,
    pub future: CoalescingStore<DayReport>,
    pub search: CoalescingStore<Vec<CitySearchResult>>,
}

impl Caches {
    pub fn new(config: &CacheConfigs) -> Result<Self, CacheError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates all caches, checking expiration against the given clock.
    pub fn with_clock(config: &CacheConfigs, clock: Arc<dyn Clock>) -> Result<Self, CacheError> {
        fn store<V>(
            config: &CacheConfigs,
            name: CacheName,
            clock: &Arc<dyn Clock>,
        ) -> Result<CoalescingStore<V>, CacheError>
        where
            V: Clone + Send + Sync + 'static,
        {
            CoalescingStore::with_clock(name, *config.get(name), Arc::clone(clock))
        }

        Ok(Self {
            current: store(config, CacheName::Current, &clock)?,
            forecast: store(config, CacheName::Forecast, &clock)?,
            hourly: store(config, CacheName::Hourly, &clock)?,
            historical: store(config, CacheName::Historical, &clock)?,
            future: store(config, CacheName::Future, &clock)?,
            search: store(config, CacheName::Search, &clock)?,
        })
    }

    /// Statistics of all caches, ordered as [`CacheName::ALL`].
    pub fn stats(&self) -> Vec<CacheStats> {
        vec![
            self.current.stats(),
            self.forecast.stats(),
            self.hourly.stats(),
            self.historical.stats(),
            self.future.stats(),
            self.search.stats(),
        ]
    }

    /// Removes all entries from all caches.
    pub fn flush(&self) {
        self.current.flush();
        self.forecast.flush();
        self.hourly.flush();
        self.historical.flush();
        self.future.flush();
        self.search.flush();
    }

    /// Starts the background sweepers of all caches which have one configured.
    pub fn spawn_sweepers(&self) -> Vec<SweeperHandle> {
        [
            self.current.spawn_sweeper(),
            self.forecast.spawn_sweeper(),
            self.hourly.spawn_sweeper(),
            self.historical.spawn_sweeper(),
            self.future.spawn_sweeper(),
            self.search.spawn_sweeper(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// A value returned by the [`WeatherService`].
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    /// Whether the value was already cached before the request.
    pub cached: bool,
}

/// Unwraps the failures of nested caches down to the failure of the innermost producer.
pub fn root_producer_error(err: &CacheError) -> Option<&ProducerError> {
    let mut producer = err.producer_error()?;
    while let Some(inner) = producer
        .downcast_ref::<CacheError>()
        .and_then(CacheError::producer_error)
    {
        producer = inner;
    }
    Some(producer)
}

/// Looks up the [`ProviderError`] behind a cache error, if there is one.
pub fn provider_error(err: &CacheError) -> Option<&ProviderError> {
    root_producer_error(err)?.downcast_ref()
}

/// Fetches weather data through per-kind caches.
///
/// Clones share the same caches and sweepers.
#[derive(Debug, Clone)]
pub struct WeatherService {
    provider: Arc<dyn WeatherProvider>,
    caches: Caches,
    sweepers: Arc<[SweeperHandle]>,
}

impl WeatherService {
    /// Creates a service without background sweepers.
    pub fn new(provider: Arc<dyn WeatherProvider>, caches: Caches) -> Self {
        Self {
            provider,
            caches,
            sweepers: Arc::new([]),
        }
    }

    /// Creates the service described by `config`, including cache sweepers.
    ///
    /// This must be called within a tokio runtime.
    pub fn create(config: &Config) -> anyhow::Result<Self> {
        let provider = providers::create_provider(&config.provider)?;
        let caches = Caches::new(&config.caches)?;
        Ok(Self::new(provider, caches).with_sweepers())
    }

    /// Starts purging expired entries in the background for as long as the service lives.
    pub fn with_sweepers(mut self) -> Self {
        self.sweepers = self.caches.spawn_sweepers().into();
        tracing::debug!("Started {} cache sweepers", self.sweepers.len());
        self
    }

    pub fn provider(&self) -> &dyn WeatherProvider {
        self.provider.as_ref()
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    /// Current conditions, cached by location.
    pub async fn current(
        &self,
        location: &Location,
    ) -> Result<Fetched<CurrentWeather>, CacheError> {
        let provider = self.provider.clone();
        let location = location.clone();
        let key = location.query();
        fetch(&self.caches.current, key, move || async move {
            provider.current(&location).await
        })
        .await
    }

    /// A multi-day forecast, cached by location and number of days.
    ///
    /// `days` is clamped to what the provider supports, so that requests beyond that range share
    /// one cache entry.
    pub async fn forecast(
        &self,
        location: &Location,
        days: u32,
    ) -> Result<Fetched<Forecast>, CacheError> {
        fetch_forecast(&self.caches.forecast, &self.provider, location, days).await
    }

    /// The forecast of the next `hours` hours, cached by location and number of hours.
    ///
    /// The data is taken from the cached three day forecast of the location, so `hours` is
    /// clamped to [`MAX_FORECAST_HOURS`].
    pub async fn hourly(
        &self,
        location: &Location,
        hours: usize,
    ) -> Result<Fetched<HourlyForecast>, CacheError> {
        let hours = hours.clamp(1, MAX_FORECAST_HOURS);
        let forecasts = self.caches.forecast.clone();
        let provider = self.provider.clone();
        let location = location.clone();
        let key = format!("{}:{}", location.query(), hours);
        fetch(&self.caches.hourly, key, move || async move {
            let forecast =
                fetch_forecast(&forecasts, &provider, &location, HOURLY_FORECAST_DAYS).await?;
            Ok::<_, CacheError>(HourlyForecast::from_forecast(forecast.value, hours))
        })
        .await
    }

    /// The weather on a past day, cached by location and date.
    pub async fn historical(
        &self,
        location: &Location,
        date: NaiveDate,
    ) -> Result<Fetched<DayReport>, CacheError> {
        let provider = self.provider.clone();
        let location = location.clone();
        let key = format!("{}:{}", location.query(), date.format("%Y-%m-%d"));
        fetch(&self.caches.historical, key, move || async move {
            provider.historical(&location, date).await
        })
        .await
    }

    /// The expected weather on a future day, cached by location and date.
    pub async fn future(
        &self,
        location: &Location,
        date: NaiveDate,
    ) -> Result<Fetched<DayReport>, CacheError> {
        let provider = self.provider.clone();
        let location = location.clone();
        let key = format!("{}:{}", location.query(), date.format("%Y-%m-%d"));
        fetch(&self.caches.future, key, move || async move {
            provider.future(&location, date).await
        })
        .await
    }

    /// Cities matching `query`, cached by query and limit.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Fetched<Vec<CitySearchResult>>, CacheError> {
        let provider = self.provider.clone();
        let query = query.trim().to_owned();
        let key = format!("{query}:{limit}");
        fetch(&self.caches.search, key, move || async move {
            provider.search(&query, limit).await
        })
        .await
    }

    /// Statistics of all caches.
    pub fn stats(&self) -> Vec<CacheStats> {
        self.caches.stats()
    }

    /// Removes all entries from all caches.
    pub fn flush_all(&self) {
        tracing::info!("Flushing all caches");
        self.caches.flush();
    }
}

async fn fetch_forecast(
    store: &CoalescingStore<Forecast>,
    provider: &Arc<dyn WeatherProvider>,
    location: &Location,
    days: u32,
) -> Result<Fetched<Forecast>, CacheError> {
    let days = days.clamp(1, provider.max_forecast_days().max(1));
    let provider = provider.clone();
    let location = location.clone();
    let key = format!("{}:{}", location.query(), days);
    fetch(store, key, move || async move {
        provider.forecast(&location, days).await
    })
    .await
}

async fn fetch<V, F, Fut, E>(
    store: &CoalescingStore<V>,
    key: String,
    producer: F,
) -> Result<Fetched<V>, CacheError>
where
    V: Clone + Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    E: Into<Box<dyn Error + Send + Sync + 'static>>,
{
    let cached = store.has(&key);
    let value = store.get_or_fetch(&key, producer, None).await?;
    Ok(Fetched { value, cached })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::StatusCode;

    use super::*;
    use crate::caching::ManualClock;
    use crate::types::{CurrentConditions, HourlyEntry, WeatherCondition};

    /// A provider which counts its calls and serves canned data.
    #[derive(Debug, Default)]
    struct FakeProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeProvider {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn call(&self) -> Result<(), ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(ProviderError::Upstream {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    body: "try again later".into(),
                });
            }
            Ok(())
        }
    }

    fn condition() -> WeatherCondition {
        WeatherCondition {
            icon: "01d".into(),
            description: "Clear sky".into(),
            code: 0,
        }
    }

    #[async_trait]
    impl WeatherProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn max_forecast_days(&self) -> u32 {
            5
        }

        async fn current(&self, location: &Location) -> Result<CurrentWeather, ProviderError> {
            self.call().await?;
            Ok(CurrentWeather {
                city_name: location.to_string(),
                lat: 0.0,
                lon: 0.0,
                timezone: None,
                current: CurrentConditions {
                    temp: 20.0,
                    feels_like: 19.0,
                    humidity: 50.0,
                    pressure: 1013.0,
                    wind_speed: 1.0,
                    wind_deg: 0.0,
                    wind_dir: None,
                    clouds: 0.0,
                    uvi: None,
                    visibility: None,
                    weather: condition(),
                    last_updated: "2024-01-01 12:00".into(),
                    aqi: None,
                },
                temperature_unit: None,
            })
        }

        async fn forecast(
            &self,
            location: &Location,
            days: u32,
        ) -> Result<Forecast, ProviderError> {
            self.call().await?;
            let hourly = (0..days as i64 * 24)
                .map(|hour| HourlyEntry {
                    dt: hour * 3600,
                    temp: 10.0,
                    feels_like: 9.0,
                    humidity: 50.0,
                    pressure: 1013.0,
                    wind_speed: 1.0,
                    wind_deg: 0.0,
                    pop: Some(0.0),
                    precipitation: 0.0,
                    weather: condition(),
                })
                .collect();
            Ok(Forecast {
                city_name: location.to_string(),
                lat: 0.0,
                lon: 0.0,
                timezone: None,
                alerts: vec![],
                hourly,
                daily: vec![],
                temperature_unit: None,
            })
        }

        async fn historical(
            &self,
            _location: &Location,
            _date: NaiveDate,
        ) -> Result<DayReport, ProviderError> {
            Err(ProviderError::Unsupported {
                provider: "fake",
                operation: "historical weather",
            })
        }

        async fn future(
            &self,
            _location: &Location,
            _date: NaiveDate,
        ) -> Result<DayReport, ProviderError> {
            Err(ProviderError::Unsupported {
                provider: "fake",
                operation: "future weather",
            })
        }

        async fn search(
            &self,
            query: &str,
            limit: usize,
        ) -> Result<Vec<CitySearchResult>, ProviderError> {
            self.call().await?;
            Ok((0..limit)
                .map(|i| {
                    CitySearchResult::new(format!("{query}{i}"), "".into(), "X".into(), 0.0, 0.0)
                })
                .collect())
        }
    }

    fn service(provider: Arc<FakeProvider>) -> WeatherService {
        let caches = Caches::new(&CacheConfigs::default()).unwrap();
        WeatherService::new(provider, caches)
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_coalesced() {
        nimbus_test::setup();
        let provider = Arc::new(FakeProvider::default());
        let service = service(provider.clone());
        let london = Location::parse("London").unwrap();

        let results = futures::future::join_all((0..10).map(|_| service.current(&london))).await;
        assert_eq!(provider.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap().value.city_name, "London");
        }

        let again = service.current(&london).await.unwrap();
        assert!(again.cached);
        assert_eq!(provider.calls(), 1);

        let stats = &service.stats()[0];
        assert_eq!(stats.name, CacheName::Current);
        assert_eq!(stats.computations, 1);
        assert_eq!(stats.coalesced, 9);
    }

    #[tokio::test]
    async fn test_keys_include_parameters() {
        nimbus_test::setup();
        let provider = Arc::new(FakeProvider::default());
        let service = service(provider.clone());
        let paris = Location::parse("Paris").unwrap();

        service.forecast(&paris, 3).await.unwrap();
        service.forecast(&paris, 7).await.unwrap();
        service.forecast(&paris, 7).await.unwrap();
        assert_eq!(provider.calls(), 2);

        service.search("Par", 5).await.unwrap();
        let results = service.search(" Par ", 2).await.unwrap();
        assert_eq!(results.value.len(), 2);
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test]
    async fn test_forecast_days_are_clamped() {
        nimbus_test::setup();
        let provider = Arc::new(FakeProvider::default());
        let service = service(provider.clone());
        let paris = Location::parse("Paris").unwrap();

        // the provider serves at most five days, so all of these are the same request
        for days in [5, 15, 30] {
            let forecast = service.forecast(&paris, days).await.unwrap();
            assert_eq!(forecast.value.hourly.len(), 5 * 24);
        }
        assert_eq!(provider.calls(), 1);
        assert_eq!(service.caches().forecast.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_hourly_hours_are_clamped() {
        nimbus_test::setup();
        let provider = Arc::new(FakeProvider::default());
        let service = service(provider.clone());
        let paris = Location::parse("Paris").unwrap();

        for hours in [MAX_FORECAST_HOURS, 100, 1000] {
            let hourly = service.hourly(&paris, hours).await.unwrap();
            assert_eq!(hourly.value.hourly.len(), MAX_FORECAST_HOURS);
        }
        assert_eq!(provider.calls(), 1);
        assert_eq!(service.caches().hourly.stats().entries, 1);
    }

    #[tokio::test]
    async fn test_caches_use_their_own_ttl() {
        nimbus_test::setup();
        let provider = Arc::new(FakeProvider::default());
        let clock = ManualClock::new();
        let caches = Caches::with_clock(&CacheConfigs::default(), Arc::new(clock.clone())).unwrap();
        let service = WeatherService::new(provider.clone(), caches);
        let rome = Location::parse("Rome").unwrap();

        service.current(&rome).await.unwrap();
        service.forecast(&rome, 3).await.unwrap();
        assert_eq!(provider.calls(), 2);

        // current conditions live for a minute, forecasts for two
        clock.advance(Duration::from_secs(90));
        assert!(!service.current(&rome).await.unwrap().cached);
        assert!(service.forecast(&rome, 3).await.unwrap().cached);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_hourly_reuses_forecast() {
        nimbus_test::setup();
        let provider = Arc::new(FakeProvider::default());
        let service = service(provider.clone());
        let oslo = Location::parse("59.91,10.75").unwrap();

        let hourly = service.hourly(&oslo, 24).await.unwrap();
        assert_eq!(hourly.value.hourly.len(), 24);
        let hourly = service.hourly(&oslo, 48).await.unwrap();
        assert_eq!(hourly.value.hourly.len(), 48);
        assert_eq!(provider.calls(), 1);

        let forecast = service.forecast(&oslo, 3).await.unwrap();
        assert!(forecast.cached);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        nimbus_test::setup();
        let provider = Arc::new(FakeProvider {
            fail: true,
            ..Default::default()
        });
        let service = service(provider.clone());
        let london = Location::parse("London").unwrap();

        let err = service.current(&london).await.unwrap_err();
        assert!(matches!(
            provider_error(&err),
            Some(ProviderError::Upstream {
                status: StatusCode::SERVICE_UNAVAILABLE,
                ..
            })
        ));

        service.current(&london).await.unwrap_err();
        assert_eq!(provider.calls(), 2);
        assert_eq!(service.stats()[0].failures, 2);
    }

    #[tokio::test]
    async fn test_nested_provider_errors() {
        nimbus_test::setup();
        let provider = Arc::new(FakeProvider {
            fail: true,
            ..Default::default()
        });
        let service = service(provider);
        let london = Location::parse("London").unwrap();

        // the hourly cache wraps the error of the forecast cache
        let err = service.hourly(&london, 24).await.unwrap_err();
        assert!(matches!(
            provider_error(&err),
            Some(ProviderError::Upstream { .. })
        ));

        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let err = service.historical(&london, date).await.unwrap_err();
        assert!(matches!(
            provider_error(&err),
            Some(ProviderError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_flush_all() {
        nimbus_test::setup();
        let provider = Arc::new(FakeProvider::default());
        let service = service(provider.clone());
        let london = Location::parse("London").unwrap();

        service.current(&london).await.unwrap();
        service.search("Lon", 5).await.unwrap();
        assert_eq!(service.stats().iter().map(|s| s.entries).sum::<usize>(), 2);

        service.flush_all();
        assert_eq!(service.stats().iter().map(|s| s.entries).sum::<usize>(), 0);

        let refetched = service.current(&london).await.unwrap();
        assert!(!refetched.cached);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_sweepers_are_started() {
        nimbus_test::setup();
        let provider = Arc::new(FakeProvider::default());
        let service = service(provider).with_sweepers();
        assert_eq!(service.sweepers.len(), CacheName::ALL.len());
    }
}
