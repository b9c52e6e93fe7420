use chrono::NaiveDate;
use nimbus_service::config::ProviderKind;
use nimbus_service::location::Location;
use nimbus_service::providers::ProviderError;
use nimbus_service::services::provider_error;
use reqwest::StatusCode;

use crate::{UNKNOWN_CITY, setup_service};

fn london() -> Location {
    Location::parse("London").unwrap()
}

#[tokio::test]
async fn test_current() {
    let (service, upstream) = setup_service(ProviderKind::WeatherApi, |_| {});

    let current = service.current(&london()).await.unwrap();
    assert!(!current.cached);

    let weather = current.value;
    assert_eq!(weather.city_name, "London, United Kingdom");
    assert_eq!(weather.lat, 51.52);
    assert_eq!(weather.timezone.as_deref(), Some("Europe/London"));
    assert_eq!(weather.current.temp, 8.0);
    assert_eq!(weather.current.feels_like, 5.1);
    assert_eq!(weather.current.humidity, 87.0);
    assert_eq!(weather.current.wind_speed, 5.0);
    assert_eq!(weather.current.wind_dir.as_deref(), Some("SW"));
    assert_eq!(weather.current.weather.description, "Light rain");
    assert_eq!(weather.current.weather.code, 1183);
    assert_eq!(weather.current.last_updated, "2024-01-01 11:55");

    let aqi = weather.current.aqi.unwrap();
    assert_eq!(aqi.pm2_5, Some(4.8));
    assert_eq!(aqi.us_epa_index, Some(1));

    assert_eq!(
        upstream.all_hits(),
        vec![("/weatherapi/v1/current.json".to_owned(), 1)]
    );
}

#[tokio::test]
async fn test_forecast_beyond_supported_range() {
    let (service, upstream) = setup_service(ProviderKind::WeatherApi, |_| {});

    // WeatherAPI.com serves at most 14 days, larger values share one cache entry
    for days in [14, 15, 30] {
        service.forecast(&london(), days).await.unwrap();
    }

    assert_eq!(
        upstream.all_hits(),
        vec![("/weatherapi/v1/forecast.json".to_owned(), 1)]
    );
}

#[tokio::test]
async fn test_forecast() {
    let (service, _upstream) = setup_service(ProviderKind::WeatherApi, |_| {});

    let forecast = service.forecast(&london(), 3).await.unwrap().value;
    assert_eq!(forecast.daily.len(), 3);
    assert_eq!(forecast.hourly.len(), 72);
    assert_eq!(forecast.alerts.len(), 1);
    assert_eq!(forecast.alerts[0].event, "Wind");

    let first_day = &forecast.daily[0];
    assert_eq!(first_day.dt, 1704067200);
    assert_eq!(first_day.temp.max, 10.75);
    assert_eq!(first_day.temp.min, 5.0);
    assert_eq!(first_day.pop, 0.85);
    assert_eq!(first_day.sunrise, "08:06 AM");

    // hours are consecutive across days
    for pair in forecast.hourly.windows(2) {
        assert_eq!(pair[1].dt - pair[0].dt, 3600);
    }
    assert_eq!(forecast.hourly[0].pop, Some(0.4));
}

#[tokio::test]
async fn test_hourly() {
    let (service, upstream) = setup_service(ProviderKind::WeatherApi, |_| {});

    let hourly = service.hourly(&london(), 12).await.unwrap().value;
    assert_eq!(hourly.hourly.len(), 12);
    assert_eq!(hourly.city_name, "London, United Kingdom");

    let hourly = service.hourly(&london(), 100).await.unwrap().value;
    assert_eq!(hourly.hourly.len(), 72);

    assert_eq!(upstream.accesses(), 1);
}

#[tokio::test]
async fn test_historical_and_future() {
    let (service, upstream) = setup_service(ProviderKind::WeatherApi, |_| {});

    let date = NaiveDate::from_ymd_opt(2023, 6, 15).unwrap();
    let report = service.historical(&london(), date).await.unwrap().value;
    assert_eq!(report.date, "2023-06-15");
    assert_eq!(report.hourly.len(), 24);
    assert_eq!(report.hourly[0].pop, None);
    assert_eq!(report.summary.maxtemp_c, 24.3);
    assert_eq!(report.summary.totalprecip_mm, Some(0.0));
    assert_eq!(report.summary.avghumidity, Some(58.0));

    let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
    let report = service.future(&london(), date).await.unwrap().value;
    assert_eq!(report.date, "2025-03-01");
    assert_eq!(report.summary.mintemp_c, 4.4);
    assert_eq!(report.summary.totalprecip_mm, None);
    assert_eq!(report.summary.avghumidity, None);

    assert_eq!(
        upstream.all_hits(),
        vec![
            ("/weatherapi/v1/future.json".to_owned(), 1),
            ("/weatherapi/v1/history.json".to_owned(), 1),
        ]
    );
}

#[tokio::test]
async fn test_search() {
    let (service, _upstream) = setup_service(ProviderKind::WeatherApi, |_| {});

    let results = service.search("Lond", 2).await.unwrap().value;
    assert_eq!(results.len(), 2);
    assert_eq!(
        results[0].display_name,
        "London, City of London, Greater London, United Kingdom"
    );
    assert_eq!(results[1].country, "Canada");

    let results = service.search(UNKNOWN_CITY, 5).await.unwrap().value;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_unknown_city() {
    let (service, upstream) = setup_service(ProviderKind::WeatherApi, |_| {});
    let atlantis = Location::parse(UNKNOWN_CITY).unwrap();

    for _ in 0..2 {
        let err = service.current(&atlantis).await.unwrap_err();
        assert!(matches!(
            provider_error(&err),
            Some(ProviderError::NotFound(city)) if city == UNKNOWN_CITY
        ));
    }

    // errors are not cached
    assert_eq!(upstream.accesses(), 2);
}

#[tokio::test]
async fn test_invalid_api_key() {
    let (service, _upstream) = setup_service(ProviderKind::WeatherApi, |config| {
        config.provider.api_key = Some("wrong".into());
    });

    let err = service.current(&london()).await.unwrap_err();
    assert!(matches!(
        provider_error(&err),
        Some(ProviderError::Upstream {
            status: StatusCode::UNAUTHORIZED,
            ..
        })
    ));
}
