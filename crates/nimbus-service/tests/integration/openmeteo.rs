use chrono::NaiveDate;
use nimbus_service::config::ProviderKind;
use nimbus_service::location::Location;
use nimbus_service::providers::ProviderError;
use nimbus_service::services::provider_error;

use crate::{UNKNOWN_CITY, setup_service};

#[tokio::test]
async fn test_current_geocodes_cities() {
    let (service, upstream) = setup_service(ProviderKind::OpenMeteo, |_| {});
    let london = Location::parse("London, UK").unwrap();

    let weather = service.current(&london).await.unwrap().value;
    assert_eq!(weather.city_name, "London, United Kingdom");
    assert_eq!(weather.lat, 51.50853);
    assert_eq!(weather.lon, -0.12574);
    assert_eq!(weather.timezone.as_deref(), Some("Europe/London"));
    assert_eq!(weather.current.temp, 8.2);
    assert_eq!(weather.current.pressure, 1001.2);
    assert_eq!(weather.current.wind_speed, 6.0);
    assert_eq!(weather.current.wind_dir, None);
    assert_eq!(weather.current.weather.description, "Slight rain");
    assert_eq!(weather.current.weather.icon, "10d");

    assert_eq!(
        upstream.all_hits(),
        vec![
            ("/geocoding/v1/search".to_owned(), 1),
            ("/openmeteo/v1/forecast".to_owned(), 1),
        ]
    );
}

#[tokio::test]
async fn test_coordinates_skip_geocoding() {
    let (service, upstream) = setup_service(ProviderKind::OpenMeteo, |_| {});
    let location = Location::parse("51.5, -0.12").unwrap();

    let weather = service.current(&location).await.unwrap().value;
    assert_eq!(weather.city_name, "51.5,-0.12");
    assert_eq!(weather.lat, 51.5);

    assert_eq!(
        upstream.all_hits(),
        vec![("/openmeteo/v1/forecast".to_owned(), 1)]
    );
}

#[tokio::test]
async fn test_forecast() {
    let (service, _upstream) = setup_service(ProviderKind::OpenMeteo, |_| {});
    let london = Location::parse("London").unwrap();

    let forecast = service.forecast(&london, 3).await.unwrap().value;
    assert!(forecast.alerts.is_empty());
    assert_eq!(forecast.daily.len(), 3);
    assert_eq!(forecast.hourly.len(), 72);

    let first_day = &forecast.daily[0];
    assert_eq!(first_day.dt, 1704067200);
    assert_eq!(first_day.temp.day, (9.6 + 5.0) / 2.0);
    assert_eq!(first_day.pop, 0.9);
    assert_eq!(first_day.wind_speed, 10.0);
    assert_eq!(first_day.sunrise, "2024-01-01T08:06");
    assert_eq!(forecast.daily[1].pop, 0.0);

    let first_hour = &forecast.hourly[0];
    assert_eq!(first_hour.dt, 1704067200);
    assert_eq!(first_hour.pop, Some(0.0));
    assert_eq!(forecast.hourly[1].dt, 1704067200 + 3600);
    assert_eq!(forecast.hourly[1].pop, Some(0.07));
}

#[tokio::test]
async fn test_search() {
    let (service, _upstream) = setup_service(ProviderKind::OpenMeteo, |_| {});

    let results = service.search("London", 3).await.unwrap().value;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].display_name, "London, England, United Kingdom");
    assert_eq!(results[2].region, "Kentucky");

    let results = service.search(UNKNOWN_CITY, 3).await.unwrap().value;
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_unknown_city() {
    let (service, _upstream) = setup_service(ProviderKind::OpenMeteo, |_| {});
    let atlantis = Location::parse(UNKNOWN_CITY).unwrap();

    let err = service.forecast(&atlantis, 3).await.unwrap_err();
    assert!(matches!(
        provider_error(&err),
        Some(ProviderError::NotFound(city)) if city == UNKNOWN_CITY
    ));
}

#[tokio::test]
async fn test_day_reports_are_unsupported() {
    let (service, upstream) = setup_service(ProviderKind::OpenMeteo, |_| {});
    let london = Location::parse("London").unwrap();
    let date = NaiveDate::from_ymd_opt(2023, 6, 15).unwrap();

    let err = service.historical(&london, date).await.unwrap_err();
    assert!(matches!(
        provider_error(&err),
        Some(ProviderError::Unsupported { .. })
    ));
    let err = service.future(&london, date).await.unwrap_err();
    assert!(matches!(
        provider_error(&err),
        Some(ProviderError::Unsupported { .. })
    ));

    assert_eq!(upstream.accesses(), 0);
}
