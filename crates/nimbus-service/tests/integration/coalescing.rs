use std::time::Duration;

use nimbus_service::caching::CacheName;
use nimbus_service::config::ProviderKind;
use nimbus_service::location::Location;
use nimbus_service::providers::ProviderError;
use nimbus_service::services::provider_error;
use reqwest::StatusCode;

use crate::setup_service;

#[tokio::test]
async fn test_concurrent_requests_hit_upstream_once() {
    let (service, upstream) = setup_service(ProviderKind::WeatherApi, |_| {});
    upstream.set_delay(Duration::from_millis(100));
    let paris = Location::parse("Paris").unwrap();

    let requests = (0..10).map(|_| {
        let service = service.clone();
        let paris = paris.clone();
        tokio::spawn(async move { service.forecast(&paris, 3).await })
    });
    let results = futures::future::join_all(requests).await;

    for result in results {
        assert_eq!(result.unwrap().unwrap().value.daily.len(), 3);
    }
    assert_eq!(upstream.accesses(), 1);

    let stats = service
        .stats()
        .into_iter()
        .find(|stats| stats.name == CacheName::Forecast)
        .unwrap();
    assert_eq!(stats.computations, 1);
    assert_eq!(stats.hits + stats.coalesced, 9);
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_dropped_requests_still_populate_cache() {
    let (service, upstream) = setup_service(ProviderKind::WeatherApi, |_| {});
    upstream.set_delay(Duration::from_millis(100));
    let paris = Location::parse("Paris").unwrap();

    let abandoned = tokio::time::timeout(Duration::from_millis(10), service.current(&paris)).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;
    let current = service.current(&paris).await.unwrap();
    assert!(current.cached);
    assert_eq!(upstream.accesses(), 1);
}

#[tokio::test]
async fn test_upstream_failures_are_shared_but_not_cached() {
    let (service, upstream) = setup_service(ProviderKind::WeatherApi, |_| {});
    upstream.set_delay(Duration::from_millis(50));
    upstream.fail_with(Some(StatusCode::SERVICE_UNAVAILABLE));
    let paris = Location::parse("Paris").unwrap();

    let (first, second) = tokio::join!(service.current(&paris), service.current(&paris));
    for result in [first, second] {
        let err = result.unwrap_err();
        assert!(matches!(
            provider_error(&err),
            Some(ProviderError::Upstream {
                status: StatusCode::SERVICE_UNAVAILABLE,
                ..
            })
        ));
    }
    assert_eq!(upstream.accesses(), 1);

    upstream.fail_with(None);
    let current = service.current(&paris).await.unwrap();
    assert!(!current.cached);
    assert_eq!(upstream.accesses(), 1);
}

#[tokio::test]
async fn test_entries_expire() {
    let (service, upstream) = setup_service(ProviderKind::WeatherApi, |config| {
        config.caches.current.default_ttl = Duration::from_millis(100);
    });
    let paris = Location::parse("Paris").unwrap();

    service.current(&paris).await.unwrap();
    assert!(service.current(&paris).await.unwrap().cached);
    assert_eq!(upstream.accesses(), 1);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!service.current(&paris).await.unwrap().cached);
    assert_eq!(upstream.accesses(), 1);
}
