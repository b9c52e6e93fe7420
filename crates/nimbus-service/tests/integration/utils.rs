use nimbus_service::config::{Config, ProviderKind};
use nimbus_service::services::WeatherService;
use nimbus_test as test;

pub use test::{UNKNOWN_CITY, Upstream};

/// Setup tests and create a test service talking to a fake upstream.
///
/// The [`Upstream`] has to be held until the test has finished. The `update_config` closure can
/// modify the configuration before the service is created.
pub fn setup_service(
    kind: ProviderKind,
    update_config: impl FnOnce(&mut Config),
) -> (WeatherService, Upstream) {
    test::setup();

    let upstream = Upstream::new();

    let mut config = Config::default();
    config.provider.kind = kind;
    config.provider.api_key = Some(test::WEATHERAPI_KEY.to_owned());
    config.provider.weatherapi_url = upstream.weatherapi_url().to_string();
    config.provider.openmeteo_url = upstream.openmeteo_url().to_string();
    config.provider.geocoding_url = upstream.geocoding_url().to_string();
    update_config(&mut config);

    let service = WeatherService::create(&config).unwrap();
    (service, upstream)
}
