//! The normalized weather schema served by the HTTP API.
//!
//! Every provider converts its upstream responses into these types, so clients never see which
//! provider is configured. Field names follow the public JSON API: most fields are snake case,
//! while a few top-level fields such as `cityName` are camel case.
//!
//! Units are fixed regardless of the provider: temperatures in degrees Celsius (unless converted
//! through [`ConvertTemperature`](crate::units::ConvertTemperature)), wind speed in m/s, pressure
//! in hPa, precipitation in mm, probabilities of precipitation in `0..=1`, and timestamps (`dt`) in
//! seconds since the unix epoch.

use serde::{Deserialize, Serialize};

use crate::units::TemperatureUnit;

/// A textual description of the weather with an icon identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherCondition {
    pub icon: String,
    pub description: String,
    /// The provider specific condition code.
    pub code: i64,
}

/// Air pollution measurements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQuality {
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub us_epa_index: Option<i64>,
    pub gb_defra_index: Option<i64>,
}

/// The weather right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub temp: f64,
    pub feels_like: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_deg: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_dir: Option<String>,
    pub clouds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uvi: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f64>,
    pub weather: WeatherCondition,
    /// Local time of the last upstream update, as reported by the provider.
    pub last_updated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aqi: Option<AirQuality>,
}

/// Response of `/api/weather/current`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentWeather {
    pub city_name: String,
    pub lat: f64,
    pub lon: f64,
    pub timezone: Option<String>,
    pub current: CurrentConditions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_unit: Option<TemperatureUnit>,
}

/// The weather of a single hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyEntry {
    pub dt: i64,
    pub temp: f64,
    pub feels_like: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub wind_deg: f64,
    /// Probability of precipitation, not available for past days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pop: Option<f64>,
    pub precipitation: f64,
    pub weather: WeatherCondition,
}

/// Temperatures over the course of a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTemperature {
    pub day: f64,
    pub min: f64,
    pub max: f64,
}

/// The forecast of a single day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyEntry {
    pub dt: i64,
    pub temp: DailyTemperature,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    pub wind_speed: f64,
    pub pop: f64,
    pub precipitation: f64,
    pub weather: WeatherCondition,
    pub sunrise: String,
    pub sunset: String,
}

/// An official weather warning, passed through from the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Alert {
    pub headline: String,
    pub msgtype: String,
    pub severity: String,
    pub urgency: String,
    pub areas: String,
    pub category: String,
    pub certainty: String,
    pub event: String,
    pub note: String,
    pub effective: String,
    pub expires: String,
    pub desc: String,
    pub instruction: String,
}

/// Response of `/api/weather/forecast`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub city_name: String,
    pub lat: f64,
    pub lon: f64,
    pub timezone: Option<String>,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    pub hourly: Vec<HourlyEntry>,
    pub daily: Vec<DailyEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_unit: Option<TemperatureUnit>,
}

/// Response of `/api/weather/hourly`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyForecast {
    pub city_name: String,
    pub lat: f64,
    pub lon: f64,
    pub timezone: Option<String>,
    pub hourly: Vec<HourlyEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_unit: Option<TemperatureUnit>,
}

impl HourlyForecast {
    /// Takes the first `hours` entries of a forecast.
    pub fn from_forecast(forecast: Forecast, hours: usize) -> Self {
        let mut hourly = forecast.hourly;
        hourly.truncate(hours);
        HourlyForecast {
            city_name: forecast.city_name,
            lat: forecast.lat,
            lon: forecast.lon,
            timezone: forecast.timezone,
            hourly,
            temperature_unit: forecast.temperature_unit,
        }
    }
}

/// Aggregates of a single day.
///
/// The Fahrenheit fields are only present after conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    pub maxtemp_c: f64,
    pub mintemp_c: f64,
    pub avgtemp_c: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub totalprecip_mm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avghumidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxtemp_f: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mintemp_f: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avgtemp_f: Option<f64>,
}

/// Response of `/api/weather/historical` and `/api/weather/future`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayReport {
    pub city_name: String,
    pub lat: f64,
    pub lon: f64,
    /// The requested day, `YYYY-MM-DD`.
    pub date: String,
    pub hourly: Vec<HourlyEntry>,
    pub summary: DaySummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_unit: Option<TemperatureUnit>,
}

/// A city matching a search query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitySearchResult {
    pub name: String,
    pub country: String,
    pub region: String,
    pub lat: f64,
    pub lon: f64,
    pub display_name: String,
}

impl CitySearchResult {
    pub fn new(name: String, region: String, country: String, lat: f64, lon: f64) -> Self {
        let display_name = if region.is_empty() {
            format!("{name}, {country}")
        } else {
            format!("{name}, {region}, {country}")
        };
        CitySearchResult {
            name,
            country,
            region,
            lat,
            lon,
            display_name,
        }
    }
}

/// Converts a speed in km/h to m/s.
pub(crate) fn kph_to_mps(kph: f64) -> f64 {
    kph / 3.6
}

/// Converts a percentage to a probability.
pub(crate) fn percent_to_probability(percent: f64) -> f64 {
    percent / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        let city = CitySearchResult::new(
            "Portland".into(),
            "Oregon".into(),
            "United States of America".into(),
            45.52,
            -122.68,
        );
        assert_eq!(
            city.display_name,
            "Portland, Oregon, United States of America"
        );

        let city = CitySearchResult::new("Monaco".into(), "".into(), "Monaco".into(), 43.73, 7.42);
        assert_eq!(city.display_name, "Monaco, Monaco");
    }

    #[test]
    fn test_json_field_names() {
        let city = CitySearchResult::new("Oslo".into(), "".into(), "Norway".into(), 59.91, 10.75);
        let json = serde_json::to_value(&city).unwrap();
        assert_eq!(json["displayName"], "Oslo, Norway");

        let summary = DaySummary {
            maxtemp_c: 20.0,
            mintemp_c: 10.0,
            avgtemp_c: 15.0,
            totalprecip_mm: None,
            avghumidity: None,
            maxtemp_f: None,
            mintemp_f: None,
            avgtemp_f: None,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"maxtemp_c": 20.0, "mintemp_c": 10.0, "avgtemp_c": 15.0})
        );
    }

    #[test]
    fn test_hourly_from_forecast() {
        let entry = |dt| HourlyEntry {
            dt,
            temp: 1.0,
            feels_like: 1.0,
            humidity: 50.0,
            pressure: 1000.0,
            wind_speed: 1.0,
            wind_deg: 0.0,
            pop: None,
            precipitation: 0.0,
            weather: WeatherCondition {
                icon: "01d".into(),
                description: "Clear sky".into(),
                code: 0,
            },
        };
        let forecast = Forecast {
            city_name: "Oslo, Norway".into(),
            lat: 59.91,
            lon: 10.75,
            timezone: Some("Europe/Oslo".into()),
            alerts: vec![],
            hourly: (0..72).map(|i| entry(i * 3600)).collect(),
            daily: vec![],
            temperature_unit: None,
        };

        let hourly = HourlyForecast::from_forecast(forecast.clone(), 24);
        assert_eq!(hourly.hourly.len(), 24);
        assert_eq!(hourly.hourly[23].dt, 23 * 3600);
        assert_eq!(hourly.city_name, forecast.city_name);

        let hourly = HourlyForecast::from_forecast(forecast, 100);
        assert_eq!(hourly.hourly.len(), 72);
    }
}
