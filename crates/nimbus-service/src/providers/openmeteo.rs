//! Support for [Open-Meteo](https://open-meteo.com/en/docs), which requires no API key.
//!
//! Open-Meteo only accepts coordinates, so city names are resolved through its geocoding API
//! first. Forecast responses are column oriented: every field is an array indexed by time.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::{Client, Url};
use serde::Deserialize;

use super::{ProviderError, WeatherProvider, base_url, column, fetch_json};
use crate::location::Location;
use crate::types::{
    CitySearchResult, CurrentConditions, CurrentWeather, DailyEntry, DailyTemperature, DayReport,
    Forecast, HourlyEntry, WeatherCondition, kph_to_mps, percent_to_probability,
};

const NAME: &str = "openmeteo";

/// Open-Meteo does not forecast further than this.
const MAX_FORECAST_DAYS: u32 = 16;

const CURRENT_FIELDS: &str = "temperature_2m,relative_humidity_2m,apparent_temperature,\
    precipitation,weather_code,cloud_cover,pressure_msl,surface_pressure,wind_speed_10m,\
    wind_direction_10m";

const DAILY_FIELDS: &str = "weather_code,temperature_2m_max,temperature_2m_min,\
    apparent_temperature_max,apparent_temperature_min,sunrise,sunset,precipitation_sum,\
    precipitation_probability_max,wind_speed_10m_max";

const HOURLY_FIELDS: &str = "temperature_2m,apparent_temperature,precipitation_probability,\
    precipitation,weather_code,pressure_msl,wind_speed_10m,wind_direction_10m,\
    relative_humidity_2m";

/// Describes a WMO weather interpretation code.
pub fn weather_description(code: i64) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Foggy",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        56 => "Light freezing drizzle",
        57 => "Dense freezing drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        66 => "Light freezing rain",
        67 => "Heavy freezing rain",
        71 => "Slight snow fall",
        73 => "Moderate snow fall",
        75 => "Heavy snow fall",
        77 => "Snow grains",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        85 => "Slight snow showers",
        86 => "Heavy snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        _ => "Unknown",
    }
}

/// Maps a WMO weather interpretation code to an OpenWeatherMap style icon identifier.
pub fn weather_icon(code: i64) -> &'static str {
    match code {
        0 | 1 => "01d",
        2 => "02d",
        3 => "03d",
        45 | 48 => "50d",
        51..=57 => "09d",
        61..=67 => "10d",
        71..=77 => "13d",
        80..=82 => "09d",
        85 | 86 => "13d",
        95..=99 => "11d",
        _ => "01d",
    }
}

fn condition(code: i64) -> WeatherCondition {
    WeatherCondition {
        icon: weather_icon(code).to_owned(),
        description: weather_description(code).to_owned(),
        code,
    }
}

/// Converts a local `YYYY-MM-DDTHH:MM` timestamp into unix seconds.
fn local_time_to_unix(time: &str, utc_offset_seconds: i64) -> Result<i64, ProviderError> {
    let local = NaiveDateTime::parse_from_str(time, "%Y-%m-%dT%H:%M")
        .map_err(ProviderError::malformed)?;
    Ok(local.and_utc().timestamp() - utc_offset_seconds)
}

/// Converts a local `YYYY-MM-DD` date into the unix seconds of its midnight.
fn local_date_to_unix(date: &str, utc_offset_seconds: i64) -> Result<i64, ProviderError> {
    let midnight = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(ProviderError::malformed)?
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| ProviderError::malformed(format!("invalid date `{date}`")))?;
    Ok(midnight.and_utc().timestamp() - utc_offset_seconds)
}

#[derive(Debug, Deserialize)]
struct GeocodingResult {
    name: String,
    #[serde(default)]
    country: String,
    admin1: Option<String>,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    /// Missing entirely if nothing matched.
    #[serde(default)]
    results: Vec<GeocodingResult>,
}

#[derive(Debug, Deserialize)]
struct ApiCurrent {
    time: String,
    temperature_2m: f64,
    relative_humidity_2m: f64,
    apparent_temperature: f64,
    weather_code: i64,
    cloud_cover: f64,
    surface_pressure: f64,
    wind_speed_10m: f64,
    wind_direction_10m: f64,
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    timezone: Option<String>,
    current: ApiCurrent,
}

#[derive(Debug, Deserialize)]
struct ApiDaily {
    time: Vec<String>,
    weather_code: Vec<i64>,
    temperature_2m_max: Vec<f64>,
    temperature_2m_min: Vec<f64>,
    sunrise: Vec<String>,
    sunset: Vec<String>,
    precipitation_sum: Vec<f64>,
    precipitation_probability_max: Vec<Option<f64>>,
    wind_speed_10m_max: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiHourly {
    time: Vec<String>,
    temperature_2m: Vec<f64>,
    apparent_temperature: Vec<f64>,
    precipitation_probability: Vec<Option<f64>>,
    precipitation: Vec<f64>,
    weather_code: Vec<i64>,
    pressure_msl: Vec<f64>,
    wind_speed_10m: Vec<f64>,
    wind_direction_10m: Vec<f64>,
    relative_humidity_2m: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    timezone: Option<String>,
    #[serde(default)]
    utc_offset_seconds: i64,
    daily: ApiDaily,
    hourly: ApiHourly,
}

impl ApiDaily {
    fn entries(&self, utc_offset_seconds: i64) -> Result<Vec<DailyEntry>, ProviderError> {
        let mut entries = Vec::with_capacity(self.time.len());
        for (i, time) in self.time.iter().enumerate() {
            let max = column(&self.temperature_2m_max, i, "temperature_2m_max")?;
            let min = column(&self.temperature_2m_min, i, "temperature_2m_min")?;
            let pop = column(
                &self.precipitation_probability_max,
                i,
                "precipitation_probability_max",
            )?;
            entries.push(DailyEntry {
                dt: local_date_to_unix(time, utc_offset_seconds)?,
                temp: DailyTemperature {
                    day: (max + min) / 2.0,
                    min,
                    max,
                },
                humidity: None,
                wind_speed: kph_to_mps(column(
                    &self.wind_speed_10m_max,
                    i,
                    "wind_speed_10m_max",
                )?),
                pop: percent_to_probability(pop.unwrap_or_default()),
                precipitation: column(&self.precipitation_sum, i, "precipitation_sum")?,
                weather: condition(column(&self.weather_code, i, "weather_code")?),
                sunrise: column(&self.sunrise, i, "sunrise")?,
                sunset: column(&self.sunset, i, "sunset")?,
            });
        }
        Ok(entries)
    }
}

impl ApiHourly {
    fn entries(&self, utc_offset_seconds: i64) -> Result<Vec<HourlyEntry>, ProviderError> {
        let mut entries = Vec::with_capacity(self.time.len());
        for (i, time) in self.time.iter().enumerate() {
            let pop = column(
                &self.precipitation_probability,
                i,
                "precipitation_probability",
            )?;
            entries.push(HourlyEntry {
                dt: local_time_to_unix(time, utc_offset_seconds)?,
                temp: column(&self.temperature_2m, i, "temperature_2m")?,
                feels_like: column(&self.apparent_temperature, i, "apparent_temperature")?,
                humidity: column(&self.relative_humidity_2m, i, "relative_humidity_2m")?,
                pressure: column(&self.pressure_msl, i, "pressure_msl")?,
                wind_speed: kph_to_mps(column(&self.wind_speed_10m, i, "wind_speed_10m")?),
                wind_deg: column(&self.wind_direction_10m, i, "wind_direction_10m")?,
                pop: Some(percent_to_probability(pop.unwrap_or_default())),
                precipitation: column(&self.precipitation, i, "precipitation")?,
                weather: condition(column(&self.weather_code, i, "weather_code")?),
            });
        }
        Ok(entries)
    }
}

/// A location resolved to coordinates.
#[derive(Debug)]
struct Place {
    city_name: String,
    lat: f64,
    lon: f64,
}

/// Fetches weather data from Open-Meteo.
#[derive(Debug)]
pub struct OpenMeteoProvider {
    client: Client,
    forecast_url: Url,
    geocoding_url: Url,
}

impl OpenMeteoProvider {
    pub fn new(client: Client, forecast_base: &str, geocoding_base: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            forecast_url: base_url(forecast_base)?.join("forecast")?,
            geocoding_url: base_url(geocoding_base)?.join("search")?,
        })
    }

    async fn geocode(
        &self,
        name: &str,
        count: usize,
    ) -> Result<Vec<GeocodingResult>, ProviderError> {
        let count = count.to_string();
        let request = self.client.get(self.geocoding_url.clone()).query(&[
            ("name", name),
            ("count", count.as_str()),
            ("language", "en"),
            ("format", "json"),
        ]);
        let response: GeocodingResponse = fetch_json(NAME, "geocoding", request).await?;
        Ok(response.results)
    }

    /// Resolves a location to coordinates, geocoding city names.
    async fn resolve(&self, location: &Location) -> Result<Place, ProviderError> {
        let name = match location {
            Location::Coordinates { lat, lon } => {
                return Ok(Place {
                    city_name: location.to_string(),
                    lat: *lat,
                    lon: *lon,
                });
            }
            Location::City(_) => location.geocoding_name().unwrap_or_default(),
        };

        let Some(result) = self.geocode(name, 1).await?.into_iter().next() else {
            return Err(ProviderError::NotFound(name.to_owned()));
        };
        tracing::trace!("Geocoded {:?} to {}", name, result.name);

        Ok(Place {
            city_name: format!("{}, {}", result.name, result.country),
            lat: result.latitude,
            lon: result.longitude,
        })
    }

    fn forecast_request(&self, place: &Place) -> reqwest::RequestBuilder {
        self.client.get(self.forecast_url.clone()).query(&[
            ("latitude", place.lat.to_string()),
            ("longitude", place.lon.to_string()),
            ("timezone", "auto".to_owned()),
        ])
    }
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn max_forecast_days(&self) -> u32 {
        MAX_FORECAST_DAYS
    }

    async fn current(&self, location: &Location) -> Result<CurrentWeather, ProviderError> {
        let place = self.resolve(location).await?;
        let request = self
            .forecast_request(&place)
            .query(&[("current", CURRENT_FIELDS)]);
        let response: CurrentResponse = fetch_json(NAME, "current", request).await?;
        let current = response.current;

        Ok(CurrentWeather {
            city_name: place.city_name,
            lat: place.lat,
            lon: place.lon,
            timezone: response.timezone,
            current: CurrentConditions {
                temp: current.temperature_2m,
                feels_like: current.apparent_temperature,
                humidity: current.relative_humidity_2m,
                pressure: current.surface_pressure,
                wind_speed: kph_to_mps(current.wind_speed_10m),
                wind_deg: current.wind_direction_10m,
                wind_dir: None,
                clouds: current.cloud_cover,
                uvi: None,
                visibility: None,
                weather: condition(current.weather_code),
                last_updated: current.time,
                aqi: None,
            },
            temperature_unit: None,
        })
    }

    async fn forecast(&self, location: &Location, days: u32) -> Result<Forecast, ProviderError> {
        let days = days.clamp(1, MAX_FORECAST_DAYS);
        let place = self.resolve(location).await?;
        let request = self.forecast_request(&place).query(&[
            ("daily", DAILY_FIELDS.to_owned()),
            ("hourly", HOURLY_FIELDS.to_owned()),
            ("forecast_days", days.to_string()),
        ]);
        let response: ForecastResponse = fetch_json(NAME, "forecast", request).await?;

        Ok(Forecast {
            city_name: place.city_name,
            lat: place.lat,
            lon: place.lon,
            timezone: response.timezone,
            alerts: Vec::new(),
            hourly: response.hourly.entries(response.utc_offset_seconds)?,
            daily: response.daily.entries(response.utc_offset_seconds)?,
            temperature_unit: None,
        })
    }

    async fn historical(
        &self,
        _location: &Location,
        _date: NaiveDate,
    ) -> Result<DayReport, ProviderError> {
        Err(ProviderError::Unsupported {
            provider: NAME,
            operation: "historical weather",
        })
    }

    async fn future(
        &self,
        _location: &Location,
        _date: NaiveDate,
    ) -> Result<DayReport, ProviderError> {
        Err(ProviderError::Unsupported {
            provider: NAME,
            operation: "future weather",
        })
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CitySearchResult>, ProviderError> {
        let results = self.geocode(query, limit).await?;
        Ok(results
            .into_iter()
            .take(limit)
            .map(|city| {
                CitySearchResult::new(
                    city.name,
                    city.admin1.unwrap_or_default(),
                    city.country,
                    city.latitude,
                    city.longitude,
                )
            })
            .collect())
    }
}
