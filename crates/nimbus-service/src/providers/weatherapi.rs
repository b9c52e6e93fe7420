//! Support for [WeatherAPI.com](https://www.weatherapi.com/docs/).

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

use super::{ProviderError, WeatherProvider, base_url, fetch_json};
use crate::location::Location;
use crate::types::{
    AirQuality, Alert, CitySearchResult, CurrentConditions, CurrentWeather, DailyEntry,
    DailyTemperature, DayReport, DaySummary, Forecast, HourlyEntry, WeatherCondition, kph_to_mps,
    percent_to_probability,
};

const NAME: &str = "weatherapi";

/// WeatherAPI.com does not forecast further than this.
const MAX_FORECAST_DAYS: u32 = 14;

/// The error code WeatherAPI.com uses for unknown locations.
const NO_LOCATION_FOUND: i64 = 1006;

#[derive(Debug, Deserialize)]
struct ApiLocation {
    name: String,
    country: String,
    lat: f64,
    lon: f64,
    tz_id: Option<String>,
}

impl ApiLocation {
    fn city_name(&self) -> String {
        format!("{}, {}", self.name, self.country)
    }
}

#[derive(Debug, Deserialize)]
struct ApiCondition {
    text: String,
    icon: String,
    code: i64,
}

impl From<ApiCondition> for WeatherCondition {
    fn from(condition: ApiCondition) -> Self {
        WeatherCondition {
            icon: condition.icon,
            description: condition.text,
            code: condition.code,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiAirQuality {
    pm2_5: Option<f64>,
    pm10: Option<f64>,
    #[serde(rename = "us-epa-index")]
    us_epa_index: Option<i64>,
    #[serde(rename = "gb-defra-index")]
    gb_defra_index: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiCurrent {
    last_updated: String,
    temp_c: f64,
    feelslike_c: f64,
    humidity: f64,
    pressure_mb: f64,
    wind_kph: f64,
    wind_degree: f64,
    wind_dir: String,
    cloud: f64,
    uv: Option<f64>,
    vis_km: Option<f64>,
    condition: ApiCondition,
    air_quality: Option<ApiAirQuality>,
}

#[derive(Debug, Deserialize)]
struct CurrentResponse {
    location: ApiLocation,
    current: ApiCurrent,
}

#[derive(Debug, Deserialize)]
struct ApiHour {
    time_epoch: i64,
    temp_c: f64,
    feelslike_c: f64,
    humidity: f64,
    pressure_mb: f64,
    wind_kph: f64,
    wind_degree: f64,
    chance_of_rain: Option<f64>,
    precip_mm: f64,
    condition: ApiCondition,
}

impl ApiHour {
    /// Normalizes the hour, optionally with its chance of rain.
    fn into_entry(self, with_pop: bool) -> HourlyEntry {
        HourlyEntry {
            dt: self.time_epoch,
            temp: self.temp_c,
            feels_like: self.feelslike_c,
            humidity: self.humidity,
            pressure: self.pressure_mb,
            wind_speed: kph_to_mps(self.wind_kph),
            wind_deg: self.wind_degree,
            pop: if with_pop {
                Some(percent_to_probability(self.chance_of_rain.unwrap_or_default()))
            } else {
                None
            },
            precipitation: self.precip_mm,
            weather: self.condition.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiDay {
    maxtemp_c: f64,
    mintemp_c: f64,
    avgtemp_c: f64,
    maxwind_kph: f64,
    totalprecip_mm: f64,
    avghumidity: f64,
    daily_chance_of_rain: Option<f64>,
    condition: ApiCondition,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ApiAstro {
    sunrise: String,
    sunset: String,
}

#[derive(Debug, Deserialize)]
struct ApiForecastDay {
    date_epoch: i64,
    day: ApiDay,
    #[serde(default)]
    astro: ApiAstro,
    hour: Vec<ApiHour>,
}

#[derive(Debug, Deserialize)]
struct ApiForecast {
    forecastday: Vec<ApiForecastDay>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiAlerts {
    #[serde(default)]
    alert: Vec<Alert>,
}

/// The response of `forecast.json`, `history.json` and `future.json`.
#[derive(Debug, Deserialize)]
struct ForecastResponse {
    location: ApiLocation,
    forecast: ApiForecast,
    #[serde(default)]
    alerts: ApiAlerts,
}

impl ForecastResponse {
    /// Turns a single-day response into a [`DayReport`].
    fn into_day_report(
        self,
        date: NaiveDate,
        full_summary: bool,
    ) -> Result<DayReport, ProviderError> {
        let city_name = self.location.city_name();
        let Some(forecast_day) = self.forecast.forecastday.into_iter().next() else {
            return Err(ProviderError::malformed("response contains no forecast day"));
        };
        let day = forecast_day.day;

        Ok(DayReport {
            city_name,
            lat: self.location.lat,
            lon: self.location.lon,
            date: date.format("%Y-%m-%d").to_string(),
            hourly: forecast_day
                .hour
                .into_iter()
                .map(|hour| hour.into_entry(false))
                .collect(),
            summary: DaySummary {
                maxtemp_c: day.maxtemp_c,
                mintemp_c: day.mintemp_c,
                avgtemp_c: day.avgtemp_c,
                totalprecip_mm: full_summary.then_some(day.totalprecip_mm),
                avghumidity: full_summary.then_some(day.avghumidity),
                maxtemp_f: None,
                mintemp_f: None,
                avgtemp_f: None,
            },
            temperature_unit: None,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SearchEntry {
    name: String,
    #[serde(default)]
    region: String,
    country: String,
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

/// Endpoint URLs, resolved against the configured base URL.
#[derive(Debug)]
struct Endpoints {
    current: Url,
    forecast: Url,
    history: Url,
    future: Url,
    search: Url,
}

/// Fetches weather data from WeatherAPI.com.
pub struct WeatherApiProvider {
    client: Client,
    endpoints: Endpoints,
    api_key: String,
}

impl std::fmt::Debug for WeatherApiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherApiProvider")
            .field("endpoints", &self.endpoints)
            .finish_non_exhaustive()
    }
}

impl WeatherApiProvider {
    pub fn new(client: Client, base: &str, api_key: String) -> anyhow::Result<Self> {
        let base = base_url(base)?;
        let endpoints = Endpoints {
            current: base.join("current.json")?,
            forecast: base.join("forecast.json")?,
            history: base.join("history.json")?,
            future: base.join("future.json")?,
            search: base.join("search.json")?,
        };
        Ok(Self {
            client,
            endpoints,
            api_key,
        })
    }

    async fn get<T>(
        &self,
        endpoint: &'static str,
        url: &Url,
        location: &Location,
        params: &[(&str, String)],
    ) -> Result<T, ProviderError>
    where
        T: serde::de::DeserializeOwned,
    {
        let query = location.query();
        let request = self
            .client
            .get(url.clone())
            .query(&[("key", self.api_key.as_str()), ("q", query.as_str())])
            .query(params);

        fetch_json(NAME, endpoint, request)
            .await
            .map_err(|err| classify_error(err, location))
    }
}

/// Turns WeatherAPI.com's "no matching location" errors into [`ProviderError::NotFound`].
fn classify_error(err: ProviderError, location: &Location) -> ProviderError {
    let ProviderError::Upstream { status, body } = err else {
        return err;
    };

    match serde_json::from_str::<ApiErrorResponse>(&body) {
        Ok(response)
            if status == StatusCode::BAD_REQUEST && response.error.code == NO_LOCATION_FOUND =>
        {
            ProviderError::NotFound(location.to_string())
        }
        Ok(response) => {
            tracing::debug!(
                "WeatherAPI.com error {}: {}",
                response.error.code,
                response.error.message
            );
            ProviderError::Upstream { status, body }
        }
        Err(_) => ProviderError::Upstream { status, body },
    }
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn max_forecast_days(&self) -> u32 {
        MAX_FORECAST_DAYS
    }

    async fn current(&self, location: &Location) -> Result<CurrentWeather, ProviderError> {
        let params = [("aqi", "yes".to_owned())];
        let response: CurrentResponse = self
            .get("current", &self.endpoints.current, location, &params)
            .await?;

        let CurrentResponse {
            location: api_location,
            current,
        } = response;

        Ok(CurrentWeather {
            city_name: api_location.city_name(),
            lat: api_location.lat,
            lon: api_location.lon,
            timezone: api_location.tz_id,
            current: CurrentConditions {
                temp: current.temp_c,
                feels_like: current.feelslike_c,
                humidity: current.humidity,
                pressure: current.pressure_mb,
                wind_speed: kph_to_mps(current.wind_kph),
                wind_deg: current.wind_degree,
                wind_dir: Some(current.wind_dir),
                clouds: current.cloud,
                uvi: current.uv,
                visibility: current.vis_km,
                weather: current.condition.into(),
                last_updated: current.last_updated,
                aqi: current.air_quality.map(|aqi| AirQuality {
                    pm2_5: aqi.pm2_5,
                    pm10: aqi.pm10,
                    us_epa_index: aqi.us_epa_index,
                    gb_defra_index: aqi.gb_defra_index,
                }),
            },
            temperature_unit: None,
        })
    }

    async fn forecast(&self, location: &Location, days: u32) -> Result<Forecast, ProviderError> {
        let days = days.clamp(1, MAX_FORECAST_DAYS);
        let params = [
            ("days", days.to_string()),
            ("aqi", "yes".to_owned()),
            ("alerts", "yes".to_owned()),
        ];
        let response: ForecastResponse = self
            .get("forecast", &self.endpoints.forecast, location, &params)
            .await?;

        let city_name = response.location.city_name();
        let mut hourly = Vec::new();
        let mut daily = Vec::with_capacity(response.forecast.forecastday.len());

        for forecast_day in response.forecast.forecastday {
            let day = forecast_day.day;
            daily.push(DailyEntry {
                dt: forecast_day.date_epoch,
                temp: DailyTemperature {
                    day: day.avgtemp_c,
                    min: day.mintemp_c,
                    max: day.maxtemp_c,
                },
                humidity: Some(day.avghumidity),
                wind_speed: kph_to_mps(day.maxwind_kph),
                pop: percent_to_probability(day.daily_chance_of_rain.unwrap_or_default()),
                precipitation: day.totalprecip_mm,
                weather: day.condition.into(),
                sunrise: forecast_day.astro.sunrise,
                sunset: forecast_day.astro.sunset,
            });
            hourly.extend(forecast_day.hour.into_iter().map(|hour| hour.into_entry(true)));
        }

        Ok(Forecast {
            city_name,
            lat: response.location.lat,
            lon: response.location.lon,
            timezone: response.location.tz_id,
            alerts: response.alerts.alert,
            hourly,
            daily,
            temperature_unit: None,
        })
    }

    async fn historical(
        &self,
        location: &Location,
        date: NaiveDate,
    ) -> Result<DayReport, ProviderError> {
        let params = [("dt", date.format("%Y-%m-%d").to_string())];
        let response: ForecastResponse = self
            .get("history", &self.endpoints.history, location, &params)
            .await?;
        response.into_day_report(date, true)
    }

    async fn future(
        &self,
        location: &Location,
        date: NaiveDate,
    ) -> Result<DayReport, ProviderError> {
        let params = [("dt", date.format("%Y-%m-%d").to_string())];
        let response: ForecastResponse = self
            .get("future", &self.endpoints.future, location, &params)
            .await?;
        response.into_day_report(date, false)
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<CitySearchResult>, ProviderError> {
        let location = Location::City(query.to_owned());
        let response: Vec<SearchEntry> = self
            .get("search", &self.endpoints.search, &location, &[])
            .await?;

        Ok(response
            .into_iter()
            .take(limit)
            .map(|city| {
                CitySearchResult::new(city.name, city.region, city.country, city.lat, city.lon)
            })
            .collect())
    }
}
