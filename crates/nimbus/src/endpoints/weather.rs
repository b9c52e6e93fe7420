use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use chrono::NaiveDate;
use nimbus_service::caching::CacheStats;
use nimbus_service::location::Location;
use nimbus_service::services::WeatherService;
use nimbus_service::types::{
    CitySearchResult, CurrentWeather, DayReport, Forecast, HourlyForecast,
};
use nimbus_service::units::{ConvertTemperature, TemperatureUnit};
use serde::{Deserialize, Serialize};

use super::ResponseError;

const DEFAULT_FORECAST_DAYS: u32 = 7;
const DEFAULT_HOURS: usize = 24;
const DEFAULT_SEARCH_LIMIT: usize = 5;
const MAX_SEARCH_LIMIT: usize = 20;
const MIN_QUERY_LEN: usize = 2;

/// A successful response.
#[derive(Debug, Serialize)]
pub struct Success<T> {
    pub success: bool,
    pub data: T,
}

impl<T> Success<T> {
    fn new(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

/// Response of the current weather endpoint, with cache information.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentResponse {
    pub success: bool,
    pub data: CurrentWeather,
    /// Whether the data was served from the cache.
    pub cached: bool,
    pub cache_stats: CacheStats,
}

impl From<QueryRejection> for ResponseError {
    fn from(rejection: QueryRejection) -> Self {
        ResponseError::bad_request(rejection.body_text())
    }
}

#[derive(Debug, Deserialize)]
pub struct WeatherParams {
    city: Option<String>,
    #[serde(default)]
    unit: TemperatureUnit,
    days: Option<u32>,
    hours: Option<usize>,
    date: Option<String>,
}

impl WeatherParams {
    fn location(&self) -> Result<Location, ResponseError> {
        match self.city.as_deref() {
            Some(city) if !city.trim().is_empty() => Ok(Location::parse(city)?),
            _ => Err(ResponseError::bad_request("City parameter is required")),
        }
    }

    fn date(&self) -> Result<NaiveDate, ResponseError> {
        let date = self
            .date
            .as_deref()
            .ok_or_else(|| date_error("Date parameter is required"))?;
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|_| date_error(&format!("Invalid date `{date}`")))
    }
}

fn date_error(message: &str) -> ResponseError {
    ResponseError::bad_request(format!("{message} (format: YYYY-MM-DD)"))
}

type Params = Result<Query<WeatherParams>, QueryRejection>;

pub async fn current(
    State(service): State<WeatherService>,
    params: Params,
) -> Result<Json<CurrentResponse>, ResponseError> {
    let Query(params) = params?;
    let location = params.location()?;

    let current = service.current(&location).await?;
    Ok(Json(CurrentResponse {
        success: true,
        data: current.value.convert_to(params.unit),
        cached: current.cached,
        cache_stats: service.caches().current.stats(),
    }))
}

pub async fn forecast(
    State(service): State<WeatherService>,
    params: Params,
) -> Result<Json<Success<Forecast>>, ResponseError> {
    let Query(params) = params?;
    let location = params.location()?;
    let days = params.days.unwrap_or(DEFAULT_FORECAST_DAYS);
    if days == 0 {
        return Err(ResponseError::bad_request("Days must be at least 1"));
    }

    let forecast = service.forecast(&location, days).await?;
    Ok(Success::new(forecast.value.convert_to(params.unit)))
}

pub async fn hourly(
    State(service): State<WeatherService>,
    params: Params,
) -> Result<Json<Success<HourlyForecast>>, ResponseError> {
    let Query(params) = params?;
    let location = params.location()?;
    let hours = params.hours.unwrap_or(DEFAULT_HOURS);
    if hours == 0 {
        return Err(ResponseError::bad_request("Hours must be at least 1"));
    }

    let hourly = service.hourly(&location, hours).await?;
    Ok(Success::new(hourly.value.convert_to(params.unit)))
}

pub async fn historical(
    State(service): State<WeatherService>,
    params: Params,
) -> Result<Json<Success<DayReport>>, ResponseError> {
    let Query(params) = params?;
    let location = params.location()?;
    let date = params.date()?;

    let report = service.historical(&location, date).await?;
    Ok(Success::new(report.value.convert_to(params.unit)))
}

pub async fn future(
    State(service): State<WeatherService>,
    params: Params,
) -> Result<Json<Success<DayReport>>, ResponseError> {
    let Query(params) = params?;
    let location = params.location()?;
    let date = params.date()?;

    let report = service.future(&location, date).await?;
    Ok(Success::new(report.value.convert_to(params.unit)))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    q: Option<String>,
    limit: Option<usize>,
}

pub async fn search(
    State(service): State<WeatherService>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Success<Vec<CitySearchResult>>>, ResponseError> {
    let Query(params) = params?;
    let query = params.q.as_deref().unwrap_or_default().trim();
    if query.chars().count() < MIN_QUERY_LEN {
        return Err(ResponseError::bad_request(format!(
            "Query must be at least {MIN_QUERY_LEN} characters"
        )));
    }
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
        return Err(ResponseError::bad_request(format!(
            "Limit must be between 1 and {MAX_SEARCH_LIMIT}"
        )));
    }

    let cities = service.search(query, limit).await?;
    Ok(Success::new(cities.value))
}
