use axum::Json;
use axum::extract::State;
use nimbus_service::caching::CacheStats;
use nimbus_service::services::WeatherService;
use serde::Serialize;

use super::weather::Success;

pub async fn stats(State(service): State<WeatherService>) -> Json<Success<Vec<CacheStats>>> {
    Json(Success {
        success: true,
        data: service.stats(),
    })
}

#[derive(Debug, Serialize)]
pub struct Flushed {
    /// The number of entries removed over all caches.
    pub flushed: usize,
}

pub async fn flush(State(service): State<WeatherService>) -> Json<Success<Flushed>> {
    let flushed = service.stats().iter().map(|stats| stats.entries).sum();
    service.flush_all();
    Json(Success {
        success: true,
        data: Flushed { flushed },
    })
}
