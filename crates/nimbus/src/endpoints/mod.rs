use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware;
use axum::routing::{delete, get};
use axum::{Json, Router};
use nimbus_service::config::HttpConfig;
use nimbus_service::metric;
use nimbus_service::services::WeatherService;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use serde::Serialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

mod cache;
mod error;
mod metrics;
mod rate_limit;
mod weather;

pub use error::ResponseError;
use error::ApiErrorResponse;
use metrics::MetricsLayer;
use rate_limit::{RateLimiter, limit_requests};

pub async fn healthcheck() -> &'static str {
    metric!(counter("healthcheck") += 1);
    "ok"
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    timestamp: String,
    provider: &'static str,
}

async fn health(State(service): State<WeatherService>) -> Json<Health> {
    Json(Health {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339(),
        provider: service.provider().name(),
    })
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "name": "nimbus",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "/health",
            "weather": {
                "current": "/api/weather/current?city=<city>&unit=<celsius|fahrenheit>",
                "forecast": "/api/weather/forecast?city=<city>&days=7",
                "hourly": "/api/weather/hourly?city=<city>&hours=24",
                "historical": "/api/weather/historical?city=<city>&date=<YYYY-MM-DD>",
                "future": "/api/weather/future?city=<city>&date=<YYYY-MM-DD>",
                "search": "/api/weather/search?q=<query>&limit=5",
            },
            "cache": {
                "stats": "GET /api/cache/stats",
                "flush": "DELETE /api/cache",
            },
        },
    }))
}

async fn not_found() -> (StatusCode, Json<ApiErrorResponse>) {
    let err = anyhow::anyhow!("Endpoint not found");
    (StatusCode::NOT_FOUND, Json(err.into()))
}

/// Allows browsers to call the API from the configured origins, or from anywhere.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin `{}`", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

pub fn create_app(service: WeatherService, config: &HttpConfig) -> Router {
    // The layers here go "top to bottom" according to the reading order here.
    let layer = ServiceBuilder::new()
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(MetricsLayer)
        .layer(cors_layer(&config.cors_origins));

    let api_limiter = RateLimiter::new(
        "api",
        config.api_rate_limit,
        "Too many requests from this IP, please try again later.",
    );
    let weather_limiter = RateLimiter::new(
        "weather",
        config.weather_rate_limit,
        "Too many weather requests, please slow down.",
    );

    let weather = Router::new()
        .route("/current", get(weather::current))
        .route("/forecast", get(weather::forecast))
        .route("/hourly", get(weather::hourly))
        .route("/historical", get(weather::historical))
        .route("/future", get(weather::future))
        .route("/search", get(weather::search))
        .route_layer(middleware::from_fn_with_state(
            weather_limiter,
            limit_requests,
        ));

    let api = Router::new()
        .nest("/weather", weather)
        .route("/cache/stats", get(cache::stats))
        .route("/cache", delete(cache::flush))
        .route_layer(middleware::from_fn_with_state(api_limiter, limit_requests));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .nest("/api", api)
        .fallback(not_found)
        .with_state(service)
        .layer(layer)
        // the healthcheck is last, as it will bypass all the middlewares
        .route("/healthcheck", get(healthcheck))
}
