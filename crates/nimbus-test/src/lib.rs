//! Helpers for testing the web server and service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`Upstream`] or [`Server`], make sure that the server is held until all requests
//!    to it have been made. If the server is dropped, the port is closed and all requests to it
//!    fail. To avoid this, assign it to a variable: `let upstream = Upstream::new();`.
//!
//!  - The [`Upstream`] serves canned responses from the `tests/fixtures` directory. Every city
//!    except [`UNKNOWN_CITY`] resolves to the same fixture data.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use reqwest::Url;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// A city name that no upstream knows.
pub const UNKNOWN_CITY: &str = "Atlantis";

/// The API key the [`Upstream`] expects for WeatherAPI.com requests.
pub const WEATHERAPI_KEY: &str = "test-key";

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the nimbus crates and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("nimbus=trace,nimbus_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped, unless
/// [`into_path`](TempDir::into_path) is called. Use it as a guard to automatically clean up after
/// tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Returns the absolute path to the given fixture.
///
/// Fixtures are located in the `tests/fixtures` directory, located from the workspace root.
///
/// # Panics
///
/// Panics if the fixture path does not exist on the file system.
pub fn fixture(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();

    let mut full_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    full_path.pop(); // to /crates/
    full_path.pop(); // to /
    full_path.push("./tests/fixtures/");
    full_path.push(path);

    assert!(full_path.exists(), "'{}' does not exist", path.display());

    full_path
}

/// Returns the contents of a fixture.
///
/// # Panics
///
/// Panics if the fixture does not exist or cannot be read.
pub fn read_fixture(path: impl AsRef<Path>) -> Vec<u8> {
    std::fs::read(fixture(path)).unwrap()
}

/// Returns the contents of a fixture parsed as JSON.
pub fn json_fixture(path: impl AsRef<Path>) -> serde_json::Value {
    serde_json::from_slice(&read_fixture(path)).unwrap()
}

/// A test server that binds to a random port and serves a web app.
///
/// Handlers can extract the client address with [`ConnectInfo`](axum::extract::ConnectInfo).
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl Server {
    /// Creates a new test server serving the given router.
    pub fn new(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            let app = router.into_make_service_with_connect_info::<SocketAddr>();
            axum::serve(listener, app).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://127.0.0.1:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Default)]
struct UpstreamState {
    hits: Mutex<BTreeMap<String, usize>>,
    delay: Mutex<Duration>,
    failure: Mutex<Option<StatusCode>>,
}

/// Counts hits per path, then applies the configured delay and failure.
async fn track(State(state): State<Arc<UpstreamState>>, request: Request, next: Next) -> Response {
    {
        let mut hits = state.hits.lock().unwrap();
        *hits.entry(request.uri().path().to_owned()).or_default() += 1;
    }

    let delay = *state.delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let failure = *state.failure.lock().unwrap();
    if let Some(status) = failure {
        return (status, "simulated upstream failure").into_response();
    }

    next.run(request).await
}

fn fixture_response(path: &str) -> Response {
    (
        [(header::CONTENT_TYPE, "application/json")],
        read_fixture(path),
    )
        .into_response()
}

fn weatherapi_error(status: StatusCode, code: u32, message: &str) -> Response {
    let body = serde_json::json!({ "error": { "code": code, "message": message } });
    (status, axum::Json(body)).into_response()
}

/// Mimics WeatherAPI.com, including its API key check and unknown location errors.
fn weatherapi_response(endpoint: &str, params: &HashMap<String, String>) -> Response {
    match params.get("key") {
        None => {
            return weatherapi_error(
                StatusCode::UNAUTHORIZED,
                1002,
                "API key is invalid or not provided.",
            );
        }
        Some(key) if key != WEATHERAPI_KEY => {
            return weatherapi_error(StatusCode::UNAUTHORIZED, 2006, "API key is invalid.");
        }
        Some(_) => {}
    }

    match params.get("q").map(String::as_str) {
        None | Some("") => {
            weatherapi_error(StatusCode::BAD_REQUEST, 1003, "Parameter q is missing.")
        }
        Some(UNKNOWN_CITY) if endpoint != "search" => {
            weatherapi_error(StatusCode::BAD_REQUEST, 1006, "No matching location found.")
        }
        Some(UNKNOWN_CITY) => axum::Json(serde_json::json!([])).into_response(),
        Some(_) => fixture_response(&format!("weatherapi/{endpoint}.json")),
    }
}

fn weatherapi_routes() -> Router<()> {
    let route = |endpoint: &'static str| {
        get(move |Query(params): Query<HashMap<String, String>>| async move {
            weatherapi_response(endpoint, &params)
        })
    };

    Router::new()
        .route("/weatherapi/v1/current.json", route("current"))
        .route("/weatherapi/v1/forecast.json", route("forecast"))
        .route("/weatherapi/v1/history.json", route("history"))
        .route("/weatherapi/v1/future.json", route("future"))
        .route("/weatherapi/v1/search.json", route("search"))
}

fn openmeteo_routes() -> Router<()> {
    Router::new()
        .route(
            "/openmeteo/v1/forecast",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                if params.contains_key("current") {
                    fixture_response("openmeteo/current.json")
                } else {
                    fixture_response("openmeteo/forecast.json")
                }
            }),
        )
        .route(
            "/geocoding/v1/search",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                match params.get("name").map(String::as_str) {
                    Some(UNKNOWN_CITY) => {
                        axum::Json(serde_json::json!({ "generationtime_ms": 0.3 })).into_response()
                    }
                    _ => fixture_response("openmeteo/geocoding.json"),
                }
            }),
        )
}

/// A fake weather API serving WeatherAPI.com and Open-Meteo fixtures.
///
/// Every request is counted, so tests can check how many requests actually went upstream.
pub struct Upstream {
    server: Server,
    state: Arc<UpstreamState>,
}

impl Upstream {
    pub fn new() -> Self {
        let state = Arc::new(UpstreamState::default());

        let router = weatherapi_routes()
            .merge(openmeteo_routes())
            .layer(middleware::from_fn_with_state(state.clone(), track));

        let server = Server::new(router);
        Self { server, state }
    }

    /// Delays every response by the given duration.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    /// Answers every request with the given status, or serves fixtures again with `None`.
    pub fn fail_with(&self, status: Option<StatusCode>) {
        *self.state.failure.lock().unwrap() = status;
    }

    /// Returns the number of requests since the last call, and resets the counters.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.state.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns the hits per path since the last call, and resets the counters.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.state.hits.lock().unwrap());
        map.into_iter().collect()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }

    /// The base URL of the fake WeatherAPI.com.
    pub fn weatherapi_url(&self) -> Url {
        self.url("weatherapi/v1/")
    }

    /// The base URL of the fake Open-Meteo forecast API.
    pub fn openmeteo_url(&self) -> Url {
        self.url("openmeteo/v1/")
    }

    /// The base URL of the fake Open-Meteo geocoding API.
    pub fn geocoding_url(&self) -> Url {
        self.url("geocoding/v1/")
    }
}

impl Default for Upstream {
    fn default() -> Self {
        Self::new()
    }
}
