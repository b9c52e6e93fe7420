use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use nimbus_service::caching::CacheError;
use nimbus_service::location::LocationError;
use nimbus_service::providers::ProviderError;
use nimbus_service::services::root_producer_error;
use sentry::integrations::anyhow::capture_anyhow;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub struct ResponseError {
    status: StatusCode,
    err: anyhow::Error,
}

impl ResponseError {
    /// A `400 Bad Request` for missing or invalid query parameters.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            err: anyhow::anyhow!(message.into()),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<LocationError> for ResponseError {
    fn from(err: LocationError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            err: err.into(),
        }
    }
}

/// The status code for a failed upstream request.
fn provider_status(err: &ProviderError) -> StatusCode {
    match err {
        ProviderError::InvalidLocation(_) => StatusCode::BAD_REQUEST,
        ProviderError::NotFound(_) => StatusCode::NOT_FOUND,
        ProviderError::Unsupported { .. } => StatusCode::NOT_IMPLEMENTED,
        ProviderError::Request(err) if err.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
        ProviderError::Upstream { .. } | ProviderError::Request(_) | ProviderError::Malformed(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

impl From<CacheError> for ResponseError {
    fn from(err: CacheError) -> Self {
        // Report the failing producer itself rather than the caches wrapping it.
        match root_producer_error(&err) {
            Some(producer) => {
                let status = producer
                    .downcast_ref::<ProviderError>()
                    .map(provider_status)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                Self {
                    status,
                    err: producer.clone().into(),
                }
            }
            None => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                err: err.into(),
            },
        }
    }
}

impl From<anyhow::Error> for ResponseError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            err,
        }
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() && self.status != StatusCode::NOT_IMPLEMENTED {
            capture_anyhow(&self.err);
        }
        let mut response = Json(ApiErrorResponse::from(self.err)).into_response();
        *response.status_mut() = self.status;
        response
    }
}

/// An error response from an api.
#[derive(Serialize, Deserialize, Default, Debug)]
pub struct ApiErrorResponse {
    pub success: bool,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causes: Option<Vec<String>>,
}

impl From<anyhow::Error> for ApiErrorResponse {
    fn from(err: anyhow::Error) -> Self {
        let mut chain = err.chain().map(|err| err.to_string());
        let error = chain.next();
        let causes: Vec<_> = chain.collect();
        let causes = if causes.is_empty() {
            None
        } else {
            Some(causes)
        };

        ApiErrorResponse {
            success: false,
            error,
            causes,
        }
    }
}
