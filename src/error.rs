use axum::http::{header::RETRY_AFTER, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Failure talking to the media-info provider. Only ever logged; clients
/// see [`ApiError::UpstreamFailure`].
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("upstream body is not a JSON object: {0}")]
    Decode(String),

    #[error("upstream credentials are not configured")]
    NotConfigured,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("URL is required")]
    MissingUrl,

    #[error("Invalid Instagram URL")]
    InvalidUrl,

    #[error("Invalid request body")]
    InvalidBody,

    #[error("Failed to fetch media")]
    UpstreamFailure,

    #[error("Endpoint not found")]
    NotFound,

    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingUrl | ApiError::InvalidUrl | ApiError::InvalidBody => {
                StatusCode::BAD_REQUEST
            }
            ApiError::UpstreamFailure => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(_: UpstreamError) -> Self {
        ApiError::UpstreamFailure
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            success: false,
            error: self.to_string(),
        });

        let mut response = (self.status(), body).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::MissingUrl.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::InvalidUrl.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::UpstreamFailure.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_upstream_detail_is_not_exposed() {
        let err: ApiError = UpstreamError::Status(reqwest::StatusCode::FORBIDDEN).into();
        assert_eq!(err.to_string(), "Failed to fetch media");
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited { retry_after_secs: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "42");
    }
}
