//! Service-error → HTTP mapping.
//!
//! Every typed kind maps deterministically; anything unclassified is
//! logged in full and answered with an opaque 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use tarsy_domain::Error;

/// Standardized JSON error body: `{ "error": "<message>" }`.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

pub fn error_response(err: Error) -> Response {
    match &err {
        Error::Validation { .. } => api_error(StatusCode::BAD_REQUEST, err.to_string()),
        Error::NotFound => api_error(StatusCode::NOT_FOUND, "not found"),
        Error::AlreadyExists(_)
        | Error::NotCancellable
        | Error::ChatExecutionActive => api_error(StatusCode::CONFLICT, err.to_string()),
        Error::ShuttingDown => api_error(StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
        _ => {
            tracing::error!(error = %err, "unclassified service error");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_contracted_codes() {
        let cases = [
            (Error::validation("data", "data field is required"), StatusCode::BAD_REQUEST),
            (Error::NotFound, StatusCode::NOT_FOUND),
            (Error::NotCancellable, StatusCode::CONFLICT),
            (Error::ChatExecutionActive, StatusCode::CONFLICT),
            (Error::AlreadyExists("x".into()), StatusCode::CONFLICT),
            (Error::ShuttingDown, StatusCode::SERVICE_UNAVAILABLE),
            (Error::Database("broken".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(error_response(err).status(), expected);
        }
    }

    #[test]
    fn internal_errors_are_opaque() {
        let response = error_response(Error::Database("password=hunter2 leaked".into()));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // The body must not carry the underlying detail; it is logged
        // instead. (Body content is fixed at build time above.)
    }
}
