//! HTTP error responses.

use crate::error::DocfillError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

/// A [`DocfillError`] on its way to the client.
#[derive(Debug)]
pub struct ApiError(pub DocfillError);

#[derive(Debug, Serialize)]
struct ApiErrorBody {
    error: String,
    kind: &'static str,
}

impl ApiError {
    /// Status code for the wrapped error.
    pub fn status(&self) -> StatusCode {
        status_for(&self.0)
    }
}

impl From<DocfillError> for ApiError {
    fn from(err: DocfillError) -> Self {
        Self(err)
    }
}

/// Map each error kind to a status code.
///
/// Client-caused failures are 4xx. Deployment and engine failures are 5xx,
/// with 503 for a missing conversion engine and 504 for a timed-out one.
pub fn status_for(err: &DocfillError) -> StatusCode {
    match err {
        DocfillError::ConversionEngineUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        DocfillError::ConversionTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        other if other.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.0.kind();

        if status.is_server_error() {
            error!(
                kind,
                status = status.as_u16(),
                error = %self.0,
                "request failed"
            );
        } else {
            warn!(
                kind,
                status = status.as_u16(),
                error = %self.0,
                "request rejected"
            );
        }

        let body = ApiErrorBody {
            error: self.0.public_message(),
            kind,
        };
        (status, Json(body)).into_response()
    }
}
