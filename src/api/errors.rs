//! HTTP error rendering for `BrokerError` (spec.md §4.4 "every C4.Reject
//! reason is surfaced with a machine-readable code").
//!
//! Shape modeled on the teacher's `api::errors::ErrorResponse`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::BrokerError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
            retry_after_secs: self.retry_after().map(|d| d.as_secs()),
        };
        (status, Json(body)).into_response()
    }
}
