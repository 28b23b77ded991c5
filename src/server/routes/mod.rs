//! HTTP route handlers

pub mod chat;
pub mod models;

use crate::api::ErrorResponse;
use crate::error::Error;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, kind, code) = match &self {
            Error::Busy => (StatusCode::SERVICE_UNAVAILABLE, "server_busy", "slot_occupied"),
            Error::MalformedRequest(_) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "invalid_request",
            ),
            Error::EngineInit(_) | Error::EngineRun(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "engine_error",
                "inference_failed",
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "internal",
            ),
        };

        (status, Json(ErrorResponse::new(self.to_string(), kind, code))).into_response()
    }
}
