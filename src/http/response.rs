//! Response mapping for the ingress endpoint.
//!
//! # Responsibilities
//! - Map transformation failures to HTTP status codes
//! - Render error bodies as `{"message": "..."}`
//! - Encode successful batches with the JSON content type
//!
//! # Design Decisions
//! - The status comes from the error kind, never from the message text

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::transform::{EntityCollection, EntityError, ErrorKind, TransformError};

/// Content type of every JSON body written by the ingress.
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// An error returned to the client.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    message: &'a str,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Status code for a failure class.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadParameter => StatusCode::BAD_REQUEST,
        ErrorKind::NotSupported => StatusCode::NOT_IMPLEMENTED,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<TransformError> for ApiError {
    fn from(err: TransformError) -> Self {
        Self::new(status_for(err.kind()), err.to_string())
    }
}

impl From<EntityError> for ApiError {
    fn from(err: EntityError) -> Self {
        Self::new(StatusCode::BAD_REQUEST, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(ErrorBody {
                message: &self.message,
            }),
        )
            .into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        response
    }
}

/// Encode a transformed batch.
pub fn batch_response(batch: &EntityCollection) -> Response {
    match batch.to_vec() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
