//! Typed failures returned by transformation services.

use std::fmt;

use crate::lifecycle::BoxError;

/// Failure class. The ingress maps it to a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The caller sent something the service cannot accept.
    BadParameter,
    /// The service failed while processing valid input.
    Internal,
    /// The operation is not implemented by this service.
    NotSupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::BadParameter => write!(f, "bad parameter"),
            ErrorKind::Internal => write!(f, "internal error"),
            ErrorKind::NotSupported => write!(f, "not supported"),
        }
    }
}

/// Error returned by a transformation service.
#[derive(Debug)]
pub struct TransformError {
    kind: ErrorKind,
    source: BoxError,
}

impl TransformError {
    pub fn new(kind: ErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn bad_parameter(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::BadParameter, message.to_string())
    }

    pub fn internal(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Internal, message.to_string())
    }

    pub fn not_supported(message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NotSupported, message.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The wrapped cause.
    pub fn underlying(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }

    pub fn into_inner(self) -> BoxError {
        self.source
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for TransformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}
