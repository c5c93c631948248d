//! HTTP ingress subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, panic recovery)
//!     → request.rs (request logging and metrics)
//!     → transform handler (decode, TransformService::transform, encode)
//!     → response.rs (status mapping, JSON error bodies)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::{ApiError, JSON_CONTENT_TYPE};
pub use server::{AppState, HttpServer};
