//! Structured logging.
//!
//! # Responsibilities
//! - Build a per-service logger from the configured level and format
//! - Carry the service name on every event
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, text format for development
//! - Each [`Logger`] owns its own dispatcher instead of installing a global
//!   subscriber, so independently configured services can share a process

use std::fmt;

use tracing::{Dispatch, Span};
use tracing_subscriber::EnvFilter;

/// Handle for emitting events to one service's subscriber.
///
/// Events are written with the ordinary `tracing` macros inside
/// [`Logger::in_scope`]:
///
/// ```no_run
/// # let logger = transform_harness::observability::Logger::disabled();
/// logger.in_scope(|| tracing::info!(port = 8080, "Starting http server"));
/// ```
#[derive(Clone)]
pub struct Logger {
    dispatch: Dispatch,
    span: Span,
}

impl Logger {
    /// Build a logger for `service_name`.
    ///
    /// `format == "text"` selects human-readable output; anything else writes
    /// JSON lines. Unknown levels fall back to `info`.
    pub fn new(service_name: &str, format: &str, level: &str) -> Self {
        let filter = EnvFilter::new(level_directive(level));

        let dispatch = if format == "text" {
            Dispatch::new(
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_target(true)
                    .finish(),
            )
        } else {
            Dispatch::new(
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(filter)
                    .with_current_span(true)
                    .finish(),
            )
        };

        let span = tracing::dispatcher::with_default(&dispatch, || {
            tracing::info_span!("service", service = %service_name)
        });

        Self { dispatch, span }
    }

    /// A logger that discards every event.
    pub fn disabled() -> Self {
        Self {
            dispatch: Dispatch::none(),
            span: Span::none(),
        }
    }

    /// Run `f` with this logger's subscriber and service span active.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, || self.span.in_scope(f))
    }

    /// Derive a logger whose events also carry the span built by `make_span`.
    ///
    /// The new span is a child of this logger's service span.
    pub fn child(&self, make_span: impl FnOnce() -> Span) -> Self {
        let span = self.in_scope(make_span);
        Self {
            dispatch: self.dispatch.clone(),
            span,
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("span", &self.span).finish()
    }
}

fn level_directive(level: &str) -> &'static str {
    match level.to_ascii_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}
