//! Shutdown coordination.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{timeout_at, Instant};

/// Boxed error used where the cause comes from an arbitrary component.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers (tasks still running).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// A long-running component that can be asked to release its resources.
///
/// `stop` may be called while the component is serving and must return by
/// `deadline`; background work the component owns is responsible for
/// observing the deadline itself.
#[async_trait]
pub trait Stoppable: Send + Sync {
    /// Name used when reporting stop failures.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn stop(&self, deadline: Instant) -> Result<(), StopError>;
}

/// Failure of a single component to stop.
#[derive(Debug, Error)]
pub enum StopError {
    #[error("{component} did not stop before the deadline")]
    DeadlineExceeded { component: String },

    #[error("{component} failed to stop: {source}")]
    Failed {
        component: String,
        #[source]
        source: BoxError,
    },
}

impl StopError {
    pub fn failed(component: impl Into<String>, source: impl Into<BoxError>) -> Self {
        StopError::Failed {
            component: component.into(),
            source: source.into(),
        }
    }

    pub fn component(&self) -> &str {
        match self {
            StopError::DeadlineExceeded { component } | StopError::Failed { component, .. } => {
                component
            }
        }
    }
}

/// Every stop failure from one shutdown, in registration order.
#[derive(Debug)]
pub struct ShutdownError {
    errors: Vec<StopError>,
}

impl ShutdownError {
    pub fn first(&self) -> &StopError {
        &self.errors[0]
    }

    pub fn errors(&self) -> &[StopError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<StopError> {
        self.errors
    }
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shutdown failed: ")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ShutdownError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors.first().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Stop every component concurrently against one shared deadline.
///
/// A component still running at the deadline is reported as
/// [`StopError::DeadlineExceeded`] and not awaited further. All failures are
/// returned, not just the first.
pub async fn stop_all(stoppables: &[Arc<dyn Stoppable>], deadline: Instant) -> Result<(), ShutdownError> {
    let results = join_all(stoppables.iter().map(|stoppable| async move {
        match timeout_at(deadline, stoppable.stop(deadline)).await {
            Ok(result) => result,
            Err(_) => Err(StopError::DeadlineExceeded {
                component: stoppable.name().to_string(),
            }),
        }
    }))
    .await;

    let errors: Vec<StopError> = results.into_iter().filter_map(Result::err).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ShutdownError { errors })
    }
}
