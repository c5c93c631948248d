//! Transformation service contract.
//!
//! # Data Flow
//! ```text
//! POST /transform (JSON array)
//!     → entity.rs (decode into EntityCollection)
//!     → TransformService::transform (user code, may fan out via pool.rs)
//!     → entity.rs (encode)
//!     → response
//!
//! On config change:
//!     ConfigUpdater → ConfigListener::update_configuration
//! ```
//!
//! # Design Decisions
//! - Services are built once per start by a [`ServiceFactory`] and shared
//!   behind `Arc<dyn TransformService>`
//! - Failures carry an [`ErrorKind`] so the ingress can choose a status code

pub mod entity;
pub mod error;
pub mod pool;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::config::Config;
use crate::lifecycle::{StopError, Stoppable};
use crate::observability::{Logger, Metrics};

pub use entity::{Entity, EntityCollection, EntityError};
pub use error::{ErrorKind, TransformError};
pub use pool::{process, PoolError};

/// Receives every successfully reloaded configuration.
#[async_trait]
pub trait ConfigListener: Send + Sync {
    async fn update_configuration(&self, config: Arc<Config>) -> Result<(), TransformError>;
}

/// User-supplied batch transformation.
///
/// The service is also a config listener and is stopped with the rest of the
/// harness.
#[async_trait]
pub trait TransformService: ConfigListener + Stoppable {
    async fn transform(&self, batch: EntityCollection) -> Result<EntityCollection, TransformError>;
}

#[async_trait]
impl ConfigListener for Arc<dyn TransformService> {
    async fn update_configuration(&self, config: Arc<Config>) -> Result<(), TransformError> {
        (**self).update_configuration(config).await
    }
}

#[async_trait]
impl Stoppable for Arc<dyn TransformService> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn stop(&self, deadline: Instant) -> Result<(), StopError> {
        (**self).stop(deadline).await
    }
}

/// Builds the transformation service from the loaded configuration.
pub trait ServiceFactory: Send + Sync {
    fn build(
        &self,
        config: Arc<Config>,
        logger: Logger,
        metrics: Arc<dyn Metrics>,
    ) -> Result<Arc<dyn TransformService>, TransformError>;
}

impl<F> ServiceFactory for F
where
    F: Fn(Arc<Config>, Logger, Arc<dyn Metrics>) -> Result<Arc<dyn TransformService>, TransformError>
        + Send
        + Sync,
{
    fn build(
        &self,
        config: Arc<Config>,
        logger: Logger,
        metrics: Arc<dyn Metrics>,
    ) -> Result<Arc<dyn TransformService>, TransformError> {
        self(config, logger, metrics)
    }
}
