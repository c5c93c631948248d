//! Sample transformation service.
//!
//! Passes every entity through unchanged using the worker pool, and
//! demonstrates config enrichment with environment overrides.
//!
//! ```text
//! transform-harness ./config/sample_config.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use clap::Parser;
use tokio::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use transform_harness::config::{build_env_overrides, ConfigError};
use transform_harness::lifecycle::StopError;
use transform_harness::transform::{self, ConfigListener, Entity};
use transform_harness::{
    Config, EntityCollection, EnvOverride, Logger, Metrics, RunnerOptions, ServiceRunner,
    Stoppable, TransformError, TransformService,
};

/// Workers used per batch.
const CONCURRENCY: usize = 10;

#[derive(Debug, Parser)]
#[command(name = "transform-harness", version, about = "Sample entity transformation service")]
struct Cli {
    /// Config file or directory. Defaults to $DATALAYER_CONFIG_PATH, then ./config.
    config: Option<PathBuf>,
}

struct SampleTransform {
    config: ArcSwap<Config>,
    logger: Logger,
    metrics: Arc<dyn Metrics>,
}

impl SampleTransform {
    fn build(
        config: Arc<Config>,
        logger: Logger,
        metrics: Arc<dyn Metrics>,
    ) -> Result<Arc<dyn TransformService>, TransformError> {
        Ok(Arc::new(SampleTransform {
            config: ArcSwap::new(config),
            logger,
            metrics,
        }))
    }
}

async fn process_entity(entity: Entity) -> Result<Entity, TransformError> {
    Ok(entity)
}

#[async_trait]
impl TransformService for SampleTransform {
    async fn transform(&self, batch: EntityCollection) -> Result<EntityCollection, TransformError> {
        let count = batch.len() as u64;
        let entities = transform::process(batch.entities, CONCURRENCY, process_entity).await?;
        self.metrics.incr("entities.transformed", &[], count);
        Ok(EntityCollection::new(entities))
    }
}

#[async_trait]
impl ConfigListener for SampleTransform {
    async fn update_configuration(&self, config: Arc<Config>) -> Result<(), TransformError> {
        self.logger
            .in_scope(|| tracing::info!(env = ?config.external.get("env"), "Sample received new config"));
        self.config.store(config);
        Ok(())
    }
}

#[async_trait]
impl Stoppable for SampleTransform {
    fn name(&self) -> &str {
        "sample transform"
    }

    async fn stop(&self, _deadline: Instant) -> Result<(), StopError> {
        let config = self.config.load();
        self.logger.in_scope(|| {
            tracing::info!(service = %config.layer.service_name, "Sample transform stopped")
        });
        Ok(())
    }
}

/// Tag the environment and pull database settings from env vars.
fn enrich_config(config: &mut Config) -> Result<(), ConfigError> {
    config.external.insert("env", "local");
    build_env_overrides(vec![
        EnvOverride::required("db_name"),
        EnvOverride::required("db_user").key("dbUser"),
        EnvOverride::required("db_pwd"),
        EnvOverride::optional("db_timeout"),
    ])(config)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transform_harness=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut options = RunnerOptions::default().with_enrich(Arc::new(enrich_config));
    if let Some(path) = cli.config {
        options = options.with_config_location(path);
    }

    ServiceRunner::new(options, SampleTransform::build)
        .start_and_wait()
        .await;
}
