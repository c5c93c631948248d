//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use transform_harness::config::EnvSource;
use transform_harness::lifecycle::{ServiceRunner, StopError};
use transform_harness::transform::{self, ConfigListener, Entity, ServiceFactory};
use transform_harness::{
    Config, EntityCollection, Logger, Metrics, RunnerOptions, Stoppable, TransformError,
    TransformService,
};

/// Write a config document with the given external block, listening on an
/// OS-assigned port.
pub fn write_config(path: &Path, interval: &str, external: Value) {
    let doc = json!({
        "external_config": external,
        "layer_config": {
            "service_name": "harness-test",
            "port": 0,
            "config_refresh_interval": interval,
            "log_level": "error",
            "log_format": "text"
        }
    });
    std::fs::write(path, doc.to_string()).unwrap();
}

/// A temp dir holding `config.json`. Keep the dir alive for the test.
pub fn config_fixture(interval: &str, external: Value) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    write_config(&path, interval, external);
    (dir, path)
}

pub fn env(pairs: &[(&str, &str)]) -> Arc<dyn EnvSource> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Arc::new(map)
}

pub fn options(path: &Path) -> RunnerOptions {
    RunnerOptions::default()
        .with_config_location(path)
        .with_env(env(&[]))
        .with_stop_timeout(Duration::from_secs(2))
}

/// Transformation service that records what the harness does to it.
///
/// Entities with the ids `bad`, `unsupported`, `boom` and `panic` fail with
/// the matching error class; every other entity gets `"seen": true`.
#[derive(Default)]
pub struct RecordingService {
    configs: Mutex<Vec<Arc<Config>>>,
    stops: AtomicUsize,
    fail_stop: bool,
}

impl RecordingService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_stop() -> Arc<Self> {
        Arc::new(Self {
            fail_stop: true,
            ..Self::default()
        })
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn configs(&self) -> Vec<Arc<Config>> {
        self.configs.lock().unwrap().clone()
    }
}

async fn mark(mut entity: Entity) -> Result<Entity, TransformError> {
    match entity.id.as_str() {
        "bad" => Err(TransformError::bad_parameter("entity bad is malformed")),
        "unsupported" => Err(TransformError::not_supported("cannot handle unsupported")),
        "boom" => Err(TransformError::internal("downstream exploded")),
        _ => {
            entity.props.insert("seen".into(), Value::Bool(true));
            Ok(entity)
        }
    }
}

#[async_trait]
impl TransformService for RecordingService {
    async fn transform(&self, batch: EntityCollection) -> Result<EntityCollection, TransformError> {
        if batch.entities.iter().any(|e| e.id == "panic") {
            panic!("transform panicked");
        }
        let entities = transform::process(batch.entities, 3, mark).await?;
        Ok(EntityCollection::new(entities))
    }
}

#[async_trait]
impl ConfigListener for RecordingService {
    async fn update_configuration(&self, config: Arc<Config>) -> Result<(), TransformError> {
        self.configs.lock().unwrap().push(config);
        Ok(())
    }
}

#[async_trait]
impl Stoppable for RecordingService {
    fn name(&self) -> &str {
        "recording service"
    }

    async fn stop(&self, _deadline: Instant) -> Result<(), StopError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(StopError::failed(self.name(), "flush failed"));
        }
        Ok(())
    }
}

/// Factory handing out the given service instance.
pub fn factory_for(service: Arc<RecordingService>) -> impl ServiceFactory {
    move |_config: Arc<Config>,
          _logger: Logger,
          _metrics: Arc<dyn Metrics>|
          -> Result<Arc<dyn TransformService>, TransformError> { Ok(service.clone()) }
}

pub fn runner(path: &Path, service: Arc<RecordingService>) -> ServiceRunner {
    ServiceRunner::new(options(path), factory_for(service))
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://127.0.0.1:{}{}", addr.port(), path)
}

/// Poll `/health` until it answers.
pub async fn wait_for_health(addr: SocketAddr) {
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if let Ok(resp) = client.get(url(addr, "/health")).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("service at {addr} never became healthy");
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    check()
}
