//! Periodic configuration reload.
//!
//! # Responsibilities
//! - Reload the snapshot from its source on a fixed interval
//! - Re-apply environment and enrichment, compare against the baseline
//! - Hand changed snapshots to every listener in registration order
//!
//! # Design Decisions
//! - Polling instead of filesystem notifications: the source may be a
//!   directory or a mounted volume where events are unreliable
//! - The baseline only advances after every listener accepted the candidate;
//!   a failing listener sees the same change again on the next tick

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout_at, Instant, MissedTickBehavior};

use crate::config::loader::{load_config_with, ConfigError, EnvSource};
use crate::config::overrides::EnrichConfig;
use crate::config::schema::Config;
use crate::config::validation::parse_refresh_interval;
use crate::lifecycle::{Shutdown, StopError, Stoppable};
use crate::observability::Logger;
use crate::transform::ConfigListener;

/// Result of a single reload tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The reloaded snapshot equals the baseline.
    Unchanged,
    /// Every listener accepted the change and the baseline advanced.
    Applied,
    /// The source could not be read or decoded.
    LoadFailed,
    /// The enrichment function rejected the reloaded snapshot.
    EnrichFailed,
    /// The listener at `index` rejected the change.
    ListenerFailed { index: usize },
}

/// The reload step, separate from the timer that drives it.
pub struct Reloader {
    source: PathBuf,
    enrich: Option<EnrichConfig>,
    env: Arc<dyn EnvSource>,
    logger: Logger,
    listeners: Vec<Arc<dyn ConfigListener>>,
    baseline: ArcSwap<Config>,
    failures: AtomicU32,
}

impl Reloader {
    pub fn new(
        baseline: Arc<Config>,
        enrich: Option<EnrichConfig>,
        env: Arc<dyn EnvSource>,
        logger: Logger,
        listeners: Vec<Arc<dyn ConfigListener>>,
    ) -> Self {
        Self {
            source: baseline.config_file.clone(),
            enrich,
            env,
            logger,
            listeners,
            baseline: ArcSwap::new(baseline),
            failures: AtomicU32::new(0),
        }
    }

    /// Reload once and propagate if the snapshot changed.
    pub async fn tick(&self) -> TickOutcome {
        let candidate = match self.reload() {
            Ok(config) => Arc::new(config),
            Err((outcome, e)) => {
                self.logger.in_scope(|| {
                    tracing::error!(
                        path = %self.source.display(),
                        error = %e,
                        "Failed to reload config. Keeping current configuration."
                    )
                });
                return outcome;
            }
        };

        if *candidate == **self.baseline.load() {
            return TickOutcome::Unchanged;
        }

        self.logger
            .in_scope(|| tracing::info!(path = %self.source.display(), "Config change detected"));

        for (index, listener) in self.listeners.iter().enumerate() {
            if let Err(e) = listener.update_configuration(Arc::clone(&candidate)).await {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                self.logger.in_scope(|| {
                    tracing::error!(
                        listener = index,
                        consecutive_failures = failures,
                        error = %e,
                        "Config listener rejected update, will retry on next tick"
                    )
                });
                return TickOutcome::ListenerFailed { index };
            }
        }

        self.baseline.store(candidate);
        self.failures.store(0, Ordering::SeqCst);
        self.logger.in_scope(|| tracing::info!("Config update applied"));
        TickOutcome::Applied
    }

    fn reload(&self) -> Result<Config, (TickOutcome, ConfigError)> {
        let mut config = load_config_with(&self.source, self.env.as_ref())
            .map_err(|e| (TickOutcome::LoadFailed, e))?;
        if let Some(enrich) = &self.enrich {
            config
                .enrich(enrich)
                .map_err(|e| (TickOutcome::EnrichFailed, e))?;
        }
        Ok(config)
    }

    /// The last adopted snapshot.
    pub fn current(&self) -> Arc<Config> {
        self.baseline.load_full()
    }

    /// Ticks in a row where a listener rejected the change.
    pub fn propagation_failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}

/// Drives a [`Reloader`] from a background task.
pub struct ConfigUpdater {
    reloader: Arc<Reloader>,
    shutdown: Shutdown,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigUpdater {
    /// Start reloading every `config_refresh_interval` of `baseline`.
    ///
    /// The first reload happens one interval after start. Must be called from
    /// within a Tokio runtime.
    pub fn start(
        baseline: Arc<Config>,
        enrich: Option<EnrichConfig>,
        env: Arc<dyn EnvSource>,
        logger: Logger,
        listeners: Vec<Arc<dyn ConfigListener>>,
    ) -> Result<Self, ConfigError> {
        let period = parse_refresh_interval(&baseline.layer.config_refresh_interval)?;
        let reloader = Arc::new(Reloader::new(baseline, enrich, env, logger, listeners));
        let shutdown = Shutdown::new();

        let mut stop_rx = shutdown.subscribe();
        let worker = Arc::clone(&reloader);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        worker.tick().await;
                    }
                    _ = stop_rx.recv() => break,
                }
            }
        });

        reloader.logger.in_scope(|| {
            tracing::info!(
                path = %reloader.source.display(),
                interval = ?period,
                "Config updater started"
            )
        });

        Ok(Self {
            reloader,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn current(&self) -> Arc<Config> {
        self.reloader.current()
    }

    pub fn propagation_failures(&self) -> u32 {
        self.reloader.propagation_failures()
    }
}

#[async_trait]
impl Stoppable for ConfigUpdater {
    fn name(&self) -> &str {
        "config updater"
    }

    async fn stop(&self, deadline: Instant) -> Result<(), StopError> {
        self.shutdown.trigger();
        let Some(task) = self.task.lock().await.take() else {
            return Ok(());
        };

        match timeout_at(deadline, task).await {
            Ok(Ok(())) => {
                self.reloader
                    .logger
                    .in_scope(|| tracing::info!("Config updater stopped"));
                Ok(())
            }
            Ok(Err(e)) => Err(StopError::failed(self.name(), e)),
            Err(_) => {
                self.reloader.logger.in_scope(|| {
                    tracing::warn!("Config updater still reloading at deadline, leaving it to finish")
                });
                Ok(())
            }
        }
    }
}
