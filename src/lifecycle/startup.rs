//! Startup orchestration.
//!
//! # Responsibilities
//! - Load, enrich and validate configuration
//! - Initialize all subsystems in dependency order
//! - Start background tasks (config updater, metrics client)
//! - Bind the listener and begin accepting traffic
//! - Stop everything together, once
//!
//! # Design Decisions
//! - Fail fast: any startup error is returned, and whatever already started
//!   is stopped before returning
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::loader::{load_config_with, resolve_location, ConfigError, EnvSource, ProcessEnv};
use crate::config::overrides::EnrichConfig;
use crate::config::schema::Config;
use crate::config::validation::{listen_port, validate_config};
use crate::config::watcher::ConfigUpdater;
use crate::http::{AppState, HttpServer};
use crate::lifecycle::shutdown::{stop_all, ShutdownError, Stoppable};
use crate::lifecycle::signals::wait_for_termination;
use crate::observability::{Logger, Metrics, MetricsError, ServiceMetrics};
use crate::transform::{ConfigListener, ServiceFactory, TransformError, TransformService};

/// Grace period given to components when stopping.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Process exit code after a clean shutdown.
pub const EXIT_CLEAN: i32 = 0;
/// Process exit code when startup fails.
pub const EXIT_START_FAILURE: i32 = 1;
/// Process exit code when any component fails to stop.
pub const EXIT_STOP_FAILURE: i32 = 2;

/// How a [`ServiceRunner`] finds and prepares its configuration.
#[derive(Clone)]
pub struct RunnerOptions {
    /// Config file or directory. Falls back to `DATALAYER_CONFIG_PATH`, then
    /// `./config`.
    pub config_location: Option<PathBuf>,
    /// Applied after every load, at startup and on each reload.
    pub enrich: Option<EnrichConfig>,
    pub stop_timeout: Duration,
    pub env: Arc<dyn EnvSource>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            config_location: None,
            enrich: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            env: Arc::new(ProcessEnv),
        }
    }
}

impl RunnerOptions {
    pub fn with_config_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.config_location = Some(location.into());
        self
    }

    pub fn with_enrich(mut self, enrich: EnrichConfig) -> Self {
        self.enrich = Some(enrich);
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn with_env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }
}

impl fmt::Debug for RunnerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerOptions")
            .field("config_location", &self.config_location)
            .field("enrich", &self.enrich.is_some())
            .field("stop_timeout", &self.stop_timeout)
            .finish()
    }
}

/// Startup failure.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("service runner already started")]
    AlreadyStarted,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error("failed to build transformation service: {0}")]
    Service(#[source] TransformError),

    #[error("failed to listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
}

struct Running {
    logger: Logger,
    service: Arc<dyn TransformService>,
    updater: Arc<ConfigUpdater>,
    local_addr: SocketAddr,
    /// Stopped together, errors reported in this order.
    stoppables: Vec<Arc<dyn Stoppable>>,
}

enum RunnerState {
    Idle,
    Running(Running),
    Stopped,
}

/// Wires config, service, updater and ingress into one stoppable unit.
pub struct ServiceRunner {
    options: RunnerOptions,
    factory: Box<dyn ServiceFactory>,
    state: RunnerState,
}

impl ServiceRunner {
    pub fn new(options: RunnerOptions, factory: impl ServiceFactory + 'static) -> Self {
        Self {
            options,
            factory: Box::new(factory),
            state: RunnerState::Idle,
        }
    }

    /// Load config and start every component. Returns the ingress address.
    pub async fn start(&mut self) -> Result<SocketAddr, StartError> {
        if !matches!(self.state, RunnerState::Idle) {
            return Err(StartError::AlreadyStarted);
        }

        let mut started: Vec<Arc<dyn Stoppable>> = Vec::new();
        let mut logger = None;
        let wired = self.wire(&mut started, &mut logger).await;
        match wired {
            Ok(running) => {
                let addr = running.local_addr;
                running
                    .logger
                    .in_scope(|| tracing::info!(address = %addr, "Service started"));
                self.state = RunnerState::Running(running);
                Ok(addr)
            }
            Err(e) => {
                // Before the config is loaded there is no service logger yet.
                let report = |event: &dyn Fn()| match &logger {
                    Some(logger) => logger.in_scope(event),
                    None => event(),
                };
                report(&|| tracing::error!(error = %e, "Failed to start service"));
                if !started.is_empty() {
                    let deadline = Instant::now() + self.options.stop_timeout;
                    if let Err(stop_err) = stop_all(&started, deadline).await {
                        report(&|| tracing::warn!(error = %stop_err, "Failed to unwind partial startup"));
                    }
                }
                Err(e)
            }
        }
    }

    async fn wire(
        &self,
        started: &mut Vec<Arc<dyn Stoppable>>,
        built_logger: &mut Option<Logger>,
    ) -> Result<Running, StartError> {
        let env = Arc::clone(&self.options.env);
        let location = resolve_location(self.options.config_location.as_deref(), env.as_ref());

        let mut config = load_config_with(&location, env.as_ref())?;
        if let Some(enrich) = &self.options.enrich {
            config.enrich(enrich)?;
        }
        validate_config(&config)?;
        let port = listen_port(&config)?;
        let config = Arc::new(config);

        let layer = &config.layer;
        let logger = Logger::new(&layer.service_name, &layer.log_format, &layer.log_level);
        *built_logger = Some(logger.clone());
        logger.in_scope(|| {
            tracing::info!(
                path = %location.display(),
                port = %layer.port,
                refresh_interval = %layer.config_refresh_interval,
                "Configuration loaded"
            )
        });

        let metrics = Arc::new(ServiceMetrics::from_config(&config)?);
        started.push(metrics.clone());

        let service = self
            .factory
            .build(Arc::clone(&config), logger.clone(), metrics.clone())
            .map_err(StartError::Service)?;
        let service_handle: Arc<dyn Stoppable> = Arc::new(Arc::clone(&service));
        started.push(Arc::clone(&service_handle));

        let listener: Arc<dyn ConfigListener> = Arc::new(Arc::clone(&service));
        let updater = Arc::new(ConfigUpdater::start(
            Arc::clone(&config),
            self.options.enrich.clone(),
            env,
            logger.child(|| tracing::info_span!("config_updater")),
            vec![listener],
        )?);
        started.push(updater.clone());

        let state = AppState {
            service: Arc::clone(&service),
            logger: logger.child(|| tracing::info_span!("http")),
            metrics: metrics.clone() as Arc<dyn Metrics>,
        };
        let bind_error = |source: io::Error| StartError::Bind {
            address: format!("0.0.0.0:{port}"),
            source,
        };
        let mut server = HttpServer::bind(port, state).await.map_err(bind_error)?;
        server.start().map_err(bind_error)?;
        let local_addr = server.local_addr();
        let server = Arc::new(server);
        started.push(server.clone());

        Ok(Running {
            logger,
            service,
            updater: updater.clone(),
            local_addr,
            stoppables: vec![service_handle, updater, server, metrics],
        })
    }

    /// Stop every component, giving them the configured stop timeout.
    ///
    /// Calling stop again, or before start, does nothing.
    pub async fn stop(&mut self) -> Result<(), ShutdownError> {
        let deadline = Instant::now() + self.options.stop_timeout;
        self.stop_with_deadline(deadline).await
    }

    /// Stop every component against one shared deadline. Same no-op rules as
    /// [`ServiceRunner::stop`].
    pub async fn stop_with_deadline(&mut self, deadline: Instant) -> Result<(), ShutdownError> {
        let running = match std::mem::replace(&mut self.state, RunnerState::Stopped) {
            RunnerState::Running(running) => running,
            other => {
                self.state = other;
                return Ok(());
            }
        };

        let grace_period = deadline.saturating_duration_since(Instant::now());
        running
            .logger
            .in_scope(|| tracing::info!(grace_period = ?grace_period, "Stopping service"));
        let result = stop_all(&running.stoppables, deadline).await;

        running.logger.in_scope(|| match &result {
            Ok(()) => tracing::info!("Shutdown complete"),
            Err(e) => {
                for err in e.errors() {
                    tracing::error!(component = err.component(), error = %err, "Component failed to stop");
                }
            }
        });
        result
    }

    /// Start, wait for `stop_signal`, stop. Returns the process exit code:
    /// [`EXIT_CLEAN`], [`EXIT_START_FAILURE`] or [`EXIT_STOP_FAILURE`].
    pub async fn run_until(&mut self, stop_signal: impl Future<Output = ()>) -> i32 {
        self.run_with(|_| stop_signal).await
    }

    /// Start, wait for SIGINT or SIGTERM, stop. Returns the process exit code.
    pub async fn run_until_signal(&mut self) -> i32 {
        self.run_with(|logger| async move {
            let result = wait_for_termination().await;
            logger.in_scope(|| match result {
                Ok(signal) => tracing::info!(signal = ?signal, "Shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signals"),
            });
        })
        .await
    }

    /// `wait` gets the running service's logger once startup succeeds.
    async fn run_with<F, Fut>(&mut self, wait: F) -> i32
    where
        F: FnOnce(Logger) -> Fut,
        Fut: Future<Output = ()>,
    {
        if let Err(e) = self.start().await {
            eprintln!("failed to start service: {e}");
            return EXIT_START_FAILURE;
        }
        let logger = match &self.state {
            RunnerState::Running(running) => running.logger.clone(),
            _ => Logger::disabled(),
        };

        wait(logger).await;

        match self.stop().await {
            Ok(()) => EXIT_CLEAN,
            Err(_) => EXIT_STOP_FAILURE,
        }
    }

    /// Run until a termination signal, then exit the process.
    pub async fn start_and_wait(mut self) {
        let code = self.run_until_signal().await;
        std::process::exit(code);
    }

    /// Address the ingress is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            RunnerState::Running(running) => Some(running.local_addr),
            _ => None,
        }
    }

    pub fn service(&self) -> Option<Arc<dyn TransformService>> {
        match &self.state {
            RunnerState::Running(running) => Some(Arc::clone(&running.service)),
            _ => None,
        }
    }

    /// The configuration most recently adopted by the updater.
    pub fn current_config(&self) -> Option<Arc<Config>> {
        match &self.state {
            RunnerState::Running(running) => Some(running.updater.current()),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, RunnerState::Running(_))
    }
}
