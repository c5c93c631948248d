//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Give services a small [`Metrics`] sink (counters, timings, gauges)
//! - Push every sample to a StatsD agent when enabled
//! - Keep an in-process Prometheus view of the same samples
//!
//! # Metrics
//! - `<service>.http.count` (counter): requests by method, url, status
//! - `<service>.http.time` (timer): request latency
//! - `<service>.http.size` (gauge): last response body size
//!
//! # Design Decisions
//! - The agent address is a push target, resolved once at startup; hostnames
//!   such as `dd-agent:8125` are fine
//! - Datagrams are sent from a queue worker thread, never on the request path
//! - The recorder belongs to the service instance; nothing is installed
//!   globally, recording goes through `metrics::with_local_recorder`
//! - Disabled metrics cost nothing beyond the trait call

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use async_trait::async_trait;
use cadence::{
    Counted, Gauged, MetricError, QueuingMetricSink, StatsdClient, Timed, UdpMetricSink,
};
use metrics::Label;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusRecorder};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::Config;
use crate::lifecycle::{StopError, Stoppable};

/// A metric label.
pub type Tag = (&'static str, String);

/// Metric sink handed to transformation services.
pub trait Metrics: Send + Sync {
    fn incr(&self, name: &str, tags: &[Tag], value: u64);
    fn timing(&self, name: &str, elapsed: Duration, tags: &[Tag]);
    fn gauge(&self, name: &str, value: f64, tags: &[Tag]);
}

/// Errors raised while setting up the StatsD client.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("invalid metrics agent address {address:?}: {source}")]
    Address {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to open metrics socket: {0}")]
    Socket(#[from] io::Error),
    #[error("failed to create metrics sink: {0}")]
    Sink(#[from] MetricError),
}

/// Resolve the agent address to the first socket address it yields.
fn resolve_agent(address: &str) -> Result<SocketAddr, MetricsError> {
    let invalid = |source| MetricsError::Address {
        address: address.to_string(),
        source,
    };
    address.to_socket_addrs().map_err(invalid)?.next().ok_or_else(|| {
        invalid(io::Error::new(
            io::ErrorKind::InvalidInput,
            "address resolved to nothing",
        ))
    })
}

/// Metrics pushed to a StatsD agent, mirrored into a local recorder.
pub struct ServiceMetrics {
    namespace: String,
    recorder: Option<PrometheusRecorder>,
    statsd: Option<StatsdClient>,
}

impl ServiceMetrics {
    /// Build metrics from the service block of `config`.
    ///
    /// When `statsd_enabled` is set, samples are sent over UDP to
    /// `statsd_agent_address`, prefixed with the service name and tagged with
    /// `application:<service>`.
    pub fn from_config(config: &Config) -> Result<Self, MetricsError> {
        let layer = &config.layer;
        if !layer.statsd_enabled {
            return Ok(Self::disabled(&layer.service_name));
        }

        let agent = resolve_agent(&layer.statsd_agent_address)?;
        let socket = match agent {
            SocketAddr::V4(_) => UdpSocket::bind("0.0.0.0:0")?,
            SocketAddr::V6(_) => UdpSocket::bind("[::]:0")?,
        };
        socket.set_nonblocking(true)?;
        let sink = UdpMetricSink::from(agent, socket)?;

        let client = StatsdClient::builder(&layer.service_name, QueuingMetricSink::from(sink))
            .with_tag("application", &layer.service_name)
            .with_error_handler(|e| tracing::warn!(error = %e, "Failed to send metric"))
            .build();

        Ok(Self {
            statsd: Some(client),
            ..Self::local(&layer.service_name)
        })
    }

    /// Record into a local recorder only.
    pub fn local(namespace: &str) -> Self {
        let recorder = PrometheusBuilder::new()
            .add_global_label("application", namespace.to_string())
            .build_recorder();
        Self {
            namespace: namespace.to_string(),
            recorder: Some(recorder),
            statsd: None,
        }
    }

    /// Metrics that record nothing.
    pub fn disabled(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            recorder: None,
            statsd: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.recorder.is_some()
    }

    /// Whether samples are pushed to an agent.
    pub fn is_pushing(&self) -> bool {
        self.statsd.is_some()
    }

    /// Render the current values in Prometheus text format.
    pub fn render(&self) -> Option<String> {
        self.recorder.as_ref().map(|r| r.handle().render())
    }

    fn key(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.namespace, name)
        }
    }

    fn record(&self, f: impl FnOnce()) {
        if let Some(recorder) = &self.recorder {
            metrics::with_local_recorder(recorder, f);
        }
    }
}

fn labels(tags: &[Tag]) -> Vec<Label> {
    tags.iter()
        .map(|(key, value)| Label::new(*key, value.clone()))
        .collect()
}

impl Metrics for ServiceMetrics {
    fn incr(&self, name: &str, tags: &[Tag], value: u64) {
        if let Some(client) = &self.statsd {
            let mut sample = client.count_with_tags(name, value);
            for (key, tag) in tags {
                sample = sample.with_tag(key, tag);
            }
            sample.send();
        }
        let key = self.key(name);
        self.record(|| metrics::counter!(key, labels(tags)).increment(value));
    }

    fn timing(&self, name: &str, elapsed: Duration, tags: &[Tag]) {
        if let Some(client) = &self.statsd {
            let mut sample = client.time_with_tags(name, elapsed);
            for (key, tag) in tags {
                sample = sample.with_tag(key, tag);
            }
            sample.send();
        }
        let key = self.key(name);
        self.record(|| metrics::histogram!(key, labels(tags)).record(elapsed));
    }

    fn gauge(&self, name: &str, value: f64, tags: &[Tag]) {
        if let Some(client) = &self.statsd {
            let mut sample = client.gauge_with_tags(name, value);
            for (key, tag) in tags {
                sample = sample.with_tag(key, tag);
            }
            sample.send();
        }
        let key = self.key(name);
        self.record(|| metrics::gauge!(key, labels(tags)).set(value));
    }
}

#[async_trait]
impl Stoppable for ServiceMetrics {
    fn name(&self) -> &str {
        "metrics client"
    }

    async fn stop(&self, _deadline: Instant) -> Result<(), StopError> {
        match &self.statsd {
            Some(client) => client.flush().map_err(|e| StopError::failed(self.name(), e)),
            None => Ok(()),
        }
    }
}
