//! Reporting of cache metrics to statsd.
//!
//! Metrics are emitted with the [`metric!`](crate::metric) macro. Until [`configure_statsd`] is
//! called, emitting a metric does nothing.
use std::collections::BTreeMap;
use std::net::ToSocketAddrs;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use cadence::prelude::*;
use cadence::{Metric, MetricBuilder, MetricSink, StatsdClient, UdpMetricSink};

static METRICS_CLIENT: OnceLock<MetricsClient> = OnceLock::new();

/// A statsd client that adds a fixed set of tags to every metric.
#[derive(Debug)]
pub struct MetricsClient {
    statsd: StatsdClient,
    tags: BTreeMap<String, String>,
}

impl MetricsClient {
    fn new<S>(prefix: &str, sink: S, tags: BTreeMap<String, String>) -> Self
    where
        S: MetricSink + Sync + Send + std::panic::RefUnwindSafe + 'static,
    {
        Self {
            statsd: StatsdClient::from_sink(prefix, sink),
            tags,
        }
    }

    /// Increments the counter `name` by `value`.
    pub fn count<'a>(&'a self, name: &'a str, value: i64, tags: &[(&'a str, &'a str)]) {
        self.send(self.statsd.count_with_tags(name, value), tags);
    }

    /// Records `value` in the histogram `name`.
    pub fn histogram<'a>(&'a self, name: &'a str, value: u64, tags: &[(&'a str, &'a str)]) {
        self.send(self.statsd.histogram_with_tags(name, value), tags);
    }

    fn send<'a, T>(&'a self, mut metric: MetricBuilder<'a, 'a, T>, tags: &[(&'a str, &'a str)])
    where
        T: Metric + From<String>,
    {
        for &(tag, value) in tags {
            metric = metric.with_tag(tag, value);
        }
        for (tag, value) in &self.tags {
            metric = metric.with_tag(tag, value);
        }
        metric.send()
    }
}

/// Tell the metrics system to report to statsd.
///
/// Can only be called once per process.
pub fn configure_statsd<A: ToSocketAddrs>(
    prefix: &str,
    host: A,
    tags: BTreeMap<String, String>,
) -> Result<()> {
    let addrs: Vec<_> = host
        .to_socket_addrs()
        .context("failed to resolve statsd host")?
        .collect();
    if let Some(addr) = addrs.first() {
        tracing::info!("Reporting metrics to statsd at {}", addr);
    }
    let socket =
        std::net::UdpSocket::bind("0.0.0.0:0").context("failed to bind statsd socket")?;
    socket.set_nonblocking(true)?;
    let sink =
        UdpMetricSink::from(&addrs[..], socket).context("failed to create statsd sink")?;

    METRICS_CLIENT
        .set(MetricsClient::new(prefix, sink, tags))
        .map_err(|_| anyhow::anyhow!("metrics are already configured"))
}

/// Invokes `f` with the configured client, if there is one.
#[inline(always)]
pub fn with_client(f: impl FnOnce(&MetricsClient)) {
    if let Some(client) = METRICS_CLIENT.get() {
        f(client);
    }
}

/// Emits a metric, tagged with the given `key => value` pairs.
///
/// ```ignore
/// metric!(counter("cache.hit") += 1, "bucket" => bucket);
/// metric!(histogram("cache.batch.duplicates") = 3);
/// ```
#[macro_export]
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metrics::with_client(|client| client.count($id, $value, &[$(($k, $v)),*]))
    };

    (histogram($id:expr) = $value:expr $(, $k:expr => $v:expr)* $(,)?) => {
        $crate::metrics::with_client(|client| client.histogram($id, $value, &[$(($k, $v)),*]))
    };
}
