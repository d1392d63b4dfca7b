use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;
use std::net::{SocketAddr, UdpSocket};
use std::pin::Pin;

use anyhow::{Context, Result};

use readthru::config::{Logging, Metrics};
use readthru::logging::{init_json_logging, init_logging};
use readthru::metrics;

#[derive(Debug, Default)]
pub struct Config {
    /// Log JSON into a sink instead of following `logging`.
    pub tracing: bool,
    /// Report metrics to a local sink instead of following `metrics`.
    pub metrics: bool,
    pub logging: Logging,
    pub metrics_config: Metrics,
}

/// Where metrics are reported to.
#[derive(Debug, PartialEq)]
enum MetricsTarget {
    /// A local UDP socket that drops everything.
    Sink,
    /// The statsd server from the configuration file.
    Statsd {
        host: String,
        prefix: String,
        tags: BTreeMap<String, String>,
    },
    None,
}

fn metrics_target(config: &Config) -> MetricsTarget {
    if config.metrics {
        return MetricsTarget::Sink;
    }
    match config.metrics_config.statsd {
        Some(ref host) => MetricsTarget::Statsd {
            host: host.clone(),
            prefix: config.metrics_config.prefix.clone(),
            tags: config.metrics_config.custom_tags.clone(),
        },
        None => MetricsTarget::None,
    }
}

#[derive(Default)]
pub struct Guard {
    pub udp_sink: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
}

pub fn init(config: Config) -> Result<Guard> {
    let mut guard = Guard::default();

    if config.tracing {
        // we want all the tracing machinery to be active, but not spam the console,
        // so redirect everything into the void:
        init_json_logging("INFO,readthru=DEBUG", || NoopWriter)?;
    } else {
        init_logging(&config.logging)?;
    }

    match metrics_target(&config) {
        MetricsTarget::Sink => configure_sink(&mut guard)?,
        MetricsTarget::Statsd { host, prefix, tags } => {
            metrics::configure_statsd(&prefix, host, tags)?
        }
        MetricsTarget::None => {}
    }

    Ok(guard)
}

fn configure_sink(guard: &mut Guard) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let listener = UdpSocket::bind(addr).context("failed to bind the metrics sink")?;
    listener.set_nonblocking(true)?;
    let socket = listener.local_addr()?;

    guard.udp_sink = Some(Box::pin(async move {
        let Ok(listener) = tokio::net::UdpSocket::from_std(listener) else {
            return;
        };
        let mut buf = Vec::with_capacity(1024);
        loop {
            buf.clear();
            if listener.recv_buf(&mut buf).await.is_err() {
                break;
            }
        }
    }));

    let host = format!("127.0.0.1:{}", socket.port());

    // have some default tags, just to be closer to the real world config
    let mut tags = BTreeMap::new();
    tags.insert("host".into(), "stresstest".into());
    tags.insert("env".into(), "stresstest".into());

    metrics::configure_statsd("readthru", host, tags)?;

    Ok(())
}

struct NoopWriter;
impl Write for NoopWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        // try to prevent the compiler from optimizing away all the formatting code:
        let buf = std::hint::black_box(buf);

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_target() {
        let mut config = Config::default();
        config.metrics_config.statsd = None;
        assert_eq!(metrics_target(&config), MetricsTarget::None);

        config.metrics_config = Metrics {
            statsd: Some("127.0.0.1:8125".into()),
            prefix: "stress".into(),
            custom_tags: BTreeMap::from([("region".into(), "eu".into())]),
        };
        assert_eq!(
            metrics_target(&config),
            MetricsTarget::Statsd {
                host: "127.0.0.1:8125".into(),
                prefix: "stress".into(),
                tags: BTreeMap::from([("region".into(), "eu".into())]),
            }
        );

        // The local sink wins over the configured server.
        config.metrics = true;
        assert_eq!(metrics_target(&config), MetricsTarget::Sink);
    }
}
