use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;

use crate::loader::ExpirePolicy;
use crate::single_flight::{DEFAULT_SHARDS, NoSingleFlight, ShardedSingleFlight, SingleFlight};
use crate::store::{MemoryStore, NoStore, Store};

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "readthru".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Controls the coalescing of concurrent loads.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct SingleFlightConfig {
    /// When disabled, every miss runs its own load.
    pub enabled: bool,
    /// The number of shards of the in-flight registry. Must be a power of two.
    pub shards: usize,
}

impl Default for SingleFlightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shards: DEFAULT_SHARDS,
        }
    }
}

impl SingleFlightConfig {
    pub fn build(&self) -> Arc<dyn SingleFlight> {
        if self.enabled {
            Arc::new(ShardedSingleFlight::new(self.shards))
        } else {
            Arc::new(NoSingleFlight)
        }
    }
}

/// Selects the backing store.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// A process-local store, see [`MemoryStore`].
    Memory {
        /// The maximum number of items per bucket.
        #[serde(default = "default_capacity")]
        capacity: u64,
    },
    /// No store at all, see [`NoStore`].
    None,
}

fn default_capacity() -> u64 {
    crate::store::DEFAULT_CAPACITY
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory {
            capacity: default_capacity(),
        }
    }
}

impl StoreConfig {
    pub fn build(&self) -> Arc<dyn Store> {
        match *self {
            Self::Memory { capacity } => Arc::new(MemoryStore::new(capacity)),
            Self::None => Arc::new(NoStore),
        }
    }
}

/// Configuration of a [`Cache`](crate::Cache).
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// The expiration of items whose loader does not define its own.
    pub default_expire: ExpirePolicy,
    /// Whether a failing store is reported to the caller right away.
    ///
    /// When disabled, the failure is logged and the item is loaded as if it was a miss.
    pub direct_return_on_store_fault: bool,
    /// Whether registering a second loader for the same bucket replaces the first one.
    ///
    /// When disabled, doing so panics.
    pub replace_existing_loaders: bool,
    pub single_flight: SingleFlightConfig,
    pub store: StoreConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_expire: ExpirePolicy::Default,
            direct_return_on_store_fault: true,
            replace_existing_loaders: false,
            single_flight: SingleFlightConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: Logging,
    pub metrics: Metrics,
    pub cache: CacheConfig,
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    pub fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
