use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use readthru::config::Config;

mod logging;
mod stresstest;
mod workloads;

use stresstest::perform_stresstest;
use workloads::WorkloadsConfig;

/// Command line interface parser.
#[derive(Parser)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Enable JSON logging into a sink, to measure its overhead.
    #[arg(long)]
    tracing: bool,

    /// Enable reporting metrics to a local UDP sink, to measure their overhead.
    #[arg(long)]
    metrics: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let workloads_file =
        std::fs::File::open(&cli.workloads).context("failed to open workloads file")?;
    let workloads: WorkloadsConfig =
        serde_yaml::from_reader(workloads_file).context("failed to parse workloads YAML")?;

    let config = Config::get(cli.config.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    let logging = logging::Config {
        tracing: cli.tracing,
        metrics: cli.metrics,
        logging: config.logging,
        metrics_config: config.metrics,
    };

    runtime.block_on(async {
        let mut guard = logging::init(logging)?;
        if let Some(udp_sink) = guard.udp_sink.take() {
            tokio::spawn(udp_sink);
        }

        perform_stresstest(config.cache, workloads, cli.duration).await
    })
}
