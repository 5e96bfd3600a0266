/*
Copyright 2021 Chengyuan Ma

Permission is hereby granted, free of charge, to any person obtaining a copy of this software and
associated documentation files (the "Software"), to deal in the Software without restriction,
including without limitation the rights to use, copy, modify, merge, publish, distribute, sub-
-license, and/or sell copies of the Software, and to permit persons to whom the Software is
furnished to do so, subject to the following conditions:

The above copyright notice and this permission notice shall be included in all copies or substantial
portions of the Software.

THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT
NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NON-
-INFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES
OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.
*/

//! Compares KCP modes on a simulated lossy network with the echo benchmark.

use anyhow::{Context, Result};
use clap::Parser;
use ekcp::config::{load_config_from_file, Config, Mode};
use ekcp::sim::run_echo;
use ekcp::KcpConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "ekcp-sim", about = "Echo benchmark of KCP modes over a simulated lossy network")]
struct Args {
    /// JSON config file. Its network settings are always used; its KCP settings are benchmarked
    /// when no mode is given.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Modes to compare (default, normal, fast, redundancy); all of them if neither this nor a
    /// config file is given.
    #[arg(long, value_delimiter = ',')]
    modes: Vec<Mode>,

    /// Number of echoes per run.
    #[arg(long, default_value_t = 1000)]
    messages: u32,

    /// Overrides the loss rate (percent).
    #[arg(long)]
    lost_rate: Option<u32>,

    /// Overrides the random seed of the network.
    #[arg(long)]
    seed: Option<u64>,

    /// Prints each report as a JSON line.
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config_from_file(path)?,
        None => Config::default(),
    };
    let mut sim = config.sim.clone();
    if let Some(lost_rate) = args.lost_rate {
        sim.lost_rate = lost_rate;
    }
    if let Some(seed) = args.seed {
        sim.seed = seed;
    }

    let runs: Vec<(String, KcpConfig)> = if !args.modes.is_empty() {
        args.modes
            .iter()
            .map(|&mode| (mode.to_string(), KcpConfig::for_mode(mode)))
            .collect()
    } else if args.config.is_some() {
        vec![("custom".to_owned(), config.kcp.clone())]
    } else {
        Mode::ALL
            .iter()
            .map(|&mode| (mode.to_string(), KcpConfig::for_mode(mode)))
            .collect()
    };

    info!(
        lost_rate = sim.lost_rate,
        rtt_min = sim.rtt_min,
        rtt_max = sim.rtt_max,
        seed = sim.seed,
        "simulated network"
    );
    for (name, kcp) in runs {
        let report = run_echo(&kcp, &sim, args.messages)
            .with_context(|| format!("{} mode failed", name))?;
        if args.json {
            println!("{}", serde_json::to_string(&report)?);
        }
        info!(
            mode = %name,
            elapsed = report.elapsed,
            avg_rtt = report.avg_rtt,
            max_rtt = report.max_rtt,
            tx = report.net.transmitted,
            fast_resends = report.stats.fast_resends,
            timeout_resends = report.stats.timeout_resends,
            redundant_sends = report.stats.redundant_sends,
            "{} mode result",
            name
        );
    }
    Ok(())
}
