/*
 * Copyright 2024 ArpNetworking
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use galaxy_stats::aggregation::bucket::parse_timestamp;
use galaxy_stats::aggregation::{Aggregator, Interval, MetricKind, Resolution, TimeRange};
use galaxy_stats::config::{SinkOverrides, StatsConfig};
use galaxy_stats::sinks::Dispatcher;
use galaxy_stats::sources::PostgresSource;
use galaxy_stats::Backfill;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Backfill Galaxy usage statistics over a past time range.
#[derive(Parser)]
#[command(name = "galaxy-stats-historic", about)]
struct Cli {
    /// Configuration file (JSON, or YAML such as galaxy.yml)
    #[arg(short, long)]
    config: PathBuf,

    /// Start of the range, UTC (e.g. 2019-04-01 or 2019-04-01T00:00:00Z)
    #[arg(short, long, value_parser = parse_timestamp)]
    start: DateTime<Utc>,

    /// End of the range, UTC, exclusive
    #[arg(short, long, value_parser = parse_timestamp)]
    end: DateTime<Utc>,

    /// Reporting window per point: <n>h, <n>d or <n>M
    #[arg(short, long)]
    interval: Interval,

    /// Spacing between points: <n>s, <n>m, <n>h, <n>d or <n>w
    #[arg(short, long, default_value = "5m")]
    resolution: Resolution,

    /// Base URL of the line protocol write endpoint; stdout when absent
    #[arg(short = 'U', long)]
    url: Option<String>,

    /// Target database on the write endpoint
    #[arg(short, long)]
    database: Option<String>,

    /// User for basic authentication
    #[arg(short, long)]
    user: Option<String>,

    /// Password for basic authentication
    #[arg(short, long)]
    password: Option<String>,

    /// Comma separated metric passes to run; all of them when omitted
    #[arg(long, value_delimiter = ',')]
    metrics: Vec<MetricKind>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            process::exit(code);
        }
    };

    let range = match TimeRange::new(cli.start, cli.end, cli.resolution) {
        Ok(range) => range,
        Err(err) => {
            eprintln!("error: {err}");
            process::exit(1);
        }
    };

    // Logs go to stderr, stdout carries line protocol.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = StatsConfig::from_file(&cli.config)?;
    info!("Configuration loaded from {}", cli.config.display());

    let sink_config = config.sink_config(SinkOverrides {
        url: cli.url,
        database: cli.database,
        user: cli.user,
        password: cli.password,
    });
    let sink = Dispatcher::stdout(sink_config).context("Failed to create metrics sink")?;

    let source = PostgresSource::connect(&config.database_url()?)
        .await
        .context("Failed to connect to database")?;

    let metrics = if cli.metrics.is_empty() {
        MetricKind::ALL.to_vec()
    } else {
        cli.metrics
    };

    let mut backfill = Backfill::new(Aggregator::new(Arc::new(source)), sink, range, cli.interval);
    // Aborted passes and failed deliveries are logged, not fatal.
    backfill.run(&metrics).await;

    Ok(())
}
