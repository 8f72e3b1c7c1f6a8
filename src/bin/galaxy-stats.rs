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

//! Live Galaxy statistics for a Telegraf `inputs.exec` poller.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use galaxy_stats::aggregation::{Interval, IntervalUnit};
use galaxy_stats::config::StatsConfig;
use galaxy_stats::sinks::{Dispatcher, MetricsSink, SinkConfig};
use galaxy_stats::snapshot::{self, Report, UserPeriod};
use galaxy_stats::sources::PostgresSource;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Galaxy usage statistics as line protocol.
#[derive(Parser)]
#[command(name = "galaxy-stats", about)]
struct Cli {
    /// Configuration file (JSON, or YAML such as galaxy.yml)
    #[arg(short, long, default_value = "galaxy.json")]
    config: PathBuf,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print current statistics
    Stats {
        #[command(subcommand)]
        report: Option<StatsReport>,
    },
    /// Print a Telegraf inputs.exec entry that polls `stats`
    TickConfig,
}

#[derive(Subcommand)]
enum StatsReport {
    /// Active users per month
    Users {
        #[command(subcommand)]
        period: Option<UsersPeriod>,
    },
    /// Jobs per state
    Jobs {
        window: Option<Window>,
        /// Number of window units
        #[arg(default_value_t = 1)]
        count: u32,
    },
    /// Queued and running jobs per tool
    Queue,
    /// Data uploaded, in gigabytes
    Data {
        #[arg(default_value = "hour")]
        window: UploadWindow,
        /// Number of window units
        #[arg(default_value_t = 1)]
        count: u32,
    },
    /// Dataset growth in bytes
    Growth {
        window: Option<Window>,
        /// Number of window units
        #[arg(default_value_t = 1)]
        count: u32,
    },
}

#[derive(Subcommand)]
enum UsersPeriod {
    /// A whole calendar year
    Year { year: i32 },
    /// One month, as YYYY-MM
    Month {
        #[arg(value_parser = parse_month)]
        month: UserPeriod,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Window {
    Total,
    Hour,
    Day,
    Month,
}

#[derive(Clone, Copy, ValueEnum)]
enum UploadWindow {
    Hour,
    Day,
    Month,
}

impl UploadWindow {
    fn unit(self) -> IntervalUnit {
        match self {
            UploadWindow::Hour => IntervalUnit::Hour,
            UploadWindow::Day => IntervalUnit::Day,
            UploadWindow::Month => IntervalUnit::Month,
        }
    }
}

fn parse_month(input: &str) -> Result<UserPeriod, String> {
    UserPeriod::parse_month(input).ok_or_else(|| format!("{input} is not a YYYY-MM month"))
}

fn interval(unit: IntervalUnit, count: u32) -> Result<Interval> {
    Interval::new(count, unit).context("window count must be at least 1")
}

/// `None` for a window of all time
fn window(window: Window, count: u32) -> Result<Option<Interval>> {
    match window {
        Window::Total => Ok(None),
        Window::Hour => interval(IntervalUnit::Hour, count).map(Some),
        Window::Day => interval(IntervalUnit::Day, count).map(Some),
        Window::Month => interval(IntervalUnit::Month, count).map(Some),
    }
}

fn reports(report: Option<StatsReport>) -> Result<Vec<Report>> {
    let reports = match report {
        None => snapshot::default_reports(),
        Some(StatsReport::Users { period }) => vec![Report::Users(match period {
            None => UserPeriod::CurrentMonth,
            Some(UsersPeriod::Year { year }) => UserPeriod::Year(year),
            Some(UsersPeriod::Month { month }) => month,
        })],
        Some(StatsReport::Jobs { window: None, .. }) => snapshot::default_job_reports(),
        Some(StatsReport::Jobs {
            window: Some(w),
            count,
        }) => vec![Report::Jobs(window(w, count)?)],
        Some(StatsReport::Queue) => vec![Report::Queue],
        Some(StatsReport::Data { window, count }) => {
            vec![Report::Upload(interval(window.unit(), count)?)]
        }
        Some(StatsReport::Growth { window: None, .. }) => snapshot::default_growth_reports(),
        Some(StatsReport::Growth {
            window: Some(w),
            count,
        }) => vec![Report::Growth(window(w, count)?)],
    };
    Ok(reports)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let report = match cli.command {
        Command::TickConfig => {
            let executable = std::env::current_exe().context("Failed to locate executable")?;
            let config = std::path::absolute(&cli.config)
                .with_context(|| format!("Failed to resolve {}", cli.config.display()))?;
            print!("{}", snapshot::tick_config(&executable, &config));
            return Ok(());
        }
        Command::Stats { report } => report,
    };
    let reports = reports(report)?;

    let config = StatsConfig::from_file(&cli.config)?;
    let source = PostgresSource::connect(&config.database_url()?)
        .await
        .context("Failed to connect to database")?;
    let mut sink = Dispatcher::stdout(SinkConfig::local())?;

    let now = Utc::now();
    for report in reports {
        match snapshot::collect(&source, report, now).await {
            Ok(observations) => {
                for observation in &observations {
                    sink.deliver(&observation.to_line()).await;
                }
            }
            Err(err) => warn!(?report, error = %err, "Report failed"),
        }
    }
    sink.flush();

    Ok(())
}
