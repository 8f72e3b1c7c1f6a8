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

//! # Galaxy Stats
//!
//! Usage statistics for a Galaxy server, read from its PostgreSQL database
//! and emitted as line protocol.
//!
//! ## Features
//!
//! - **Historic Backfill**: walk a past time range in fixed buckets and emit
//!   one point per bucket per metric
//! - **Live Snapshot**: aggregates over the last hour, day, month or all time
//! - **Windowed and Cumulative Metrics**: jobs per state, data growth,
//!   workflow invocations, active users, NeLS imports and exports
//! - **Best-Effort Delivery**: HTTP write endpoint with a local fallback
//!
//! ## Example
//!
//! ```rust,no_run
//! use galaxy_stats::aggregation::{Aggregator, Interval, MetricKind, Resolution, TimeRange};
//! use galaxy_stats::sinks::{Dispatcher, SinkConfig};
//! use galaxy_stats::sources::PostgresSource;
//! use galaxy_stats::Backfill;
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let source = PostgresSource::connect("postgresql://galaxy@localhost/galaxy").await?;
//!     let range = TimeRange::new(
//!         "2019-04-01T00:00:00Z".parse()?,
//!         "2019-05-01T00:00:00Z".parse()?,
//!         Resolution::parse("1h")?,
//!     )?;
//!     let sink = Dispatcher::stdout(SinkConfig::local())?;
//!
//!     let mut backfill = Backfill::new(
//!         Aggregator::new(Arc::new(source)),
//!         sink,
//!         range,
//!         Interval::parse("1d")?,
//!     );
//!     let report = backfill.run(&MetricKind::ALL).await;
//!     println!("{} lines", report.lines());
//!     Ok(())
//! }
//! ```

use tracing::{debug, error, info};

pub mod aggregation;
pub mod config;
pub mod error;
pub mod model;
pub mod sinks;
pub mod snapshot;
pub mod sources;

use aggregation::{Aggregator, Interval, MetricKind, TimeRange};
use error::QueryError;
use sinks::{DeliveryStats, MetricsSink};

/// Drives every requested metric pass over one time range
pub struct Backfill<S> {
    aggregator: Aggregator,
    sink: S,
    range: TimeRange,
    interval: Interval,
}

/// Outcome of one completed metric pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub kind: MetricKind,
    pub buckets: u64,
    pub lines: u64,
}

/// A metric pass that stopped on a query error
#[derive(Debug)]
pub struct FailedPass {
    pub kind: MetricKind,
    /// Buckets fully delivered before the failure
    pub buckets: u64,
    /// Lines delivered before the failure
    pub lines: u64,
    pub error: QueryError,
}

/// Outcome of a whole run
#[derive(Debug, Default)]
pub struct RunReport {
    pub completed: Vec<PassReport>,
    pub failed: Vec<FailedPass>,
    pub delivery: DeliveryStats,
}

impl RunReport {
    /// Lines produced by every pass, including those delivered before an abort
    pub fn lines(&self) -> u64 {
        let completed: u64 = self.completed.iter().map(|pass| pass.lines).sum();
        let aborted: u64 = self.failed.iter().map(|pass| pass.lines).sum();
        completed + aborted
    }
}

impl<S: MetricsSink> Backfill<S> {
    pub fn new(aggregator: Aggregator, sink: S, range: TimeRange, interval: Interval) -> Self {
        Self {
            aggregator,
            sink,
            range,
            interval,
        }
    }

    /// Run each pass in order.
    ///
    /// A pass that hits a query error stops at that bucket; lines already
    /// delivered stay delivered and the next pass still runs.
    pub async fn run(&mut self, kinds: &[MetricKind]) -> RunReport {
        info!(
            start = %self.range.start(),
            end = %self.range.end(),
            interval = %self.interval,
            buckets = self.range.buckets().len(),
            passes = kinds.len(),
            "Starting backfill"
        );

        let mut report = RunReport::default();
        for &kind in kinds {
            match self.run_pass(kind).await {
                Ok(pass) => report.completed.push(pass),
                Err(failed) => {
                    error!(
                        metric = %failed.kind,
                        buckets = failed.buckets,
                        lines = failed.lines,
                        error = %failed.error,
                        "Metric pass aborted"
                    );
                    report.failed.push(failed);
                }
            }
        }
        report.delivery = self.sink.stats();

        info!(
            lines = report.lines(),
            failed_passes = report.failed.len(),
            delivered = report.delivery.delivered,
            fallback = report.delivery.fallback,
            failed_deliveries = report.delivery.failed,
            "Backfill finished"
        );
        report
    }

    /// Walk every bucket of the range for one metric kind
    pub async fn run_pass(&mut self, kind: MetricKind) -> Result<PassReport, FailedPass> {
        info!(metric = %kind, sink = self.sink.name(), "Starting metric pass");

        let mut buckets = 0;
        let mut lines = 0;
        for bucket in self.range.buckets() {
            let observations = match self.aggregator.aggregate(bucket, self.interval, kind).await {
                Ok(observations) => observations,
                Err(error) => {
                    self.sink.flush();
                    return Err(FailedPass {
                        kind,
                        buckets,
                        lines,
                        error,
                    });
                }
            };
            debug!(metric = %kind, %bucket, observations = observations.len(), "Aggregated bucket");

            for observation in &observations {
                self.sink.deliver(&observation.to_line()).await;
                lines += 1;
            }
            buckets += 1;
        }
        self.sink.flush();

        info!(metric = %kind, buckets, lines, "Metric pass complete");
        Ok(PassReport {
            kind,
            buckets,
            lines,
        })
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consume the run, giving back the sink
    pub fn into_sink(self) -> S {
        self.sink
    }
}
