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

//! Per-bucket metric aggregation
//!
//! For every bucket the [`Aggregator`] issues one bounded aggregate query and
//! turns the resulting rows into observations. Windowed metrics cover the
//! trailing span `(bucket - interval, bucket]` and drop groups whose value
//! is null or zero. Cumulative metrics cover everything before the bucket
//! and always report, with null read as zero.

use crate::error::QueryError;
use crate::model::Observation;
use crate::sources::{DataSource, Query, Row, Table, Value};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub mod bucket;
pub mod interval;

pub use bucket::{Bucket, Buckets, TimeRange};
pub use interval::{Interval, IntervalUnit, Resolution};

/// Metric passes available to a backfill run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Jobs created in the window, per state
    Jobs,
    /// Bytes of datasets created in the window
    DataGrowth,
    /// Workflow invocations created in the window
    Workflows,
    /// Distinct users that created a job in the window
    Users,
    /// NeLS exports created in the window, per instance
    NelsExports,
    /// NeLS imports created in the window
    NelsImports,
    JobsTotal,
    DataTotal,
    WorkflowsTotal,
    NelsExportsTotal,
    NelsImportsTotal,
}

impl MetricKind {
    /// Every pass, in the order a full run executes them
    pub const ALL: [MetricKind; 11] = [
        MetricKind::Jobs,
        MetricKind::DataGrowth,
        MetricKind::Workflows,
        MetricKind::Users,
        MetricKind::NelsExports,
        MetricKind::NelsImports,
        MetricKind::JobsTotal,
        MetricKind::DataTotal,
        MetricKind::WorkflowsTotal,
        MetricKind::NelsExportsTotal,
        MetricKind::NelsImportsTotal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Jobs => "jobs",
            MetricKind::DataGrowth => "data-growth",
            MetricKind::Workflows => "workflows",
            MetricKind::Users => "users",
            MetricKind::NelsExports => "nels-exports",
            MetricKind::NelsImports => "nels-imports",
            MetricKind::JobsTotal => "jobs-total",
            MetricKind::DataTotal => "data-total",
            MetricKind::WorkflowsTotal => "workflows-total",
            MetricKind::NelsExportsTotal => "nels-exports-total",
            MetricKind::NelsImportsTotal => "nels-imports-total",
        }
    }

    /// "Total as of the bucket" rather than a trailing window
    pub fn is_cumulative(&self) -> bool {
        matches!(
            self,
            MetricKind::JobsTotal
                | MetricKind::DataTotal
                | MetricKind::WorkflowsTotal
                | MetricKind::NelsExportsTotal
                | MetricKind::NelsImportsTotal
        )
    }

    fn definition(&self) -> MetricDefinition {
        match self {
            MetricKind::Jobs | MetricKind::JobsTotal => MetricDefinition {
                table: Table::Job,
                measurement: "jobs",
                aggregate: "count(*) AS count",
                field: "count",
                group_by: Some("state"),
            },
            MetricKind::DataGrowth | MetricKind::DataTotal => MetricDefinition {
                table: Table::Dataset,
                measurement: "data_growth",
                aggregate: "sum(coalesce(total_size, file_size, 0))::bigint AS size",
                field: "size",
                group_by: None,
            },
            MetricKind::Workflows | MetricKind::WorkflowsTotal => MetricDefinition {
                table: Table::WorkflowInvocation,
                measurement: "workflows",
                aggregate: "count(*) AS count",
                field: "count",
                group_by: None,
            },
            MetricKind::Users => MetricDefinition {
                table: Table::Job,
                measurement: "galaxy-users",
                aggregate: "count(DISTINCT user_id) AS count",
                field: "count",
                group_by: None,
            },
            MetricKind::NelsExports | MetricKind::NelsExportsTotal => MetricDefinition {
                table: Table::NelsExportTracking,
                measurement: "nels-exports",
                aggregate: "count(*) AS count",
                field: "count",
                group_by: Some("instance"),
            },
            MetricKind::NelsImports | MetricKind::NelsImportsTotal => MetricDefinition {
                table: Table::NelsImportTracking,
                measurement: "nels-imports",
                aggregate: "count(*) AS count",
                field: "count",
                group_by: None,
            },
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| {
                let known: Vec<_> = MetricKind::ALL.iter().map(MetricKind::as_str).collect();
                format!("unknown metric {s}, expected one of: {}", known.join(", "))
            })
    }
}

/// Table, measurement and aggregate behind one metric kind
#[derive(Debug, Clone, Copy)]
struct MetricDefinition {
    table: Table,
    measurement: &'static str,
    aggregate: &'static str,
    field: &'static str,
    /// Column grouped on; also the tag name carrying the group value
    group_by: Option<&'static str>,
}

const CREATE_TIME: &str = "create_time AT TIME ZONE 'UTC'";

/// Tag value used when a grouping column is null
const NULL_GROUP: &str = "unknown";

/// Turns buckets into observations by querying a [`DataSource`]
#[derive(Clone)]
pub struct Aggregator {
    source: Arc<dyn DataSource>,
}

impl Aggregator {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }

    /// Query `kind` for one bucket and convert the rows.
    ///
    /// Cumulative kinds ignore `window`; they are tagged `timeframe=epoch`
    /// and carry no `size` tag.
    pub async fn aggregate(
        &self,
        bucket: Bucket,
        window: Interval,
        kind: MetricKind,
    ) -> Result<Vec<Observation>, QueryError> {
        let query = build_query(bucket, window, kind)?;
        let rows = self.source.query(&query).await?;
        observations(&rows, bucket, window, kind)
    }
}

/// The bounded query for one bucket of `kind`
pub fn build_query(
    bucket: Bucket,
    window: Interval,
    kind: MetricKind,
) -> Result<Query, QueryError> {
    let definition = kind.definition();

    let (filter, params) = if kind.is_cumulative() {
        (format!("{CREATE_TIME} < $1"), vec![bucket])
    } else {
        let window_start = window_start(bucket, window)?;
        (
            format!("{CREATE_TIME} > $1 AND {CREATE_TIME} <= $2"),
            vec![window_start, bucket],
        )
    };

    let sql = match definition.group_by {
        Some(column) => format!(
            "SELECT {column}, {aggregate} FROM {table} WHERE {filter} GROUP BY {column}",
            aggregate = definition.aggregate,
            table = definition.table,
        ),
        None => format!(
            "SELECT {aggregate} FROM {table} WHERE {filter}",
            aggregate = definition.aggregate,
            table = definition.table,
        ),
    };

    Ok(Query {
        table: definition.table,
        sql,
        params,
    })
}

fn window_start(bucket: Bucket, window: Interval) -> Result<DateTime<Utc>, QueryError> {
    window
        .before(bucket)
        .ok_or_else(|| QueryError::WindowOutOfRange {
            bucket: bucket.to_rfc3339(),
        })
}

/// Convert result rows for one bucket into observations
pub fn observations(
    rows: &[Row],
    bucket: Bucket,
    window: Interval,
    kind: MetricKind,
) -> Result<Vec<Observation>, QueryError> {
    let definition = kind.definition();
    let cumulative = kind.is_cumulative();
    let mut observations = Vec::with_capacity(rows.len());

    for row in rows {
        let value = row.get(definition.field).and_then(Value::as_i64);
        let value = match value {
            Some(value) if cumulative || value != 0 => value,
            None if cumulative => 0,
            _ => continue,
        };

        let mut builder = Observation::builder(definition.measurement);
        builder = if cumulative {
            builder.tag("timeframe", "epoch")
        } else {
            builder
                .tag("timeframe", window.unit().as_str())
                .tag("size", window.magnitude())
        };
        if let Some(column) = definition.group_by {
            let group = match row.get(column) {
                Some(value) if !value.is_null() => value.to_string(),
                _ => NULL_GROUP.to_string(),
            };
            builder = builder.tag(column, group);
        }

        let observation = builder
            .field(definition.field, value)
            .at(bucket)
            .ok_or_else(|| {
                QueryError::Other(format!(
                    "bucket {} is outside the nanosecond timestamp range",
                    bucket.to_rfc3339()
                ))
            })?;
        observations.push(observation);
    }

    Ok(observations)
}
