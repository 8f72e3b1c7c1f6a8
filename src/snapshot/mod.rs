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

//! Live snapshot reports
//!
//! Aggregates over fixed recent windows, stamped with the current time. These
//! are meant to be polled by a Telegraf `inputs.exec` plugin, see
//! [`tick_config`].

use crate::aggregation::{Interval, IntervalUnit};
use crate::error::QueryError;
use crate::model::Observation;
use crate::sources::{DataSource, Query, Row, Table, Value};
use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use std::path::Path;

/// One live report. `None` windows mean "all time".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    /// Jobs updated in the window, per state, plus a `state=total` line
    Jobs(Option<Interval>),
    /// Bytes of datasets updated in the window
    Growth(Option<Interval>),
    /// Distinct job-submitting users per calendar month
    Users(UserPeriod),
    /// Queued and running jobs per tool
    Queue,
    /// Gigabytes produced by upload jobs created in the window
    Upload(Interval),
}

/// Calendar span covered by the users report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserPeriod {
    CurrentMonth,
    Year(i32),
    /// First day of the month
    Month(NaiveDate),
}

impl UserPeriod {
    /// Parse `YYYY-MM` into a month period
    pub fn parse_month(input: &str) -> Option<Self> {
        NaiveDate::parse_from_str(&format!("{input}-01"), "%Y-%m-%d")
            .ok()
            .map(UserPeriod::Month)
    }

    /// Half-open `[from, to)` span in UTC
    fn bounds(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let (from, months) = match *self {
            UserPeriod::CurrentMonth => (NaiveDate::from_ymd_opt(now.year(), now.month(), 1)?, 1),
            UserPeriod::Year(year) => (NaiveDate::from_ymd_opt(year, 1, 1)?, 12),
            UserPeriod::Month(first) => (first.with_day(1)?, 1),
        };
        let to = from.checked_add_months(Months::new(months))?;
        Some((
            from.and_hms_opt(0, 0, 0)?.and_utc(),
            to.and_hms_opt(0, 0, 0)?.and_utc(),
        ))
    }
}

/// Reports run by `stats jobs` without arguments
pub fn default_job_reports() -> Vec<Report> {
    vec![
        Report::Jobs(None),
        Report::Jobs(Interval::new(1, IntervalUnit::Day)),
        Report::Jobs(Interval::new(1, IntervalUnit::Hour)),
        Report::Jobs(Interval::new(1, IntervalUnit::Month)),
    ]
}

/// Reports run by `stats growth` without arguments
pub fn default_growth_reports() -> Vec<Report> {
    vec![
        Report::Growth(None),
        Report::Growth(Interval::new(1, IntervalUnit::Month)),
        Report::Growth(Interval::new(1, IntervalUnit::Day)),
        Report::Growth(Interval::new(1, IntervalUnit::Hour)),
    ]
}

/// Reports run by a bare `stats`
pub fn default_reports() -> Vec<Report> {
    let mut reports = vec![Report::Users(UserPeriod::CurrentMonth)];
    reports.extend(default_job_reports());
    reports.push(Report::Queue);
    reports.extend(default_growth_reports());
    reports
}

impl Report {
    /// The query behind this report, evaluated against `now`
    pub fn query(&self, now: DateTime<Utc>) -> Result<Query, QueryError> {
        let query = match *self {
            Report::Jobs(window) => {
                let (filter, params) = updated_since(window, now)?;
                Query {
                    table: Table::Job,
                    sql: format!("SELECT state, count(*) AS count FROM job{filter} GROUP BY state"),
                    params,
                }
            }
            Report::Growth(window) => {
                let (filter, params) = updated_since(window, now)?;
                Query {
                    table: Table::Dataset,
                    sql: format!(
                        "SELECT sum(coalesce(total_size, file_size, 0))::bigint AS size \
                         FROM dataset{filter}"
                    ),
                    params,
                }
            }
            Report::Users(period) => {
                let (from, to) = period.bounds(now).ok_or_else(|| {
                    QueryError::Other(format!("user period {period:?} is out of range"))
                })?;
                Query {
                    table: Table::Job,
                    sql: "SELECT date_trunc('month', create_time)::date AS month, \
                          count(DISTINCT user_id) AS count FROM job \
                          WHERE create_time AT TIME ZONE 'UTC' >= $1 \
                          AND create_time AT TIME ZONE 'UTC' < $2 \
                          GROUP BY month ORDER BY month DESC"
                        .to_string(),
                    params: vec![from, to],
                }
            }
            Report::Queue => Query {
                table: Table::Job,
                sql: "SELECT tool_id, state, count(*) AS count FROM job \
                      WHERE state IN ('queued', 'running') \
                      GROUP BY tool_id, state ORDER BY count DESC"
                    .to_string(),
                params: Vec::new(),
            },
            Report::Upload(window) => Query {
                table: Table::Job,
                sql: "SELECT coalesce(sum(dataset.total_size), 0)::bigint AS size FROM job \
                      LEFT JOIN job_to_output_dataset ON job.id = job_to_output_dataset.job_id \
                      LEFT JOIN history_dataset_association \
                      ON job_to_output_dataset.dataset_id = history_dataset_association.id \
                      LEFT JOIN dataset ON history_dataset_association.dataset_id = dataset.id \
                      WHERE job.tool_id = 'upload1' \
                      AND job.create_time AT TIME ZONE 'UTC' > $1"
                    .to_string(),
                params: vec![window_start(window, now)?],
            },
        };
        Ok(query)
    }

    /// Turn the report's rows into observations stamped `now`
    pub fn observations(&self, rows: &[Row], now: DateTime<Utc>) -> Vec<Observation> {
        let mut observations = Vec::new();
        let mut push = |observation: Option<Observation>| observations.extend(observation);

        match *self {
            Report::Jobs(window) => {
                let mut total = 0;
                for row in rows {
                    let count = int(row, "count");
                    total += count;
                    push(
                        timeframe(Observation::builder("jobs"), window)
                            .tag("state", text(row, "state"))
                            .field("count", count)
                            .at(now),
                    );
                }
                if total > 0 {
                    push(
                        timeframe(Observation::builder("jobs"), window)
                            .tag("state", "total")
                            .field("count", total)
                            .at(now),
                    );
                }
            }
            Report::Growth(window) => {
                for row in rows {
                    push(
                        timeframe(Observation::builder("data_growth"), window)
                            .field("size", int(row, "size"))
                            .at(now),
                    );
                }
            }
            Report::Users(_) => {
                for row in rows {
                    push(
                        Observation::builder("active-users")
                            .tag("timeframe", "month")
                            .tag("size", 1)
                            .tag("date", text(row, "month"))
                            .field("count", int(row, "count"))
                            .at(now),
                    );
                }
            }
            Report::Queue => {
                for row in rows {
                    push(
                        Observation::builder("queue")
                            .tag("tool_id", short_tool_id(&text(row, "tool_id")))
                            .tag("state", text(row, "state"))
                            .field("count", int(row, "count"))
                            .at(now),
                    );
                }
            }
            Report::Upload(window) => {
                let bytes = rows.first().map_or(0, |row| int(row, "size"));
                push(
                    Observation::builder("data-upload")
                        .tag("timeframe", window.unit().as_str())
                        .tag("size", window.magnitude())
                        .tag("format", "GB")
                        .field("count", bytes as f64 / 1e9)
                        .at(now),
                );
            }
        }

        observations
    }
}

/// Run one report against `source`
pub async fn collect(
    source: &dyn DataSource,
    report: Report,
    now: DateTime<Utc>,
) -> Result<Vec<Observation>, QueryError> {
    let rows = source.query(&report.query(now)?).await?;
    Ok(report.observations(&rows, now))
}

/// The Telegraf `inputs.exec` block that polls `stats` every minute
pub fn tick_config(executable: &Path, config: &Path) -> String {
    let command = format!("{} -c {}", executable.display(), config.display());
    format!(
        "[[inputs.exec]]\n   \
         commands = ['{command} stats']\n   \
         timeout='10s'\n   \
         data_format = 'influx'\n   \
         interval = '1m'\n   \
         name_prefix='galaxy_'\n"
    )
}

fn updated_since(
    window: Option<Interval>,
    now: DateTime<Utc>,
) -> Result<(String, Vec<DateTime<Utc>>), QueryError> {
    match window {
        None => Ok((String::new(), Vec::new())),
        Some(window) => Ok((
            " WHERE update_time AT TIME ZONE 'UTC' > $1".to_string(),
            vec![window_start(window, now)?],
        )),
    }
}

fn window_start(window: Interval, now: DateTime<Utc>) -> Result<DateTime<Utc>, QueryError> {
    window
        .before(now)
        .ok_or_else(|| QueryError::WindowOutOfRange {
            bucket: now.to_rfc3339(),
        })
}

fn timeframe(
    builder: crate::model::ObservationBuilder,
    window: Option<Interval>,
) -> crate::model::ObservationBuilder {
    match window {
        None => builder.tag("timeframe", "epoch"),
        Some(window) => builder
            .tag("timeframe", window.unit().as_str())
            .tag("size", window.magnitude()),
    }
}

fn int(row: &Row, column: &str) -> i64 {
    row.get(column).and_then(Value::as_i64).unwrap_or(0)
}

fn text(row: &Row, column: &str) -> String {
    match row.get(column) {
        Some(value) if !value.is_null() => value.to_string(),
        _ => "unknown".to_string(),
    }
}

/// Tool shed ids lose everything up to and including `repos/`
fn short_tool_id(tool_id: &str) -> &str {
    tool_id
        .rfind("repos/")
        .map_or(tool_id, |idx| &tool_id[idx + "repos/".len()..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 4, 3, 12, 0, 0).unwrap()
    }

    fn lines(observations: &[Observation]) -> Vec<String> {
        observations
            .iter()
            .map(|o| o.to_line().into_string())
            .collect()
    }

    #[test]
    fn test_jobs_report_adds_total() {
        let ts = now().timestamp_nanos_opt().unwrap();
        let rows = vec![
            row(&[("state", "ok".into()), ("count", Value::Integer(3))]),
            row(&[("state", "error".into()), ("count", Value::Integer(1))]),
        ];

        let report = Report::Jobs(Interval::new(1, IntervalUnit::Day));
        assert_eq!(
            lines(&report.observations(&rows, now())),
            vec![
                format!("jobs,timeframe=day,size=1,state=ok count=3 {ts}"),
                format!("jobs,timeframe=day,size=1,state=error count=1 {ts}"),
                format!("jobs,timeframe=day,size=1,state=total count=4 {ts}"),
            ]
        );
    }

    #[test]
    fn test_jobs_report_without_rows_has_no_total() {
        assert!(Report::Jobs(None).observations(&[], now()).is_empty());
    }

    #[test]
    fn test_jobs_query_windows() {
        let total = Report::Jobs(None).query(now()).unwrap();
        assert_eq!(total.sql, "SELECT state, count(*) AS count FROM job GROUP BY state");
        assert!(total.params.is_empty());

        let month = Report::Jobs(Interval::new(1, IntervalUnit::Month))
            .query(now())
            .unwrap();
        assert!(month.sql.contains("WHERE update_time AT TIME ZONE 'UTC' > $1"));
        assert_eq!(
            month.params,
            vec![Utc.with_ymd_and_hms(2019, 3, 3, 12, 0, 0).unwrap()]
        );
    }

    #[test]
    fn test_month_window_is_tagged_month() {
        let rows = vec![row(&[("size", Value::Integer(1024))])];
        let report = Report::Growth(Interval::new(1, IntervalUnit::Month));
        let observations = report.observations(&rows, now());
        assert_eq!(observations[0].tag("timeframe"), Some("month"));
        assert_eq!(observations[0].tag("size"), Some("1"));
    }

    #[test]
    fn test_growth_total_reports_null_as_zero() {
        let rows = vec![row(&[("size", Value::Null)])];
        let observations = Report::Growth(None).observations(&rows, now());
        let ts = now().timestamp_nanos_opt().unwrap();
        assert_eq!(lines(&observations), vec![format!("data_growth,timeframe=epoch size=0 {ts}")]);
    }

    #[test]
    fn test_users_period_bounds() {
        let query = Report::Users(UserPeriod::CurrentMonth).query(now()).unwrap();
        assert_eq!(
            query.params,
            vec![
                Utc.with_ymd_and_hms(2019, 4, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2019, 5, 1, 0, 0, 0).unwrap(),
            ]
        );

        let year = Report::Users(UserPeriod::Year(2018)).query(now()).unwrap();
        assert_eq!(
            year.params,
            vec![
                Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap(),
            ]
        );

        assert_eq!(
            UserPeriod::parse_month("2018-12"),
            Some(UserPeriod::Month(NaiveDate::from_ymd_opt(2018, 12, 1).unwrap()))
        );
        assert_eq!(UserPeriod::parse_month("2018-13"), None);
    }

    #[test]
    fn test_users_line() {
        let rows = vec![row(&[("month", "2019-04-01".into()), ("count", Value::Integer(42))])];
        let observations = Report::Users(UserPeriod::CurrentMonth).observations(&rows, now());
        let ts = now().timestamp_nanos_opt().unwrap();
        assert_eq!(
            lines(&observations),
            vec![format!("active-users,timeframe=month,size=1,date=2019-04-01 count=42 {ts}")]
        );
    }

    #[test]
    fn test_queue_strips_tool_shed_prefix() {
        let rows = vec![row(&[
            (
                "tool_id",
                "toolshed.g2.bx.psu.edu/repos/iuc/bwa/bwa_mem/0.7.17".into(),
            ),
            ("state", "queued".into()),
            ("count", Value::Integer(7)),
        ])];
        let observations = Report::Queue.observations(&rows, now());
        assert_eq!(observations[0].tag("tool_id"), Some("iuc/bwa/bwa_mem/0.7.17"));
        assert_eq!(short_tool_id("upload1"), "upload1");
    }

    #[test]
    fn test_upload_reports_gigabytes() {
        let rows = vec![row(&[("size", Value::Integer(2_500_000_000))])];
        let report = Report::Upload(Interval::new(1, IntervalUnit::Day).unwrap());
        let ts = now().timestamp_nanos_opt().unwrap();
        assert_eq!(
            lines(&report.observations(&rows, now())),
            vec![format!("data-upload,timeframe=day,size=1,format=GB count=2.5 {ts}")]
        );
    }

    #[test]
    fn test_default_reports_order() {
        let reports = default_reports();
        assert_eq!(reports.len(), 10);
        assert_eq!(reports[0], Report::Users(UserPeriod::CurrentMonth));
        assert_eq!(reports[5], Report::Queue);
    }

    #[test]
    fn test_tick_config() {
        let entry = tick_config(Path::new("/usr/bin/galaxy-stats"), Path::new("/etc/galaxy.yml"));
        assert!(entry.starts_with("[[inputs.exec]]\n"));
        assert!(entry.contains("commands = ['/usr/bin/galaxy-stats -c /etc/galaxy.yml stats']"));
        assert!(entry.contains("data_format = 'influx'"));
        assert!(entry.contains("name_prefix='galaxy_'"));
    }
}
