use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use galaxy_stats::aggregation::{Aggregator, Interval, MetricKind, Resolution, TimeRange};
use galaxy_stats::error::QueryError;
use galaxy_stats::model::MetricLine;
use galaxy_stats::sinks::{DeliveryStats, Dispatcher, MetricsSink, SinkConfig};
use galaxy_stats::sources::{DataSource, Query, Row, Table, Value};
use galaxy_stats::Backfill;
use std::sync::{Arc, Mutex};

type Responder = dyn Fn(&Query) -> Result<Vec<Row>, QueryError> + Send + Sync;

/// Data source answering from a closure and recording every query
struct ScriptedSource {
    respond: Box<Responder>,
    queries: Mutex<Vec<Query>>,
}

impl ScriptedSource {
    fn new(
        respond: impl Fn(&Query) -> Result<Vec<Row>, QueryError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            queries: Mutex::new(Vec::new()),
        })
    }

    fn queries(&self) -> Vec<Query> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn query(&self, query: &Query) -> Result<Vec<Row>, QueryError> {
        self.queries.lock().unwrap().push(query.clone());
        (self.respond)(query)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Sink that keeps every line in memory
#[derive(Default)]
struct CapturingSink {
    lines: Vec<String>,
    flushes: usize,
}

#[async_trait]
impl MetricsSink for CapturingSink {
    async fn deliver(&mut self, line: &MetricLine) {
        self.lines.push(line.to_string());
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }

    fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            delivered: self.lines.len() as u64,
            ..DeliveryStats::default()
        }
    }

    fn name(&self) -> &str {
        "capture"
    }
}

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, 4, 3, 0, 0, 0).unwrap()
}

fn nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap()
}

fn range(minutes: i64, resolution: &str) -> TimeRange {
    TimeRange::new(
        origin(),
        origin() + TimeDelta::minutes(minutes),
        Resolution::parse(resolution).unwrap(),
    )
    .unwrap()
}

fn backfill<S: MetricsSink>(
    source: Arc<ScriptedSource>,
    sink: S,
    range: TimeRange,
    interval: &str,
) -> Backfill<S> {
    Backfill::new(
        Aggregator::new(source),
        sink,
        range,
        Interval::parse(interval).unwrap(),
    )
}

#[tokio::test]
async fn test_job_state_line_end_to_end() {
    let source = ScriptedSource::new(|_| {
        Ok(vec![row(&[("state", "ok".into()), ("count", Value::Integer(5))])])
    });
    let sink = Dispatcher::new(SinkConfig::local(), Vec::new()).unwrap();

    let mut run = backfill(source.clone(), sink, range(5, "5m"), "1h");
    let report = run.run(&[MetricKind::Jobs]).await;

    assert!(report.failed.is_empty());
    assert_eq!(report.lines(), 1);
    assert_eq!(report.delivery.fallback, 1);

    let output = String::from_utf8(run.into_sink().into_fallback()).unwrap();
    assert_eq!(
        output,
        format!("jobs,timeframe=hour,size=1,state=ok count=5 {}\n", nanos(origin()))
    );

    let queries = source.queries();
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].table, Table::Job);
    assert_eq!(queries[0].params, vec![origin() - TimeDelta::hours(1), origin()]);
}

#[tokio::test]
async fn test_one_query_per_bucket_in_time_order() {
    let source = ScriptedSource::new(|query| {
        let minute = (query.params[1] - origin()).num_minutes();
        Ok(vec![row(&[("count", Value::Integer(minute + 1))])])
    });

    let mut run = backfill(source.clone(), CapturingSink::default(), range(60, "15m"), "1d");
    let pass = run.run_pass(MetricKind::Workflows).await.unwrap();

    assert_eq!(pass.buckets, 4);
    assert_eq!(pass.lines, 4);
    assert_eq!(source.queries().len(), 4);

    let expected: Vec<String> = (0..4)
        .map(|i| {
            let bucket = origin() + TimeDelta::minutes(15 * i);
            format!(
                "workflows,timeframe=day,size=1 count={} {}",
                15 * i + 1,
                nanos(bucket)
            )
        })
        .collect();
    assert_eq!(run.sink().lines, expected);
}

#[tokio::test]
async fn test_windowed_zero_is_suppressed_but_cumulative_zero_is_not() {
    let source = ScriptedSource::new(|_| Ok(vec![row(&[("count", Value::Integer(0))])]));

    let mut run = backfill(source, CapturingSink::default(), range(30, "10m"), "1h");
    let report = run
        .run(&[MetricKind::NelsImports, MetricKind::NelsImportsTotal])
        .await;

    assert_eq!(report.completed.len(), 2);
    assert_eq!(report.completed[0].lines, 0);
    assert_eq!(report.completed[1].lines, 3);

    // one line per bucket, not just the last one
    let lines = &run.sink().lines;
    assert_eq!(lines.len(), 3);
    for (i, line) in lines.iter().enumerate() {
        let bucket = origin() + TimeDelta::minutes(10 * i as i64);
        assert_eq!(
            line,
            &format!("nels-imports,timeframe=epoch count=0 {}", nanos(bucket))
        );
    }
}

#[tokio::test]
async fn test_query_error_aborts_only_the_current_pass() {
    let failing_bucket = origin() + TimeDelta::minutes(20);
    let source = ScriptedSource::new(move |query| match query.table {
        Table::Dataset if query.params.last() == Some(&failing_bucket) => {
            Err(QueryError::Other("connection reset".to_string()))
        }
        Table::Dataset => Ok(vec![row(&[("size", Value::Integer(2048))])]),
        _ => Ok(vec![row(&[("count", Value::Integer(1))])]),
    });

    let mut run = backfill(source.clone(), CapturingSink::default(), range(40, "10m"), "2M");
    let report = run
        .run(&[MetricKind::DataGrowth, MetricKind::Users])
        .await;

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].kind, MetricKind::DataGrowth);
    assert_eq!(report.failed[0].buckets, 2);
    assert_eq!(report.failed[0].lines, 2);
    assert!(report.failed[0].error.to_string().contains("connection reset"));

    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.completed[0].kind, MetricKind::Users);
    assert_eq!(report.completed[0].buckets, 4);

    let lines = &run.sink().lines;
    assert_eq!(lines.len(), 6);
    assert_eq!(
        lines[0],
        format!("data_growth,timeframe=month,size=2 size=2048 {}", nanos(origin()))
    );
    assert!(lines[2].starts_with("galaxy-users,timeframe=month,size=2 count=1 "));

    // remaining data growth buckets were never queried
    let dataset_queries = source
        .queries()
        .iter()
        .filter(|q| q.table == Table::Dataset)
        .count();
    assert_eq!(dataset_queries, 3);
    assert_eq!(report.delivery.delivered, 6);
    assert_eq!(report.lines(), 6);
}

#[tokio::test]
async fn test_grouped_metric_emits_one_line_per_group() {
    let source = ScriptedSource::new(|query| {
        assert!(query.sql.contains("GROUP BY instance"));
        Ok(vec![
            row(&[("instance", Value::Integer(1)), ("count", Value::Integer(2))]),
            row(&[("instance", Value::Integer(2)), ("count", Value::Integer(0))]),
            row(&[("instance", Value::Integer(3)), ("count", Value::Integer(4))]),
        ])
    });

    let mut run = backfill(source, CapturingSink::default(), range(5, "5m"), "3h");
    run.run(&[MetricKind::NelsExports]).await;

    let ts = nanos(origin());
    assert_eq!(
        run.sink().lines,
        vec![
            format!("nels-exports,timeframe=hour,size=3,instance=1 count=2 {ts}"),
            format!("nels-exports,timeframe=hour,size=3,instance=3 count=4 {ts}"),
        ]
    );
    assert_eq!(run.sink().flushes, 1);
}

#[tokio::test]
async fn test_every_pass_runs_in_order() {
    let source = ScriptedSource::new(|_| {
        Ok(vec![row(&[
            ("state", "ok".into()),
            ("instance", "a".into()),
            ("count", Value::Integer(1)),
            ("size", Value::Integer(1)),
        ])])
    });

    let mut run = backfill(source, CapturingSink::default(), range(5, "5m"), "1h");
    let report = run.run(&MetricKind::ALL).await;

    let kinds: Vec<_> = report.completed.iter().map(|pass| pass.kind).collect();
    assert_eq!(kinds, MetricKind::ALL.to_vec());

    let measurements: Vec<_> = run
        .sink()
        .lines
        .iter()
        .map(|line| line.split(',').next().unwrap().to_string())
        .collect();
    assert_eq!(
        measurements,
        vec![
            "jobs",
            "data_growth",
            "workflows",
            "galaxy-users",
            "nels-exports",
            "nels-imports",
            "jobs",
            "data_growth",
            "workflows",
            "nels-exports",
            "nels-imports",
        ]
    );
}
