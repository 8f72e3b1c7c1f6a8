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

//! PostgreSQL data source backed by `tokio-postgres`

use super::{DataSource, Query, Row, Value};
use crate::error::QueryError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

/// A single read-only connection to the platform database
pub struct PostgresSource {
    client: Client,
}

impl PostgresSource {
    /// Connect and spawn the connection driver on the current runtime
    pub async fn connect(url: &str) -> Result<Self, QueryError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "database connection closed with error");
            }
        });

        Ok(Self { client })
    }
}

#[async_trait]
impl DataSource for PostgresSource {
    async fn query(&self, query: &Query) -> Result<Vec<Row>, QueryError> {
        let params: Vec<&(dyn ToSql + Sync)> = query
            .params
            .iter()
            .map(|param| param as &(dyn ToSql + Sync))
            .collect();

        debug!(table = %query.table, sql = %query.sql, "running query");
        let rows = self.client.query(query.sql.as_str(), &params).await?;

        rows.iter().map(decode_row).collect()
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

fn decode_row(row: &tokio_postgres::Row) -> Result<Row, QueryError> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = decode_column(row, idx, column.type_()).ok_or_else(|| {
                QueryError::UnsupportedColumn {
                    column: column.name().to_string(),
                    type_name: column.type_().name().to_string(),
                }
            })??;
            Ok((column.name().to_string(), value))
        })
        .collect()
}

/// `None` when the column type is not one the aggregates produce
fn decode_column(
    row: &tokio_postgres::Row,
    idx: usize,
    ty: &Type,
) -> Option<Result<Value, QueryError>> {
    let value = match *ty {
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map(Value::from),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map(|v| Value::from(v.map(i64::from))),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map(|v| Value::from(v.map(i64::from))),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .map(|v| v.map_or(Value::Null, Value::Float)),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map(|v| v.map_or(Value::Null, |v| Value::Float(v.into()))),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => row
            .try_get::<_, Option<String>>(idx)
            .map(|v| v.map_or(Value::Null, Value::Text)),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .map(|v| text_or_null(v.map(|d| d.to_string()))),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .map(|v| text_or_null(v.map(|t| t.to_string()))),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .map(|v| text_or_null(v.map(|t| t.to_rfc3339()))),
        _ => return None,
    };
    Some(value.map_err(QueryError::from))
}

fn text_or_null(text: Option<String>) -> Value {
    text.map_or(Value::Null, Value::Text)
}
