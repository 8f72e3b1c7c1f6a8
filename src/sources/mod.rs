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

//! Data sources the aggregator reads from
//!
//! A source answers a [`Query`]: SQL text against one [`Table`], with UTC
//! timestamp parameters bound in order as `$1`, `$2`, ... It returns rows as
//! column-name to [`Value`] maps.

use crate::error::QueryError;
use ahash::HashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

pub mod postgres;

pub use postgres::PostgresSource;

/// Tables of the platform schema that metrics are drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Job,
    Dataset,
    WorkflowInvocation,
    NelsExportTracking,
    NelsImportTracking,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Job => "job",
            Table::Dataset => "dataset",
            Table::WorkflowInvocation => "workflow_invocation",
            Table::NelsExportTracking => "nels_export_tracking",
            Table::NelsImportTracking => "nels_import_tracking",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A read-only aggregate query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Table the query reads from
    pub table: Table,

    /// Complete SQL text with `$n` placeholders
    pub sql: String,

    /// Timestamp parameters, bound in order
    pub params: Vec<DateTime<Utc>>,
}

/// A single column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    /// Integer view of a numeric value. Null maps to `None`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(value) => Some(*value),
            Value::Float(value) => Some(*value as i64),
            Value::Text(text) => text.parse().ok(),
            Value::Null => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            Value::Text(text) => text.parse().ok(),
            Value::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(value) => write!(f, "{value}"),
            Value::Float(value) => write!(f, "{value}"),
            Value::Text(text) => f.write_str(text),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// A result row keyed by column name
pub type Row = HashMap<String, Value>;

/// Trait for all data sources
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Run an aggregate query and return every resulting row
    async fn query(&self, query: &Query) -> Result<Vec<Row>, QueryError>;

    /// Get the name of this source
    fn name(&self) -> &str;
}
