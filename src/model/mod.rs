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

//! Core data model for emitted metrics
//!
//! An [`Observation`] is one measured value set at one instant. It renders
//! to a [`MetricLine`] in line protocol:
//!
//! ```text
//! measurement[,tag=value]* field=value[,field=value]* timestamp_ns
//! ```
//!
//! Tags and fields keep the order they were attached in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};

/// Numeric field value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Counts and byte sizes
    Integer(i64),
    /// Scaled quantities such as gigabytes
    Float(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(value) => write!(f, "{value}"),
            FieldValue::Float(value) => write!(f, "{value}"),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(value.into())
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Integer(value.into())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

/// A single data point ready for formatting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
    timestamp_ns: i64,
}

impl Observation {
    /// Start building an observation for `measurement`
    pub fn builder(measurement: impl Into<String>) -> ObservationBuilder {
        ObservationBuilder {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn tags(&self) -> &[(String, String)] {
        &self.tags
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    /// Look up a tag value by key
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Look up a field value by key
    pub fn field(&self, key: &str) -> Option<FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    /// Render this observation as line protocol
    pub fn to_line(&self) -> MetricLine {
        let mut line = String::with_capacity(64);

        escape_into(&mut line, &self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            line.push(',');
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            escape_into(&mut line, value, &[',', '=', ' ']);
        }

        for (i, (key, value)) in self.fields.iter().enumerate() {
            line.push(if i == 0 { ' ' } else { ',' });
            escape_into(&mut line, key, &[',', '=', ' ']);
            // Writing to a String cannot fail
            let _ = write!(line, "={value}");
        }

        let _ = write!(line, " {}", self.timestamp_ns);
        MetricLine(line)
    }
}

/// Incremental construction of an [`Observation`]
#[derive(Debug, Clone)]
pub struct ObservationBuilder {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
}

impl ObservationBuilder {
    pub fn tag(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.tags.push((key.into(), value.to_string()));
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    /// Finish with a nanosecond timestamp.
    ///
    /// Returns `None` when no field was attached, since such a point has no
    /// line protocol representation.
    pub fn at_nanos(self, timestamp_ns: i64) -> Option<Observation> {
        if self.fields.is_empty() {
            return None;
        }
        Some(Observation {
            measurement: self.measurement,
            tags: self.tags,
            fields: self.fields,
            timestamp_ns,
        })
    }

    /// Finish with a UTC instant, or `None` if the instant is outside the
    /// nanosecond range (years 1677 to 2262) or no field was attached.
    pub fn at(self, time: DateTime<Utc>) -> Option<Observation> {
        let timestamp_ns = time.timestamp_nanos_opt()?;
        self.at_nanos(timestamp_ns)
    }
}

/// One formatted line protocol record, without trailing newline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricLine(String);

impl MetricLine {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for MetricLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Observation> for MetricLine {
    fn from(observation: &Observation) -> Self {
        observation.to_line()
    }
}

fn escape_into(out: &mut String, raw: &str, special: &[char]) {
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}
