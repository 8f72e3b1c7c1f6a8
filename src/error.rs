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

//! Error types shared by the backfill engine
//!
//! Usage errors (bad interval, resolution or timestamp tokens) end the process
//! with a one-line diagnostic. Query errors abort a single metric pass.
//! Delivery errors never leave the sink dispatcher.

use thiserror::Error;

/// Interval token that does not match `<digits><h|d|M>`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("timerange {token} is invalid, valid examples: 1h 2d 1M")]
pub struct InvalidIntervalError {
    /// The rejected token, verbatim
    pub token: String,
}

/// Resolution token that does not match `<digits><s|m|h|d|w>`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("resolution {token} is invalid, valid examples: 30s 5m 1h 1d 1w")]
pub struct InvalidResolutionError {
    pub token: String,
}

/// Start or end timestamp in an unrecognised format
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("timestamp {input} is invalid, valid examples: 2019-04-01, 2019-04-01 12:00:00, 2019-04-01T12:00:00Z")]
pub struct InvalidTimeError {
    pub input: String,
}

/// A time range that cannot produce buckets
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRangeError {
    #[error("start {start} must be before end {end}")]
    Inverted { start: String, end: String },

    #[error("resolution must be positive")]
    NonPositiveResolution,
}

/// Failure talking to, or decoding rows from, the data source
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("database query failed: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("column {column} has unsupported type {type_name}")]
    UnsupportedColumn { column: String, type_name: String },

    #[error("window start for bucket {bucket} is out of range")]
    WindowOutOfRange { bucket: String },

    #[error("{0}")]
    Other(String),
}

/// A line that did not reach the remote sink
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("sink rejected write with status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("sink request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl DeliveryError {
    /// Text surfaced on the local fallback channel: the sink's response
    /// body when there is one, otherwise the transport error.
    pub fn fallback_text(&self) -> String {
        match self {
            DeliveryError::Status { body, .. } => body.clone(),
            DeliveryError::Transport(err) => err.to_string(),
        }
    }
}
