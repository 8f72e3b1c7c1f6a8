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

//! Metric sinks for delivering formatted lines
//!
//! Delivery is best effort: a sink never reports failure to its caller. Lines
//! that cannot reach the remote endpoint leave a visible trace on the local
//! fallback channel instead.

use crate::model::MetricLine;
use async_trait::async_trait;
use std::time::Duration;

pub mod dispatcher;

pub use dispatcher::Dispatcher;

/// Trait for all metric sinks
#[async_trait]
pub trait MetricsSink: Send {
    /// Deliver one line. Failures are handled inside the sink.
    async fn deliver(&mut self, line: &MetricLine);

    /// Flush any buffered output
    fn flush(&mut self);

    /// Counters for everything delivered so far
    fn stats(&self) -> DeliveryStats;

    /// Get the name of this sink
    fn name(&self) -> &str;
}

/// Outcome counters kept by a sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Accepted by the remote endpoint
    pub delivered: u64,

    /// Written locally because no endpoint is configured
    pub fallback: u64,

    /// Rejected by, or never reached, the remote endpoint
    pub failed: u64,
}

impl DeliveryStats {
    pub fn total(&self) -> u64 {
        self.delivered + self.fallback + self.failed
    }
}

/// Basic authentication pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// Where and how lines are written, fixed for the lifetime of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Base URL of the line protocol endpoint. `None` writes locally.
    pub url: Option<String>,

    /// Target database, sent as the `db` query parameter
    pub database: String,

    /// Attached only when both user and password are known
    pub credentials: Option<Credentials>,

    /// Per-request timeout
    pub timeout: Duration,
}

impl SinkConfig {
    /// A configuration that writes every line locally
    pub fn local() -> Self {
        Self {
            url: None,
            database: default_database(),
            credentials: None,
            timeout: default_timeout(),
        }
    }

    /// The `/write` endpoint derived from the base URL
    pub fn write_url(&self) -> Option<String> {
        self.url
            .as_deref()
            .map(|url| format!("{}/write", url.trim_end_matches('/')))
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::local()
    }
}

pub(crate) fn default_database() -> String {
    "galaxy".to_string()
}

pub(crate) fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_url() {
        let mut config = SinkConfig::local();
        assert_eq!(config.write_url(), None);

        config.url = Some("http://influx:8086/".to_string());
        assert_eq!(config.write_url().as_deref(), Some("http://influx:8086/write"));
    }

    #[test]
    fn test_stats_total() {
        let stats = DeliveryStats {
            delivered: 3,
            fallback: 0,
            failed: 2,
        };
        assert_eq!(stats.total(), 5);
    }
}
