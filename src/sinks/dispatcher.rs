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

//! HTTP line protocol writer with a local fallback

use super::{DeliveryStats, MetricsSink, SinkConfig};
use crate::error::DeliveryError;
use crate::model::MetricLine;
use async_trait::async_trait;
use std::io::{self, Write};
use tracing::{debug, warn};

/// Delivers each line with `POST {url}/write?db={database}`.
///
/// Without a URL no HTTP client is built and every line goes straight to
/// the fallback writer. With a URL, a rejected or failed request writes the
/// sink's response body (or the transport error) to the fallback instead.
pub struct Dispatcher<W = io::Stdout> {
    config: SinkConfig,
    client: Option<reqwest::Client>,
    fallback: W,
    stats: DeliveryStats,
}

impl Dispatcher<io::Stdout> {
    /// Dispatcher whose fallback is the process's standard output
    pub fn stdout(config: SinkConfig) -> Result<Self, DeliveryError> {
        Self::new(config, io::stdout())
    }
}

impl<W: Write + Send> Dispatcher<W> {
    pub fn new(config: SinkConfig, fallback: W) -> Result<Self, DeliveryError> {
        let client = if config.url.is_some() {
            Some(reqwest::Client::builder().timeout(config.timeout).build()?)
        } else {
            None
        };

        Ok(Self {
            config,
            client,
            fallback,
            stats: DeliveryStats::default(),
        })
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Give back the fallback writer
    pub fn into_fallback(self) -> W {
        self.fallback
    }

    fn write_fallback(&mut self, text: &str) {
        if let Err(err) = writeln!(self.fallback, "{text}") {
            warn!(error = %err, "failed to write to local fallback");
        }
    }
}

#[async_trait]
impl<W: Write + Send> MetricsSink for Dispatcher<W> {
    async fn deliver(&mut self, line: &MetricLine) {
        let Some(client) = self.client.clone() else {
            self.write_fallback(line.as_str());
            self.stats.fallback += 1;
            return;
        };
        let url = self.config.write_url().unwrap_or_default();

        match send_line(&client, &url, &self.config, line).await {
            Ok(()) => {
                self.stats.delivered += 1;
            }
            Err(err) => {
                warn!(error = %err, url = %url, "metric line was not delivered");
                self.write_fallback(&err.fallback_text());
                self.stats.failed += 1;
            }
        }
    }

    fn flush(&mut self) {
        if let Err(err) = self.fallback.flush() {
            warn!(error = %err, "failed to flush local fallback");
        }
    }

    fn stats(&self) -> DeliveryStats {
        self.stats
    }

    fn name(&self) -> &str {
        if self.client.is_some() {
            "http"
        } else {
            "stdout"
        }
    }
}

/// Send one line; any non-2xx status is an error carrying the body
async fn send_line(
    client: &reqwest::Client,
    url: &str,
    config: &SinkConfig,
    line: &MetricLine,
) -> Result<(), DeliveryError> {
    let mut request = client
        .post(url)
        .query(&[("db", config.database.as_str())])
        .body(line.as_str().to_owned());

    if let Some(credentials) = &config.credentials {
        request = request.basic_auth(&credentials.user, Some(&credentials.password));
    }

    let resp = request.send().await?;
    let status = resp.status();

    if !status.is_success() {
        let body = match resp.text().await {
            Ok(body) if !body.trim().is_empty() => body,
            _ => status.to_string(),
        };
        return Err(DeliveryError::Status { status, body });
    }

    // Drain body for connection reuse.
    let _ = resp.bytes().await;
    debug!(%status, "delivered metric line");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Observation;

    fn line() -> MetricLine {
        Observation::builder("workflows")
            .tag("timeframe", "hour")
            .tag("size", 1)
            .field("count", 3)
            .at_nanos(1_554_249_600_000_000_000)
            .unwrap()
            .to_line()
    }

    #[tokio::test]
    async fn test_no_url_writes_locally_without_client() {
        let mut dispatcher = Dispatcher::new(SinkConfig::local(), Vec::new()).unwrap();
        assert!(dispatcher.client.is_none());
        assert_eq!(dispatcher.name(), "stdout");

        dispatcher.deliver(&line()).await;
        dispatcher.deliver(&line()).await;

        assert_eq!(
            dispatcher.stats(),
            DeliveryStats {
                delivered: 0,
                fallback: 2,
                failed: 0
            }
        );
        let output = String::from_utf8(dispatcher.into_fallback()).unwrap();
        assert_eq!(output, format!("{line}\n{line}\n", line = line()));
    }

    #[tokio::test]
    async fn test_unreachable_sink_reports_locally() {
        // Nothing listens on the discard port on loopback.
        let config = SinkConfig {
            url: Some("http://127.0.0.1:9".to_string()),
            timeout: std::time::Duration::from_secs(2),
            ..SinkConfig::local()
        };
        let mut dispatcher = Dispatcher::new(config, Vec::new()).unwrap();

        dispatcher.deliver(&line()).await;

        assert_eq!(dispatcher.stats().failed, 1);
        let output = String::from_utf8(dispatcher.into_fallback()).unwrap();
        assert!(!output.is_empty());
        assert!(!output.contains("workflows,"));
    }
}
