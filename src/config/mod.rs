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

//! Configuration loading
//!
//! Accepts either a small dedicated file carrying `db_url`, or a Galaxy
//! server configuration whose `galaxy.database_connection` names the
//! database. Both JSON and YAML are understood; the format is picked by the
//! file extension.

use crate::sinks::{self, Credentials, SinkConfig};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StatsConfig {
    /// Database URL, takes precedence over the Galaxy section
    #[serde(default)]
    pub db_url: Option<String>,

    /// The `galaxy` section of a Galaxy server configuration
    #[serde(default)]
    pub galaxy: Option<GalaxySection>,

    /// Metrics sink defaults, overridable on the command line
    #[serde(default)]
    pub sink: SinkSection,
}

/// Subset of Galaxy's own configuration that is read
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GalaxySection {
    /// SQLAlchemy-style database URL
    #[serde(default)]
    pub database_connection: Option<String>,
}

/// Sink settings as written in the configuration file
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SinkSection {
    pub url: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,

    /// Request timeout, e.g. `"10s"`
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

/// Sink settings given on the command line; each one wins over the file
#[derive(Debug, Clone, Default)]
pub struct SinkOverrides {
    pub url: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl StatsConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json(&contents)
        } else {
            Self::from_yaml(&contents)
        }
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse configuration")
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse configuration")
    }

    /// Connection URL for the platform database
    pub fn database_url(&self) -> Result<String> {
        let raw = self
            .db_url
            .as_deref()
            .or_else(|| {
                self.galaxy
                    .as_ref()
                    .and_then(|galaxy| galaxy.database_connection.as_deref())
            })
            .context("configuration has neither db_url nor galaxy.database_connection")?;

        normalize_database_url(raw)
    }

    /// Resolve the sink configuration, command line first
    pub fn sink_config(&self, overrides: SinkOverrides) -> SinkConfig {
        let file = &self.sink;

        let url = overrides.url.or_else(|| file.url.clone());
        let database = overrides
            .database
            .or_else(|| file.database.clone())
            .unwrap_or_else(sinks::default_database);
        let user = overrides.user.or_else(|| file.user.clone());
        let password = overrides.password.or_else(|| file.password.clone());

        let credentials = match (user, password) {
            (Some(user), Some(password)) => Some(Credentials { user, password }),
            _ => None,
        };

        SinkConfig {
            url,
            database,
            credentials,
            timeout: file.timeout.unwrap_or_else(sinks::default_timeout),
        }
    }
}

/// Strip a SQLAlchemy driver suffix (`postgresql+psycopg2://`) and reject
/// anything that is not PostgreSQL.
fn normalize_database_url(raw: &str) -> Result<String> {
    let Some((scheme, rest)) = raw.split_once("://") else {
        bail!("database URL has no scheme: {raw}");
    };
    let dialect = scheme.split('+').next().unwrap_or(scheme);

    match dialect {
        "postgres" | "postgresql" => Ok(format!("postgresql://{rest}")),
        other => bail!("unsupported database {other}, only PostgreSQL is supported"),
    }
}
