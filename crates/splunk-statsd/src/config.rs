// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration bundle and the frozen configuration resolved from it.
//!
//! The bundle mirrors the statsd configuration file: backend options live under
//! the `splunk` key, `flush_counts` and `prefixStats` are top-level statsd
//! options. Falsy values (missing, empty strings, a zero port) fall back to the
//! defaults.

use std::path::Path;

use serde::Deserialize;

use crate::errors::ConfigError;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8088;
const DEFAULT_SOURCE: &str = "statsd";
const DEFAULT_SOURCETYPE: &str = "_json";
const DEFAULT_METRIC_PREFIX: &str = "statsd";

/// Raw configuration bundle as handed to the backend at init
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigBundle {
    #[serde(default)]
    pub splunk: SplunkOptions,
    pub flush_counts: Option<bool>,
    #[serde(rename = "prefixStats")]
    pub prefix_stats: Option<String>,
}

/// Options under the `splunk` key
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplunkOptions {
    pub splunk_host: Option<String>,
    pub splunk_port: Option<u16>,
    #[serde(rename = "useSSL")]
    pub use_ssl: Option<bool>,
    #[serde(rename = "strictSSL")]
    pub strict_ssl: Option<bool>,
    pub splunk_token: Option<String>,
    pub timer_label: Option<String>,
    pub counter_label: Option<String>,
    pub gauge_label: Option<String>,
    pub set_label: Option<String>,
    pub host: Option<String>,
    pub source: Option<String>,
    pub sourcetype: Option<String>,
    pub index: Option<String>,
    pub use_metrics: Option<bool>,
}

impl ConfigBundle {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&contents)
    }
}

/// Wire format used for the events sent to the collector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// One event per metric, sent to the event endpoint
    #[default]
    LegacyEvent,
    /// One metric event per metric type, sent to the raw collector endpoint
    ConsolidatedMetric,
}

impl OutputFormat {
    pub fn path(&self) -> &'static str {
        match self {
            Self::LegacyEvent => "/services/collector/event",
            Self::ConsolidatedMetric => "/services/collector",
        }
    }
}

/// Type labels applied to each metric category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricLabels {
    pub counter: String,
    pub timer: String,
    pub gauge: String,
    pub set: String,
}

impl Default for MetricLabels {
    fn default() -> Self {
        Self {
            counter: "counter".to_string(),
            timer: "timer".to_string(),
            gauge: "gauge".to_string(),
            set: "set".to_string(),
        }
    }
}

/// Splunk indexing fields attached to every event. Unset fields are left for
/// the collector to infer.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct EventTags {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sourcetype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
}

/// Configuration frozen at init. Never mutated by a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplunkConfig {
    pub endpoint_host: String,
    pub endpoint_port: u16,
    pub use_tls: bool,
    pub verify_tls: bool,
    pub auth_token: Option<String>,
    pub labels: MetricLabels,
    pub tags: EventTags,
    /// Whether counters also report their raw count next to the rate
    pub include_counts: bool,
    /// Metric type used for the forwarder's own statistics
    pub metric_prefix: String,
    pub output_format: OutputFormat,
}

impl Default for SplunkConfig {
    fn default() -> Self {
        Self::resolve(&ConfigBundle::default())
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

fn or_default(value: &Option<String>, default: &str) -> String {
    non_empty(value).unwrap_or_else(|| default.to_string())
}

impl SplunkConfig {
    pub fn resolve(bundle: &ConfigBundle) -> Self {
        let splunk = &bundle.splunk;
        let default_labels = MetricLabels::default();

        let output_format = if splunk.use_metrics.unwrap_or(false) {
            OutputFormat::ConsolidatedMetric
        } else {
            OutputFormat::LegacyEvent
        };

        Self {
            endpoint_host: or_default(&splunk.splunk_host, DEFAULT_HOST),
            endpoint_port: splunk
                .splunk_port
                .filter(|port| *port != 0)
                .unwrap_or(DEFAULT_PORT),
            use_tls: splunk.use_ssl.unwrap_or(true),
            verify_tls: splunk.strict_ssl.unwrap_or(true),
            auth_token: splunk.splunk_token.clone(),
            labels: MetricLabels {
                counter: or_default(&splunk.counter_label, &default_labels.counter),
                timer: or_default(&splunk.timer_label, &default_labels.timer),
                gauge: or_default(&splunk.gauge_label, &default_labels.gauge),
                set: or_default(&splunk.set_label, &default_labels.set),
            },
            tags: EventTags {
                host: non_empty(&splunk.host),
                source: Some(or_default(&splunk.source, DEFAULT_SOURCE)),
                sourcetype: Some(or_default(&splunk.sourcetype, DEFAULT_SOURCETYPE)),
                index: non_empty(&splunk.index),
            },
            include_counts: bundle.flush_counts.unwrap_or(true),
            metric_prefix: or_default(&bundle.prefix_stats, DEFAULT_METRIC_PREFIX),
            output_format,
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.use_tls {
            "https"
        } else {
            "http"
        }
    }

    pub fn endpoint_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme(),
            self.endpoint_host,
            self.endpoint_port,
            self.output_format.path()
        )
    }

    pub fn authorization(&self) -> String {
        format!("Splunk {}", self.auth_token.as_deref().unwrap_or_default())
    }

    /// A `statsd` sourcetype makes the collector parse the payload as raw
    /// statsd lines, which breaks consolidated metric events.
    pub fn has_conflicting_sourcetype(&self) -> bool {
        self.output_format == OutputFormat::ConsolidatedMetric
            && self.tags.sourcetype.as_deref() == Some("statsd")
    }
}
