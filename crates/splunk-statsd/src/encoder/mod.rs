// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of aggregate snapshots into HTTP Event Collector payloads.
//!
//! Both wire formats share the same encoding rules, implemented once as the
//! provided methods of [`EventEncoder`]. A format only decides how the
//! resulting `(field, value)` pairs are grouped into JSON objects.

mod consolidated;
mod legacy;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{OutputFormat, SplunkConfig};
use crate::snapshot::{MetricSet, TimerData};

pub use consolidated::ConsolidatedEncoder;
pub use legacy::LegacyEncoder;

/// Name under which the forwarder reports its own health statistics
pub const HEALTH_STATS_NAME: &str = "splunkStats";
/// Name under which aggregator self-metrics are reported
pub const SELF_METRICS_NAME: &str = "statsd";

/// Category a group of values belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Timer,
    Gauge,
    Set,
    Stats,
}

impl MetricKind {
    /// Label the category is reported under
    pub fn label(self, config: &SplunkConfig) -> &str {
        match self {
            Self::Counter => &config.labels.counter,
            Self::Timer => &config.labels.timer,
            Self::Gauge => &config.labels.gauge,
            Self::Set => &config.labels.set,
            Self::Stats => &config.metric_prefix,
        }
    }
}

pub trait EventEncoder {
    fn config(&self) -> &SplunkConfig;

    /// Records the values of a single metric
    fn push(&mut self, kind: MetricKind, name: &str, values: Vec<(String, f64)>, timestamp: i64);

    /// Concatenates the JSON encoding of every event, without separators
    fn serialize(&self) -> Result<String, serde_json::Error>;

    fn add_counters(
        &mut self,
        counters: &BTreeMap<String, f64>,
        rates: Option<&BTreeMap<String, f64>>,
        timestamp: i64,
    ) {
        let include_counts = self.config().include_counts;
        for (name, count) in counters {
            let mut values = Vec::with_capacity(2);
            if let Some(rate) = rates.and_then(|rates| rates.get(name)) {
                values.push(("rate".to_string(), *rate));
            }
            if include_counts {
                values.push(("count".to_string(), *count));
            }
            self.push(MetricKind::Counter, name, values, timestamp);
        }
    }

    fn add_timers(&mut self, timers: &BTreeMap<String, TimerData>, timestamp: i64) {
        for (name, data) in timers {
            self.push(MetricKind::Timer, name, data.fields(), timestamp);
        }
    }

    fn add_gauges(&mut self, gauges: &BTreeMap<String, f64>, timestamp: i64) {
        for (name, value) in gauges {
            self.push(
                MetricKind::Gauge,
                name,
                vec![("value".to_string(), *value)],
                timestamp,
            );
        }
    }

    fn add_sets(&mut self, sets: &BTreeMap<String, MetricSet>, timestamp: i64) {
        for (name, set) in sets {
            self.push(
                MetricKind::Set,
                name,
                vec![("count".to_string(), set.size() as f64)],
                timestamp,
            );
        }
    }

    fn add_self_stats(&mut self, name: &str, stats: Vec<(String, f64)>, timestamp: i64) {
        self.push(MetricKind::Stats, name, stats, timestamp);
    }
}

/// Builds the encoder for the configured output format
pub fn for_config(config: &SplunkConfig) -> Box<dyn EventEncoder + Send + '_> {
    match config.output_format {
        OutputFormat::LegacyEvent => Box::new(LegacyEncoder::new(config)),
        OutputFormat::ConsolidatedMetric => Box::new(ConsolidatedEncoder::new(config)),
    }
}

/// Values of one legacy event, followed by its type and name
#[derive(Serialize)]
struct EventPayload<'a> {
    #[serde(flatten)]
    values: BTreeMap<String, f64>,
    #[serde(rename = "metricType")]
    metric_type: &'a str,
    #[serde(rename = "metricName")]
    metric_name: String,
}

/// Flattened fields of one consolidated metric event, keyed
/// `metric_name:<key>`
#[derive(Serialize)]
struct MetricFields<'a> {
    metric_type: &'a str,
    #[serde(flatten)]
    values: BTreeMap<String, f64>,
}

/// Splits a concatenated payload back into its JSON objects
#[cfg(test)]
pub(crate) fn parse_payload(payload: &str) -> Vec<serde_json::Value> {
    serde_json::Deserializer::from_str(payload)
        .into_iter::<serde_json::Value>()
        .collect::<Result<_, _>>()
        .expect("payload is not a sequence of JSON objects")
}
