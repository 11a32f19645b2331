// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::Serialize;

use super::{EventEncoder, MetricFields, MetricKind};
use crate::config::{EventTags, SplunkConfig};

#[derive(Serialize)]
struct MetricEvent<'a> {
    time: i64,
    event: &'static str,
    #[serde(flatten)]
    tags: &'a EventTags,
    fields: MetricFields<'a>,
}

/// Emits one metric event per metric type, for the `/services/collector`
/// endpoint. Every value of the type is flattened into the event's `fields`
/// as `metric_name:<key>`.
pub struct ConsolidatedEncoder<'a> {
    config: &'a SplunkConfig,
    events: Vec<MetricEvent<'a>>,
}

impl<'a> ConsolidatedEncoder<'a> {
    pub fn new(config: &'a SplunkConfig) -> Self {
        Self {
            config,
            events: Vec::new(),
        }
    }

    /// Number of metric types encountered so far
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn key(&self, kind: MetricKind, name: &str, field: &str) -> String {
        match kind {
            // single valued, the metric name is the key
            MetricKind::Gauge | MetricKind::Set => name.to_string(),
            MetricKind::Stats => format!("{}.{name}.{field}", self.config.metric_prefix),
            MetricKind::Counter | MetricKind::Timer => format!("{name}.{field}"),
        }
    }

    fn event_for(&mut self, metric_type: &'a str, timestamp: i64) -> &mut MetricEvent<'a> {
        let config = self.config;
        let position = match self
            .events
            .iter()
            .position(|e| e.fields.metric_type == metric_type)
        {
            Some(position) => position,
            None => {
                self.events.push(MetricEvent {
                    time: timestamp,
                    event: "metric",
                    tags: &config.tags,
                    fields: MetricFields {
                        metric_type,
                        values: BTreeMap::new(),
                    },
                });
                self.events.len() - 1
            }
        };
        &mut self.events[position]
    }
}

impl EventEncoder for ConsolidatedEncoder<'_> {
    fn config(&self) -> &SplunkConfig {
        self.config
    }

    fn push(&mut self, kind: MetricKind, name: &str, values: Vec<(String, f64)>, timestamp: i64) {
        let keyed: Vec<(String, f64)> = values
            .into_iter()
            .map(|(field, value)| {
                (
                    format!("metric_name:{}", self.key(kind, name, &field)),
                    value,
                )
            })
            .collect();
        let metric_type = kind.label(self.config);
        self.event_for(metric_type, timestamp)
            .fields
            .values
            .extend(keyed);
    }

    fn serialize(&self) -> Result<String, serde_json::Error> {
        self.events.iter().map(serde_json::to_string).collect()
    }
}
