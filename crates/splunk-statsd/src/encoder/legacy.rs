// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;

use super::{EventEncoder, EventPayload, MetricKind};
use crate::config::{EventTags, SplunkConfig};

#[derive(Serialize)]
struct LegacyEvent<'a> {
    event: EventPayload<'a>,
    time: i64,
    #[serde(flatten)]
    tags: &'a EventTags,
}

/// Emits one JSON event per metric, for the `/services/collector/event`
/// endpoint.
pub struct LegacyEncoder<'a> {
    config: &'a SplunkConfig,
    events: Vec<LegacyEvent<'a>>,
}

impl<'a> LegacyEncoder<'a> {
    pub fn new(config: &'a SplunkConfig) -> Self {
        Self {
            config,
            events: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventEncoder for LegacyEncoder<'_> {
    fn config(&self) -> &SplunkConfig {
        self.config
    }

    fn push(&mut self, kind: MetricKind, name: &str, values: Vec<(String, f64)>, timestamp: i64) {
        let config = self.config;
        self.events.push(LegacyEvent {
            event: EventPayload {
                values: values.into_iter().collect(),
                metric_type: kind.label(config),
                metric_name: name.to_string(),
            },
            time: timestamp,
            tags: &config.tags,
        });
    }

    fn serialize(&self) -> Result<String, serde_json::Error> {
        self.events.iter().map(serde_json::to_string).collect()
    }
}
