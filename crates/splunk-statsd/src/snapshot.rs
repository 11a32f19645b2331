// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Aggregate snapshot handed over by the statsd aggregator on every flush.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

/// Computed aggregates since the previous flush. Categories the aggregator did
/// not report are `None` and are skipped entirely when encoding.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregateSnapshot {
    pub counters: Option<BTreeMap<String, f64>>,
    pub counter_rates: Option<BTreeMap<String, f64>>,
    pub gauges: Option<BTreeMap<String, f64>>,
    pub sets: Option<BTreeMap<String, MetricSet>>,
    pub timer_data: Option<BTreeMap<String, TimerData>>,
    /// Aggregator self-metrics such as `processing_time`
    pub statsd_metrics: Option<BTreeMap<String, f64>>,
}

impl AggregateSnapshot {
    /// Number of metrics in the counter, timer, gauge and set categories.
    /// Aggregator self-metrics are not counted.
    pub fn metric_count(&self) -> usize {
        self.counters.as_ref().map_or(0, BTreeMap::len)
            + self.timer_data.as_ref().map_or(0, BTreeMap::len)
            + self.gauges.as_ref().map_or(0, BTreeMap::len)
            + self.sets.as_ref().map_or(0, BTreeMap::len)
    }
}

/// Distinct values seen for a set metric
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct MetricSet(HashSet<String>);

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: impl Into<String>) -> bool {
        self.0.insert(value.into())
    }

    /// Cardinality of the set
    pub fn size(&self) -> usize {
        self.0.len()
    }
}

impl<S: Into<String>> FromIterator<S> for MetricSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Statistics computed by the aggregator for one timer. A timer without
/// samples only carries `count` and `count_ps`; the other statistics are
/// `None` and never reach the payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimerData {
    pub std: Option<f64>,
    pub upper: Option<f64>,
    pub lower: Option<f64>,
    pub count: f64,
    pub count_ps: f64,
    pub sum: Option<f64>,
    pub sum_squares: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    /// Histogram bins keyed by bin name, e.g. `bin_100` or `bin_inf`
    pub histogram: Option<BTreeMap<String, f64>>,
    /// Per-threshold statistics such as `mean_90`, `upper_90` or `count_90`
    #[serde(flatten)]
    pub percentiles: BTreeMap<String, f64>,
}

impl TimerData {
    /// Flattens the record into `(field, value)` pairs. Histogram bins become
    /// `histogram.<bin>` so no nested values reach the payload.
    pub fn fields(&self) -> Vec<(String, f64)> {
        let TimerData {
            std,
            upper,
            lower,
            count,
            count_ps,
            sum,
            sum_squares,
            mean,
            median,
            histogram,
            percentiles,
        } = self;

        let reported = [
            ("std", *std),
            ("upper", *upper),
            ("lower", *lower),
            ("count", Some(*count)),
            ("count_ps", Some(*count_ps)),
            ("sum", *sum),
            ("sum_squares", *sum_squares),
            ("mean", *mean),
            ("median", *median),
        ];
        let mut fields: Vec<(String, f64)> = reported
            .into_iter()
            .filter_map(|(field, value)| value.map(|v| (field.to_string(), v)))
            .collect();
        fields.extend(percentiles.iter().map(|(k, v)| (k.clone(), *v)));
        if let Some(histogram) = histogram {
            fields.extend(
                histogram
                    .iter()
                    .map(|(bin, v)| (format!("histogram.{bin}"), *v)),
            );
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_statsd_payload() {
        let snapshot: AggregateSnapshot = serde_json::from_str(
            r#"{
                "counters": {"foo": 100},
                "counter_rates": {"foo": 10},
                "gauges": {"baz": 2.5},
                "sets": {"users": ["a", "b", "a"]},
                "timer_data": {
                    "req": {
                        "std": 81.64965809277261, "upper": 300, "lower": 100,
                        "count": 3, "count_ps": 30, "sum": 600,
                        "sum_squares": 140000, "mean": 200, "median": 200,
                        "mean_90": 150, "upper_90": 200,
                        "histogram": {"bin_100": 0, "bin_inf": 3}
                    }
                },
                "statsd_metrics": {"processing_time": 4}
            }"#,
        )
        .expect("failed to parse snapshot");

        assert_eq!(snapshot.metric_count(), 4);
        assert_eq!(snapshot.sets.as_ref().unwrap()["users"].size(), 2);
        let timer = &snapshot.timer_data.as_ref().unwrap()["req"];
        assert_eq!(timer.sum_squares, Some(140000.0));
        assert_eq!(timer.percentiles["mean_90"], 150.0);
        assert_eq!(timer.histogram.as_ref().unwrap()["bin_inf"], 3.0);
        assert_eq!(snapshot.statsd_metrics.unwrap()["processing_time"], 4.0);
    }

    #[test]
    fn test_missing_categories_are_none() {
        let snapshot: AggregateSnapshot = serde_json::from_str("{}").unwrap();
        assert!(snapshot.counters.is_none());
        assert!(snapshot.timer_data.is_none());
        assert_eq!(snapshot.metric_count(), 0);
    }

    #[test]
    fn test_timer_fields_flatten_histogram() {
        let timer = TimerData {
            mean: Some(200.0),
            histogram: Some(BTreeMap::from([
                ("bin_100".to_string(), 1.0),
                ("bin_inf".to_string(), 2.0),
            ])),
            ..Default::default()
        };
        let fields = timer.fields();

        assert_eq!(fields.len(), 5);
        assert!(fields.contains(&("mean".to_string(), 200.0)));
        assert!(fields.contains(&("histogram.bin_100".to_string(), 1.0)));
        assert!(fields.contains(&("histogram.bin_inf".to_string(), 2.0)));
        assert!(!fields.iter().any(|(k, _)| k == "histogram"));
    }

    #[test]
    fn test_idle_timer_reports_only_counts() {
        let snapshot: AggregateSnapshot =
            serde_json::from_str(r#"{"timer_data":{"idle":{"count":0,"count_ps":0}}}"#)
                .expect("failed to parse snapshot");
        let fields = snapshot.timer_data.unwrap()["idle"].fields();

        assert_eq!(
            fields,
            vec![("count".to_string(), 0.0), ("count_ps".to_string(), 0.0)]
        );
    }

    #[test]
    fn test_set_size_counts_distinct_values() {
        let set: MetricSet = ["a", "b", "b", "c"].into_iter().collect();
        assert_eq!(set.size(), 3);
    }
}
