// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::SplunkConfig;
use crate::encoder::{self, HEALTH_STATS_NAME, SELF_METRICS_NAME};
use crate::errors::FlushError;
use crate::health::{unix_now, SharedHealth};
use crate::hec::{HecRequest, HecSink};
use crate::snapshot::AggregateSnapshot;

/// Turns aggregate snapshots into collector payloads and ships them
#[derive(Clone)]
pub struct Flusher {
    config: Arc<SplunkConfig>,
    health: SharedHealth,
    sink: Arc<dyn HecSink>,
}

pub struct FlusherConfig {
    pub config: Arc<SplunkConfig>,
    pub health: SharedHealth,
    pub sink: Arc<dyn HecSink>,
}

impl Flusher {
    pub fn new(config: FlusherConfig) -> Self {
        Flusher {
            config: config.config,
            health: config.health,
            sink: config.sink,
        }
    }

    pub fn config(&self) -> &SplunkConfig {
        &self.config
    }

    pub fn health(&self) -> &SharedHealth {
        &self.health
    }

    /// Encodes the snapshot and starts sending it.
    ///
    /// The send runs on its own task and is not awaited; its outcome only
    /// shows up in the health stats. The returned handle resolves once the
    /// send has finished.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime, the send is started with
    /// [`tokio::spawn`]. Use [`Flusher::prepare`] to spawn it elsewhere.
    pub fn flush(
        &self,
        timestamp: i64,
        snapshot: &AggregateSnapshot,
    ) -> Result<JoinHandle<()>, FlushError> {
        let send = self.prepare(timestamp, snapshot)?;
        Ok(tokio::spawn(send))
    }

    /// Encodes the snapshot, updates the health stats and returns the send
    /// without starting it. Does not need a runtime.
    pub fn prepare(
        &self,
        timestamp: i64,
        snapshot: &AggregateSnapshot,
    ) -> Result<impl Future<Output = ()> + Send + 'static, FlushError> {
        let start = Instant::now();
        let mut events = encoder::for_config(&self.config);

        if let Some(counters) = &snapshot.counters {
            events.add_counters(counters, snapshot.counter_rates.as_ref(), timestamp);
        }
        if let Some(timers) = &snapshot.timer_data {
            events.add_timers(timers, timestamp);
        }
        if let Some(gauges) = &snapshot.gauges {
            events.add_gauges(gauges, timestamp);
        }
        if let Some(sets) = &snapshot.sets {
            events.add_sets(sets, timestamp);
        }
        if let Some(statsd_metrics) = &snapshot.statsd_metrics {
            let stats = statsd_metrics.iter().map(|(k, v)| (k.clone(), *v)).collect();
            events.add_self_stats(SELF_METRICS_NAME, stats, timestamp);
        }

        let processed = snapshot.metric_count();
        self.health
            .record_calculation(processed, elapsed_ms(start));

        events.add_self_stats(
            HEALTH_STATS_NAME,
            self.health.snapshot().fields(),
            unix_now(),
        );
        let payload = events.serialize()?;
        let payload_length = payload.len();

        debug!("Flushing {processed} metrics in {payload_length} bytes");

        let request = HecRequest::new(&self.config, payload);
        let send = ship(Arc::clone(&self.sink), self.health.clone(), request);

        self.health
            .record_flush(elapsed_ms(start), payload_length, unix_now());

        Ok(send)
    }
}

async fn ship(sink: Arc<dyn HecSink>, health: SharedHealth, request: HecRequest) {
    let url = request.url.clone();
    match sink.send(request).await {
        Ok(()) => debug!("Successfully flushed metrics to {url}"),
        Err(e) => {
            health.record_exception(unix_now());
            error!("Failed to flush metrics to {url}: {e}");
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use proptest::prelude::*;

    use super::*;
    use crate::config::ConfigBundle;
    use crate::encoder::parse_payload;
    use crate::errors::ShippingError;
    use crate::snapshot::{MetricSet, TimerData};

    const STARTUP: i64 = 1_000;

    #[derive(Default)]
    struct RecordingSink {
        requests: Mutex<Vec<HecRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl HecSink for RecordingSink {
        async fn send(&self, request: HecRequest) -> Result<(), ShippingError> {
            self.requests.lock().unwrap().push(request);
            if self.fail {
                Err(ShippingError::Destination(None, "connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    fn flusher(json: &str, sink: Arc<RecordingSink>) -> Flusher {
        let bundle = ConfigBundle::from_json(json).expect("failed to parse bundle");
        Flusher::new(FlusherConfig {
            config: Arc::new(SplunkConfig::resolve(&bundle)),
            health: SharedHealth::new(STARTUP),
            sink,
        })
    }

    fn map(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn last_request(sink: &RecordingSink) -> HecRequest {
        sink.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no request sent")
    }

    #[tokio::test]
    async fn test_empty_flush_sends_health_stats() {
        let sink = Arc::new(RecordingSink::default());
        let flusher = flusher(r#"{"splunk":{"splunkToken":"T"}}"#, sink.clone());

        flusher
            .flush(STARTUP + 10, &AggregateSnapshot::default())
            .expect("flush failed")
            .await
            .expect("send task failed");

        let request = last_request(&sink);
        assert_eq!(
            request.url,
            "https://127.0.0.1:8088/services/collector/event"
        );
        assert_eq!(request.authorization, "Splunk T");
        assert!(request.verify_tls);

        let events = parse_payload(&request.body);
        assert_eq!(events.len(), 1);
        let event = &events[0]["event"];
        assert_eq!(event["metricType"], "statsd");
        assert_eq!(event["metricName"], "splunkStats");
        assert_eq!(event["last_flush"].as_f64(), Some(STARTUP as f64));
        assert_eq!(event["flush_length"].as_f64(), Some(0.0));
        assert_eq!(event["numStats"].as_f64(), Some(0.0));
    }

    #[tokio::test]
    async fn test_categories_are_encoded_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let flusher = flusher("{}", sink.clone());
        let snapshot = AggregateSnapshot {
            counters: Some(map(&[("c", 1.0)])),
            counter_rates: Some(map(&[("c", 0.1)])),
            gauges: Some(map(&[("g", 2.0)])),
            sets: Some(BTreeMap::from([("s".to_string(), MetricSet::new())])),
            timer_data: Some(BTreeMap::from([("t".to_string(), TimerData::default())])),
            statsd_metrics: Some(map(&[("processing_time", 3.0)])),
        };

        flusher
            .flush(STARTUP, &snapshot)
            .expect("flush failed")
            .await
            .expect("send task failed");

        let events = parse_payload(&last_request(&sink).body);
        let order: Vec<(String, String)> = events
            .iter()
            .map(|e| {
                (
                    e["event"]["metricType"].as_str().unwrap().to_string(),
                    e["event"]["metricName"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        assert_eq!(
            order,
            [
                ("counter".to_string(), "c".to_string()),
                ("timer".to_string(), "t".to_string()),
                ("gauge".to_string(), "g".to_string()),
                ("set".to_string(), "s".to_string()),
                ("statsd".to_string(), "statsd".to_string()),
                ("statsd".to_string(), "splunkStats".to_string()),
            ]
        );
        let health = &events[5]["event"];
        assert_eq!(health["numStats"].as_f64(), Some(4.0));
    }

    #[tokio::test]
    async fn test_counters_without_rates() {
        let sink = Arc::new(RecordingSink::default());
        let flusher = flusher("{}", sink.clone());
        let snapshot = AggregateSnapshot {
            counters: Some(map(&[("foo", 7.0)])),
            counter_rates: None,
            ..Default::default()
        };

        flusher
            .flush(STARTUP, &snapshot)
            .expect("flush failed")
            .await
            .expect("send task failed");

        let events = parse_payload(&last_request(&sink).body);
        assert_eq!(events[0]["event"]["metricName"], "foo");
        assert_eq!(events[0]["event"]["count"].as_f64(), Some(7.0));
        assert!(events[0]["event"].get("rate").is_none());
    }

    #[tokio::test]
    async fn test_consolidated_counters() {
        let sink = Arc::new(RecordingSink::default());
        let flusher = flusher(
            r#"{"splunk":{"splunkToken":"T","useMetrics":true}}"#,
            sink.clone(),
        );
        let snapshot = AggregateSnapshot {
            counters: Some(map(&[("foo", 100.0)])),
            counter_rates: Some(map(&[("foo", 10.0)])),
            ..Default::default()
        };

        flusher
            .flush(STARTUP, &snapshot)
            .expect("flush failed")
            .await
            .expect("send task failed");

        let request = last_request(&sink);
        assert_eq!(request.url, "https://127.0.0.1:8088/services/collector");
        let events = parse_payload(&request.body);
        let counters = events
            .iter()
            .find(|e| e["fields"]["metric_type"] == "counter")
            .expect("missing counter event");
        assert_eq!(counters["fields"]["metric_name:foo.rate"].as_f64(), Some(10.0));
        assert_eq!(counters["fields"]["metric_name:foo.count"].as_f64(), Some(100.0));
        let stats = events
            .iter()
            .find(|e| e["fields"]["metric_type"] == "statsd")
            .expect("missing stats event");
        assert!(stats["fields"]
            .get("metric_name:statsd.splunkStats.flush_time")
            .is_some());
    }

    #[tokio::test]
    async fn test_health_reflects_previous_flush() {
        let sink = Arc::new(RecordingSink::default());
        let flusher = flusher("{}", sink.clone());
        let snapshot = AggregateSnapshot {
            gauges: Some(map(&[("g", 1.0)])),
            ..Default::default()
        };

        flusher
            .flush(STARTUP, &snapshot)
            .expect("flush failed")
            .await
            .expect("send task failed");
        let first = last_request(&sink).body.len();
        let after_first = flusher.health().snapshot();
        assert_eq!(after_first.last_payload_length, first);
        assert_eq!(after_first.last_processed_count, 1);
        assert!(after_first.last_flush_timestamp >= STARTUP);
        assert_eq!(after_first.last_exception_timestamp, STARTUP);

        flusher
            .flush(STARTUP, &AggregateSnapshot::default())
            .expect("flush failed")
            .await
            .expect("send task failed");
        let events = parse_payload(&last_request(&sink).body);
        assert_eq!(events[0]["event"]["flush_length"].as_f64(), Some(first as f64));
        assert_eq!(events[0]["event"]["numStats"].as_f64(), Some(0.0));
    }

    #[tokio::test]
    async fn test_failed_send_records_exception() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let flusher = flusher("{}", sink.clone());

        flusher
            .flush(STARTUP, &AggregateSnapshot::default())
            .expect("flush failed")
            .await
            .expect("send task failed");

        let stats = flusher.health().snapshot();
        assert!(stats.last_exception_timestamp > STARTUP);
        assert!(stats.last_flush_timestamp > STARTUP);
    }

    #[test]
    fn test_prepare_outside_runtime() {
        let sink = Arc::new(RecordingSink::default());
        let flusher = flusher("{}", sink.clone());

        let send = flusher
            .prepare(STARTUP, &AggregateSnapshot::default())
            .expect("prepare failed");
        assert!(flusher.health().snapshot().last_payload_length > 0);
        assert!(sink.requests.lock().unwrap().is_empty());

        tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("failed to build runtime")
            .block_on(send);
        assert_eq!(sink.requests.lock().unwrap().len(), 1);
    }

    #[test]
    #[should_panic]
    fn test_flush_outside_runtime_panics() {
        let flusher = flusher("{}", Arc::new(RecordingSink::default()));
        let _ = flusher.flush(STARTUP, &AggregateSnapshot::default());
    }

    fn counters_strategy() -> impl Strategy<Value = BTreeMap<String, (f64, f64)>> {
        let value = |range: std::ops::Range<i64>| range.prop_map(|v| v as f64 / 4.0);
        prop::collection::btree_map(
            "[a-z]{1,8}",
            (value(-4_000_000..4_000_000), value(0..400_000)),
            0..16,
        )
    }

    proptest! {
        #[test]
        fn prop_one_rate_per_counter(counters in counters_strategy(), include_counts in any::<bool>()) {
            let json = format!(r#"{{"flush_counts":{include_counts}}}"#);
            let bundle = ConfigBundle::from_json(&json).unwrap();
            let config = SplunkConfig::resolve(&bundle);
            let mut encoder = encoder::for_config(&config);
            let counts = counters.iter().map(|(k, (c, _))| (k.clone(), *c)).collect();
            let rates = counters.iter().map(|(k, (_, r))| (k.clone(), *r)).collect();
            encoder.add_counters(&counts, Some(&rates), STARTUP);

            let events = parse_payload(&encoder.serialize().unwrap());
            prop_assert_eq!(events.len(), counters.len());
            for event in &events {
                let name = event["event"]["metricName"].as_str().unwrap();
                let (count, rate) = counters[name];
                prop_assert_eq!(event["event"]["rate"].as_f64(), Some(rate));
                if include_counts {
                    prop_assert_eq!(event["event"]["count"].as_f64(), Some(count));
                } else {
                    prop_assert!(event["event"].get("count").is_none());
                }
            }
        }

        #[test]
        fn prop_set_count_is_cardinality(values in prop::collection::vec("[a-c]{1,2}", 0..32)) {
            let config = SplunkConfig::default();
            let mut encoder = encoder::for_config(&config);
            let set: MetricSet = values.iter().cloned().collect();
            let distinct = values.iter().collect::<std::collections::HashSet<_>>().len();
            encoder.add_sets(&BTreeMap::from([("s".to_string(), set)]), STARTUP);

            let events = parse_payload(&encoder.serialize().unwrap());
            prop_assert_eq!(events[0]["event"]["count"].as_f64(), Some(distinct as f64));
        }
    }
}
