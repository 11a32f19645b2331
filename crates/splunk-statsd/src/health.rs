// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Forwarder health statistics, reported alongside every payload.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Operational statistics of the forwarder. Values always describe the last
/// completed flush; they are never reset after init.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthStats {
    pub last_flush_timestamp: i64,
    pub last_exception_timestamp: i64,
    pub last_flush_duration_ms: u64,
    pub last_payload_length: usize,
    pub last_processed_count: usize,
    pub last_calculation_duration_ms: u64,
}

impl HealthStats {
    pub fn new(startup_time: i64) -> Self {
        Self {
            last_flush_timestamp: startup_time,
            last_exception_timestamp: startup_time,
            ..Default::default()
        }
    }

    /// Fields under the names the collector dashboards expect
    pub fn fields(&self) -> Vec<(String, f64)> {
        let HealthStats {
            last_flush_timestamp,
            last_exception_timestamp,
            last_flush_duration_ms,
            last_payload_length,
            last_processed_count,
            last_calculation_duration_ms,
        } = *self;

        vec![
            ("last_flush".to_string(), last_flush_timestamp as f64),
            ("last_exception".to_string(), last_exception_timestamp as f64),
            ("flush_time".to_string(), last_flush_duration_ms as f64),
            ("flush_length".to_string(), last_payload_length as f64),
            ("numStats".to_string(), last_processed_count as f64),
            (
                "calculationTime".to_string(),
                last_calculation_duration_ms as f64,
            ),
        ]
    }
}

/// Health stats shared between the flush path and in-flight sends. Writers do
/// not coordinate: the last write wins.
#[derive(Debug, Clone)]
pub struct SharedHealth(Arc<Mutex<HealthStats>>);

impl SharedHealth {
    pub fn new(startup_time: i64) -> Self {
        Self(Arc::new(Mutex::new(HealthStats::new(startup_time))))
    }

    fn lock(&self) -> MutexGuard<'_, HealthStats> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> HealthStats {
        *self.lock()
    }

    pub fn record_calculation(&self, processed: usize, duration_ms: u64) {
        let mut stats = self.lock();
        stats.last_processed_count = processed;
        stats.last_calculation_duration_ms = duration_ms;
    }

    pub fn record_flush(&self, duration_ms: u64, payload_length: usize, timestamp: i64) {
        let mut stats = self.lock();
        stats.last_flush_duration_ms = duration_ms;
        stats.last_payload_length = payload_length;
        stats.last_flush_timestamp = timestamp;
    }

    pub fn record_exception(&self, timestamp: i64) {
        self.lock().last_exception_timestamp = timestamp;
    }
}

/// Current wall-clock time in whole seconds since the Unix epoch
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
