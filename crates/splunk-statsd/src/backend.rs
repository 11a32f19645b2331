// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Backend entry point: resolves the configuration once and handles the flush
//! signals emitted by the aggregator.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::{ConfigBundle, SplunkConfig};
use crate::errors::BackendError;
use crate::flusher::{Flusher, FlusherConfig};
use crate::health::SharedHealth;
use crate::hec::{HecSink, ReqwestSink};
use crate::snapshot::AggregateSnapshot;

/// One flush tick: the aggregation timestamp (seconds) and the aggregates
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct FlushSignal {
    pub timestamp: i64,
    #[serde(rename = "metrics")]
    pub snapshot: AggregateSnapshot,
}

/// Signal source handed to the aggregator. Cheap to clone.
#[derive(Clone)]
pub struct BackendHandle {
    tx: mpsc::UnboundedSender<FlushSignal>,
    cancel_token: CancellationToken,
    health: SharedHealth,
}

impl BackendHandle {
    pub fn flush(
        &self,
        timestamp: i64,
        snapshot: AggregateSnapshot,
    ) -> Result<(), mpsc::error::SendError<FlushSignal>> {
        self.tx.send(FlushSignal {
            timestamp,
            snapshot,
        })
    }

    pub fn health(&self) -> &SharedHealth {
        &self.health
    }

    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

pub struct SplunkBackend {
    flusher: Flusher,
    rx: mpsc::UnboundedReceiver<FlushSignal>,
    cancel_token: CancellationToken,
}

impl SplunkBackend {
    /// Resolves the configuration and registers the flush handler. The
    /// configuration is frozen from here on.
    pub fn init(
        startup_time: i64,
        bundle: &ConfigBundle,
        sink: Arc<dyn HecSink>,
    ) -> Result<(Self, BackendHandle), BackendError> {
        let config = SplunkConfig::resolve(bundle);

        if config.auth_token.is_none() {
            warn!("splunkToken is not set, the collector will reject every flush");
        }
        if config.has_conflicting_sourcetype() {
            warn!(
                "sourcetype 'statsd' is not supported together with useMetrics, \
                 the collector will misinterpret the metric events"
            );
        }

        let health = SharedHealth::new(startup_time);
        let flusher = Flusher::new(FlusherConfig {
            config: Arc::new(config),
            health: health.clone(),
            sink,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();

        let service = Self {
            flusher,
            rx,
            cancel_token: cancel_token.clone(),
        };
        let handle = BackendHandle {
            tx,
            cancel_token,
            health,
        };

        Ok((service, handle))
    }

    /// Same as [`SplunkBackend::init`], shipping through reqwest
    pub fn init_with_default_sink(
        startup_time: i64,
        bundle: &ConfigBundle,
    ) -> Result<(Self, BackendHandle), BackendError> {
        let sink = ReqwestSink::new()?;
        Self::init(startup_time, bundle, Arc::new(sink))
    }

    pub fn config(&self) -> &SplunkConfig {
        self.flusher.config()
    }

    /// Handles flush signals until every handle is dropped or shutdown is
    /// requested, then waits for the sends still in flight.
    pub async fn run(mut self) {
        debug!("Splunk backend started");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                signal = self.rx.recv() => match signal {
                    Some(FlushSignal { timestamp, snapshot }) => {
                        // sends are never awaited here
                        match self.flusher.prepare(timestamp, &snapshot) {
                            Ok(send) => {
                                in_flight.spawn(send);
                            }
                            Err(e) => error!("Failed to flush metrics: {e}"),
                        }
                    }
                    None => break,
                },
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = result {
                        error!("Send task failed: {e}");
                    }
                }
                _ = self.cancel_token.cancelled() => break,
            }
        }

        if !in_flight.is_empty() {
            debug!("Waiting for {} in-flight sends", in_flight.len());
        }
        while let Some(result) = in_flight.join_next().await {
            if let Err(e) = result {
                error!("Send task failed: {e}");
            }
        }

        debug!("Splunk backend stopped");
    }
}
