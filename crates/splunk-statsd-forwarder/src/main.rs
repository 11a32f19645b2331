// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::env;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use splunk_statsd::{
    backend::{FlushSignal, SplunkBackend},
    config::ConfigBundle,
    health::unix_now,
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("SPLUNK_STATSD_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config_path = match env::var("SPLUNK_STATSD_CONFIG") {
        Ok(path) => path,
        Err(_) => {
            error!("SPLUNK_STATSD_CONFIG not set, shutting down");
            return;
        }
    };

    let bundle = match ConfigBundle::from_file(&config_path) {
        Ok(bundle) => bundle,
        Err(e) => {
            error!("Error loading configuration: {e}");
            return;
        }
    };

    let (service, handle) = match SplunkBackend::init_with_default_sink(unix_now(), &bundle) {
        Ok(backend) => backend,
        Err(e) => {
            error!("Error initializing splunk backend: {e}");
            return;
        }
    };
    info!(
        "forwarding flushes to {}",
        service.config().endpoint_url()
    );
    let service_task = tokio::spawn(service.run());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match serde_json::from_str::<FlushSignal>(&line) {
                Ok(FlushSignal {
                    timestamp,
                    snapshot,
                }) => {
                    if let Err(e) = handle.flush(timestamp, snapshot) {
                        error!("Failed to hand flush to the backend: {e}");
                        break;
                    }
                }
                Err(e) => warn!("Skipping malformed flush signal: {e}"),
            },
            Ok(None) => break,
            Err(e) => {
                error!("Error reading flush signals: {e}");
                break;
            }
        }
    }

    debug!("Input closed, stopping backend after pending sends");
    drop(handle);
    if let Err(e) = service_task.await {
        error!("Splunk backend task failed: {e}");
    }
}
