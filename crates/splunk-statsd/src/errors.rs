// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the Splunk StatsD backend

use reqwest::StatusCode;

/// Errors raised while loading a configuration bundle
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration bundle: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised while initialising the backend
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Errors raised while turning a snapshot into a payload
#[derive(Debug, thiserror::Error)]
pub enum FlushError {
    #[error("Failed to serialize events: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Errors raised by the delivery sink
#[derive(Debug, thiserror::Error)]
pub enum ShippingError {
    #[error("Failed to build request: {0}")]
    Request(String),

    #[error("Error shipping data: {0:?} {1}")]
    Destination(Option<StatusCode>, String),
}
