// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of payloads to the Splunk HTTP Event Collector.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use tracing::debug;

use crate::config::SplunkConfig;
use crate::errors::ShippingError;

/// A fully described POST to the collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HecRequest {
    pub url: String,
    /// Value of the `Authorization` header, `Splunk <token>`
    pub authorization: String,
    pub body: String,
    /// Whether the collector's TLS certificate must be valid
    pub verify_tls: bool,
}

impl HecRequest {
    pub fn new(config: &SplunkConfig, body: String) -> Self {
        Self {
            url: config.endpoint_url(),
            authorization: config.authorization(),
            body,
            verify_tls: config.verify_tls,
        }
    }
}

#[async_trait]
pub trait HecSink: Send + Sync {
    /// Sends one request. Any transport failure or non-success status is an
    /// error; there is no retry.
    async fn send(&self, request: HecRequest) -> Result<(), ShippingError>;
}

/// Sink backed by reqwest. Certificate verification is a client setting, so
/// one client is kept for each mode.
#[derive(Debug, Clone)]
pub struct ReqwestSink {
    verifying: Client,
    permissive: Client,
}

impl ReqwestSink {
    pub fn new() -> Result<Self, reqwest::Error> {
        Ok(Self {
            verifying: create_client_builder().build()?,
            permissive: create_client_builder()
                .danger_accept_invalid_certs(true)
                .build()?,
        })
    }

    fn client(&self, verify_tls: bool) -> &Client {
        if verify_tls {
            &self.verifying
        } else {
            &self.permissive
        }
    }
}

fn create_client_builder() -> reqwest::ClientBuilder {
    Client::builder().use_rustls_tls()
}

#[async_trait]
impl HecSink for ReqwestSink {
    async fn send(&self, request: HecRequest) -> Result<(), ShippingError> {
        let body_len = request.body.len();
        let resp = self
            .client(request.verify_tls)
            .post(&request.url)
            .header(AUTHORIZATION, &request.authorization)
            .header(CONTENT_TYPE, "application/json")
            .body(request.body)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    ShippingError::Request(e.to_string())
                } else {
                    ShippingError::Destination(e.status(), e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            debug!("Sent {body_len} bytes to {}: {status}", request.url);
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(ShippingError::Destination(Some(status), body))
        }
    }
}
