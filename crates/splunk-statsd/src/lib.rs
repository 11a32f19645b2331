// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! StatsD backend that ships every flush to a Splunk HTTP Event Collector.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod backend;
pub mod config;
pub mod encoder;
pub mod errors;
pub mod flusher;
pub mod health;
pub mod hec;
pub mod snapshot;
