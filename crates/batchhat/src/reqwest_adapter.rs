// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::ClientBuilder;
use std::time::Duration;

/// Creates a reqwest client builder with rustls TLS and a bounded request timeout.
pub fn create_reqwest_client_builder(timeout: Duration) -> ClientBuilder {
    reqwest::Client::builder().use_rustls_tls().timeout(timeout)
}
