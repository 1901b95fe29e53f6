// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use core::time::Duration;
use http_body_util::Full;
use hyper::{header, http, Response, StatusCode};
use serde_json::json;
use tracing::{debug, error};

/// Builds the client shared by every request a remote client makes.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
}

/// Like [`build_client`], falling back to reqwest defaults when the TLS
/// backend cannot be initialised.
#[must_use]
pub fn get_client(timeout: Duration) -> reqwest::Client {
    match build_client(timeout) {
        Ok(client) => client,
        Err(e) => {
            error!(
                "Unable to build HTTP client with a {:?} timeout: {}, using reqwest defaults",
                timeout, e
            );
            reqwest::Client::new()
        }
    }
}

/// Joins a base URL from configuration with an API path, tolerating a
/// trailing slash on the base.
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Health endpoint reply: `{"message": ...}` as JSON with `status`.
/// Non-2xx replies are logged as errors.
pub fn json_response(status: StatusCode, message: &str) -> http::Result<Response<Full<Bytes>>> {
    match status.as_u16() {
        200..=299 => debug!("HEALTH | {status} {message}"),
        _ => error!("HEALTH | {status} {message}"),
    }
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::from(json!({ "message": message }).to_string()))
}
