// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Liveness probes against Loki and Victoria, and the `/health` endpoint that
//! exposes them.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::HealthError;
use crate::http_utils::{endpoint, get_client, json_response};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const LOKI_READY_PATH: &str = "/ready";
const VICTORIA_HEALTH_PATH: &str = "/health";
pub const HEALTH_ENDPOINT_PATH: &str = "/health";

#[derive(Debug, Clone)]
pub struct HealthChecker {
    client: reqwest::Client,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            client: get_client(PROBE_TIMEOUT),
        }
    }

    pub async fn check_loki(&self, base_url: &str) -> Result<(), HealthError> {
        self.probe("loki", &endpoint(base_url, LOKI_READY_PATH))
            .await
    }

    pub async fn check_victoria(&self, base_url: &str) -> Result<(), HealthError> {
        self.probe("victoria", &endpoint(base_url, VICTORIA_HEALTH_PATH))
            .await
    }

    async fn probe(&self, service: &'static str, url: &str) -> Result<(), HealthError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| HealthError::Request { service, source })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(HealthError::Status { service, status }),
        }
    }
}

/// Serves `GET /health`, answering 200 when both remotes are reachable and
/// 503 otherwise. Every request probes the remotes afresh.
#[derive(Debug, Clone)]
pub struct HealthServer {
    checker: HealthChecker,
    loki_url: String,
    victoria_url: String,
}

impl HealthServer {
    pub fn new(
        checker: HealthChecker,
        loki_url: impl Into<String>,
        victoria_url: impl Into<String>,
    ) -> Self {
        Self {
            checker,
            loki_url: loki_url.into(),
            victoria_url: victoria_url.into(),
        }
    }

    /// Accepts connections on `listener` until `cancel` fires.
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("HEALTH | Listening on {addr}");
        }

        let state = Arc::new(self);
        let service = service_fn(move |req: Request<Incoming>| {
            let state = Arc::clone(&state);
            async move { state.handle(req.method(), req.uri().path()).await }
        });

        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                () = cancel.cancelled() => {
                    debug!("HEALTH | Shutting down");
                    joinset.abort_all();
                    return Ok(());
                }
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("HEALTH | Server error: {e}");
                        return Err(e);
                    }
                    Ok((conn, _)) => conn,
                },
                Some(finished) = joinset.join_next() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!("HEALTH | Connection handler panicked: {:?}", e);
                        }
                    }
                    continue;
                }
            };

            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    debug!("HEALTH | Connection error: {e}");
                }
            });
        }
    }

    async fn handle(&self, method: &Method, path: &str) -> http::Result<Response<Full<Bytes>>> {
        match (method, path) {
            (&Method::GET, HEALTH_ENDPOINT_PATH) => {
                if let Err(e) = self.checker.check_loki(&self.loki_url).await {
                    return json_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        &format!("Loki health check failed: {e}"),
                    );
                }
                if let Err(e) = self.checker.check_victoria(&self.victoria_url).await {
                    return json_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        &format!("Victoria health check failed: {e}"),
                    );
                }
                json_response(StatusCode::OK, "OK")
            }
            (_, HEALTH_ENDPOINT_PATH) => json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                &format!("Method {method} not allowed on {path}"),
            ),
            _ => json_response(StatusCode::NOT_FOUND, &format!("No handler for {path}")),
        }
    }
}
