// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use clap::Parser;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::{env, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use log_pipeline::{
    config::Config,
    health::{HealthChecker, HealthServer},
    logger,
    loki::LokiClient,
    processor::Processor,
    resilience::ResiliencePolicy,
    schema::SCHEMA,
    stats::{self, PipelineStats},
    time_window::TimeWindow,
    victoria::VictoriaClient,
};

const STATS_REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(
    name = "log-pipeline-agent",
    version,
    about = "Ships Loki audit logs to VictoriaMetrics"
)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, env = "LOG_PIPELINE_CONFIG", default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = env::var("LOG_PIPELINE_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let env_filter = format!("h2=off,hyper=off,reqwest=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_ansi(false)
        .event_format(logger::Formatter)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    debug!("Record schema: {}", SCHEMA.to_json());
    if config.victoria.schema != SCHEMA.name {
        warn!(
            "Configured schema {} differs from the built-in {} v{} layout",
            config.victoria.schema, SCHEMA.name, SCHEMA.version
        );
    }

    let health_checker = HealthChecker::new();
    if let Err(e) = health_checker.check_loki(&config.loki.url).await {
        error!("Loki health check failed: {e}");
        return ExitCode::FAILURE;
    }
    if let Err(e) = health_checker.check_victoria(&config.victoria.url).await {
        error!("Victoria health check failed: {e}");
        return ExitCode::FAILURE;
    }
    info!("Services health check passed");

    let cancel = CancellationToken::new();

    let loki = LokiClient::new(
        config.loki.url.clone(),
        ResiliencePolicy::from_config("loki-client", &config.resilience.loki)
            .with_cancellation(cancel.child_token()),
    );
    let victoria = VictoriaClient::new(
        config.victoria.url.clone(),
        config.victoria.schema.clone(),
        ResiliencePolicy::from_config("victoria-client", &config.resilience.victoria)
            .with_cancellation(cancel.child_token()),
    );
    let pipeline_stats = Arc::new(PipelineStats::new());
    let processor = Processor::new(
        Arc::new(loki),
        Arc::new(victoria),
        Arc::clone(&pipeline_stats),
    )
    .with_delivery_concurrency(config.delivery_concurrency());

    let health_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.health_port));
    match TcpListener::bind(health_addr).await {
        Ok(listener) => {
            let server = HealthServer::new(
                health_checker,
                config.loki.url.clone(),
                config.victoria.url.clone(),
            );
            let server_cancel = cancel.child_token();
            tokio::spawn(async move {
                if let Err(e) = server.serve(listener, server_cancel).await {
                    error!("Health check server error: {e}");
                }
            });
        }
        Err(e) => error!("Unable to bind health check server on {health_addr}: {e}"),
    }

    tokio::spawn(stats::report_periodically(
        Arc::clone(&pipeline_stats),
        STATS_REPORT_INTERVAL,
        cancel.child_token(),
    ));

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received");
        signal_cancel.cancel();
    });

    info!("Starting log pipeline with query: {}", config.loki.query);
    info!(
        "Time window: {:?}, Interval: {:?}",
        config.time_window, config.loki.interval
    );

    loop {
        let window = TimeWindow::ending_now(config.time_window);
        debug!("Processing logs from {:?} to {:?}", window.start, window.end);

        tokio::select! {
            () = cancel.cancelled() => break,
            result = processor.process_logs(&config.loki.query, window.start, window.end) => {
                if let Err(e) = result {
                    error!("Error processing logs: {e}");
                }
            }
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(config.loki.interval) => {}
        }
    }

    info!("Final stats - {}", pipeline_stats.snapshot());
    ExitCode::SUCCESS
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("Unable to listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
