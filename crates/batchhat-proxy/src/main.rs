// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod config;
mod ez_endpoint;

use std::{env, io, net::SocketAddr, time::Duration};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use batchhat::{
    batcher_service::{BatcherConfig, BatcherHandle, BatcherService},
    constants::{DEFAULT_SEND_ATTEMPTS, MAX_IN_FLIGHT_FLUSHES, QUEUE_CAPACITY},
    flusher::{Flusher, FlusherConfig},
    stathat::{EzApi, RetryStrategy},
};
use hyper::service::service_fn;

#[tokio::main]
pub async fn main() {
    let log_level = env::var("BATCHHAT_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("could not parse log level in configuration: {e}");
            return;
        }
    };

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return;
    }

    debug!("Logging subsystem enabled");

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error creating config on batchhat proxy startup: {e}");
            return;
        }
    };

    let (batcher_task, batcher) = match start_batcher(&config) {
        Ok(started) => started,
        Err(e) => {
            error!("Failed to start batcher: {e}");
            return;
        }
    };

    if config.account_key.is_empty() {
        info!("BATCHHAT_EZKEY not set, requests must carry an ezkey");
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("ListenAndServe: {e}");
            batcher.stop();
            return;
        }
    };
    info!("batchhat-proxy: listening on port {}", config.port);

    tokio::select! {
        result = serve_tcp(listener, batcher.clone()) => {
            if let Err(e) = result {
                error!("Server error: {e}");
            }
        }
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {e}");
            }
            info!("Shutting down");
        }
    }

    batcher.stop();
    if let Err(e) = batcher_task.await {
        error!("Batcher task failed: {e}");
    }

    let flushes = batcher.flush_tracker();
    flushes.close();
    let grace = drain_timeout(config.timeout);
    if tokio::time::timeout(grace, flushes.wait()).await.is_err() {
        warn!(
            "Gave up on {} in-flight flushes after {:?}",
            flushes.len(),
            grace
        );
    }
}

/// Long enough for every attempt of one in-flight send to run into its timeout.
fn drain_timeout(request_timeout: Duration) -> Duration {
    request_timeout.saturating_mul(u32::try_from(DEFAULT_SEND_ATTEMPTS).unwrap_or(u32::MAX))
}

fn start_batcher(
    config: &config::Config,
) -> Result<(JoinHandle<()>, BatcherHandle), batchhat::errors::Creation> {
    let api = EzApi::new(
        config.api_url.clone(),
        config.https_proxy.clone(),
        config.timeout,
        RetryStrategy::default(),
    )?;
    let flusher = Flusher::new(FlusherConfig {
        api,
        max_in_flight: MAX_IN_FLIGHT_FLUSHES,
    });
    let (service, handle) = BatcherService::new(
        BatcherConfig {
            account_key: config.account_key.clone(),
            flush_interval: config.flush_interval,
            queue_capacity: QUEUE_CAPACITY,
        },
        flusher,
    )?;

    Ok((tokio::spawn(service.run()), handle))
}

async fn serve_tcp(listener: TcpListener, batcher: BatcherHandle) -> io::Result<()> {
    let server = hyper::server::conn::http1::Builder::new();
    let mut joinset = tokio::task::JoinSet::new();

    loop {
        let conn = tokio::select! {
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
                Err(e) => return Err(e),
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                Err(e) if e.is_panic() => {
                    error!("Connection handler panicked: {:?}", e);
                    continue;
                },
                Ok(()) | Err(_) => continue,
            },
        };

        let conn = hyper_util::rt::TokioIo::new(conn);
        let server = server.clone();
        let batcher = batcher.clone();
        let service = service_fn(move |req| ez_endpoint::endpoint_handler(req, batcher.clone()));
        joinset.spawn(async move {
            if let Err(e) = server.serve_connection(conn, service).await {
                error!("Connection error: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_covers_every_send_attempt() {
        assert_eq!(drain_timeout(Duration::from_secs(5)), Duration::from_secs(10));
        assert_eq!(drain_timeout(Duration::MAX), Duration::MAX);
    }
}
