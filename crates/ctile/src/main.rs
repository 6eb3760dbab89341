// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Entrypoint for the ctile binary.

use anyhow::Context;
use aws_config::BehaviorVersion;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use ctile::{Config, Metrics, S3Store, TileCache};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    config.validate()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let metrics = Arc::new(Metrics::new());
    tokio::spawn(serve_metrics(config.metrics_address, Arc::clone(&metrics)));

    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let store = Arc::new(S3Store::new(
        aws_sdk_s3::Client::new(&aws_config),
        config.s3_bucket.clone(),
    ));

    let cache = Arc::new(TileCache::new(
        &config.log_url,
        config.tile_size,
        store,
        config.s3_prefix(),
        config.full_request_timeout(),
        reqwest::Client::new(),
        metrics,
    )?);

    let listener = tokio::net::TcpListener::bind(config.listen_address)
        .await
        .with_context(|| format!("binding {}", config.listen_address))?;
    info!(address = %config.listen_address, log_url = %config.log_url, "ctile listening");

    axum::serve(listener, ctile::router(cache))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;
    Ok(())
}

/// Serves the Prometheus exposition endpoint on its own listener. A metrics
/// listener that cannot start takes the process down with it.
async fn serve_metrics(address: SocketAddr, metrics: Arc<Metrics>) {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let metrics = Arc::clone(&metrics);
            async move { metrics.encode() }
        }),
    );
    let listener = match tokio::net::TcpListener::bind(address).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(address = %address, %err, "unable to start metrics server");
            std::process::exit(1);
        }
    };
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(address = %address, %err, "metrics server failed");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
