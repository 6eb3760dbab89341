// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Caching proxy for a CT log's get-entries endpoint.
///
/// Arbitrary client ranges are served from fixed-size, aligned tiles that
/// are cached in an S3-compatible object store and fetched from the backing
/// log on miss.
#[derive(Debug, Parser)]
#[command(name = "ctile")]
pub struct Config {
    /// CT log URL, e.g. https://oak.ct.letsencrypt.org/2023
    #[arg(long)]
    pub log_url: String,

    /// Tile size. Must match the max-get-entries value of the backing CT
    /// log.
    #[arg(long)]
    pub tile_size: u64,

    /// S3 bucket to use for caching.
    #[arg(long)]
    pub s3_bucket: String,

    /// Prefix for S3 keys. Defaults to the value of --log-url.
    #[arg(long)]
    pub s3_prefix: Option<String>,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:7962")]
    pub listen_address: SocketAddr,

    /// Address to listen on for metrics.
    #[arg(long, default_value = "0.0.0.0:7963")]
    pub metrics_address: SocketAddr,

    /// Max time in seconds to spend in the HTTP handler: reading from S3
    /// and returning, or reading from S3, reading from the backing log,
    /// writing to S3, and returning.
    #[arg(long, default_value_t = 4)]
    pub full_request_timeout: u64,
}

impl Config {
    /// Validates the invariants clap cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending flag.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.log_url.is_empty(), "--log-url must not be empty");
        anyhow::ensure!(self.tile_size > 0, "--tile-size must not be zero");
        anyhow::ensure!(!self.s3_bucket.is_empty(), "--s3-bucket must not be empty");
        anyhow::ensure!(
            self.full_request_timeout > 0,
            "--full-request-timeout must not be zero"
        );
        Ok(())
    }

    /// The S3 key prefix, defaulting to the log URL.
    #[must_use]
    pub fn s3_prefix(&self) -> String {
        self.s3_prefix
            .clone()
            .unwrap_or_else(|| self.log_url.clone())
    }

    /// The handler deadline as a [`Duration`].
    #[must_use]
    pub fn full_request_timeout(&self) -> Duration {
        Duration::from_secs(self.full_request_timeout)
    }
}
