// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Read-through tile cache in front of a CT log's get-entries endpoint.
//!
//! Clients keep the familiar [RFC 6962 §4.6](https://datatracker.ietf.org/doc/html/rfc6962#section-4.6)
//! interface; behind it, the proxy materializes the log into fixed-size,
//! aligned tiles stored in an S3-compatible object store, so repeated reads
//! of the same region are served from cache instead of hammering the log.
//!
//! Layering, top to bottom: the HTTP [`handler`] parses and validates
//! requests and trims responses; the [`resolver`] orchestrates the
//! read-through (object store, then backing log, then write-back), with
//! concurrent resolutions of one tile collapsed into a single backend
//! transaction; [`storage`] and the upstream fetcher do the actual IO.
//! Partial tiles at the frontier of the log are served but never cached.

pub mod config;
mod error;
pub mod handler;
pub mod metrics;
pub mod resolver;
mod singleflight;
pub mod storage;
mod upstream;

pub use config::Config;
pub use error::TileError;
pub use handler::router;
pub use metrics::Metrics;
pub use resolver::{TileCache, TileSource};
pub use storage::{ObjectBackend, S3Store, StoreError};
