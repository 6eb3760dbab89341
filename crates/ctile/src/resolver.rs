// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Read-through tile resolution.

use crate::error::TileError;
use crate::metrics::Metrics;
use crate::singleflight::Group;
use crate::storage::ObjectBackend;
use crate::upstream;
use entry_tiles::codec::{decode_tile, encode_tile};
use entry_tiles::{EntryList, Tile};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where a resolved tile came from, reported to clients in the `X-Source`
/// header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileSource {
    S3,
    CtLog,
}

impl TileSource {
    /// Header value for this source.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "S3",
            Self::CtLog => "CT log",
        }
    }

    /// Metric label for the backend read that produced this source.
    pub(crate) fn backend_label(self) -> &'static str {
        match self {
            Self::S3 => "s3_get",
            Self::CtLog => "ct_log_get",
        }
    }
}

type ResolveOutcome = Result<(Arc<EntryList>, TileSource), TileError>;

/// The tile cache engine: object store in front, backing CT log behind,
/// with concurrent resolutions of the same tile collapsed into one backend
/// transaction.
///
/// Entry lists handed out by [`TileCache::resolve`] are shared across every
/// request collapsed onto the same flight and must not be mutated; the
/// handler trims by building a fresh list.
pub struct TileCache {
    log_url: String,
    tile_size: u64,
    store: Arc<dyn ObjectBackend>,
    store_prefix: String,
    http: reqwest::Client,
    full_request_timeout: Duration,
    flights: Group<ResolveOutcome>,
    pub(crate) metrics: Arc<Metrics>,
}

impl TileCache {
    /// Creates a cache for one backing log.
    ///
    /// # Errors
    ///
    /// Returns an error if any argument violates the engine's invariants:
    /// empty log URL or prefix, zero tile size, zero timeout.
    pub fn new(
        log_url: impl Into<String>,
        tile_size: u64,
        store: Arc<dyn ObjectBackend>,
        store_prefix: impl Into<String>,
        full_request_timeout: Duration,
        http: reqwest::Client,
        metrics: Arc<Metrics>,
    ) -> anyhow::Result<Self> {
        let log_url = log_url.into();
        let store_prefix = store_prefix.into();
        anyhow::ensure!(!log_url.is_empty(), "log URL must not be empty");
        anyhow::ensure!(tile_size > 0, "tile size must not be zero");
        anyhow::ensure!(!store_prefix.is_empty(), "storage prefix must not be empty");
        anyhow::ensure!(
            !full_request_timeout.is_zero(),
            "full request timeout must not be zero"
        );
        Ok(Self {
            log_url,
            tile_size,
            store,
            store_prefix,
            http,
            full_request_timeout,
            flights: Group::new(),
            metrics,
        })
    }

    /// Base URL of the backing log.
    pub fn log_url(&self) -> &str {
        &self.log_url
    }

    /// Returns the tile containing the entry at `start`.
    pub fn tile_containing(&self, start: u64) -> Tile {
        Tile::containing(start, self.tile_size, &self.log_url)
    }

    /// Maximum time a request may spend resolving a tile.
    pub fn full_request_timeout(&self) -> Duration {
        self.full_request_timeout
    }

    /// Shared HTTP client, also used by the pass-through handler.
    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// True when `list` holds fewer entries than a full tile, i.e. the tile
    /// sits at the frontier of the log.
    pub fn is_partial(&self, list: &EntryList) -> bool {
        (list.len() as u64) < self.tile_size
    }

    /// Resolves `tile` from the object store, falling back to the backing
    /// log and caching full tiles on the way back.
    ///
    /// Concurrent calls for the same tile are collapsed: only one backend
    /// transaction runs, and every caller receives the same entry list (or
    /// the same error). The collapsed operation carries its own deadline of
    /// [`TileCache::full_request_timeout`], so one caller going away does
    /// not abort it for the rest.
    ///
    /// # Errors
    ///
    /// See [`TileError`] for the error space; storage misses are handled
    /// internally and never surface.
    pub async fn resolve(
        self: &Arc<Self>,
        tile: &Tile,
    ) -> Result<(Arc<EntryList>, TileSource), TileError> {
        let this = Arc::clone(self);
        let op_tile = tile.clone();
        let op = async move {
            match tokio::time::timeout(
                this.full_request_timeout,
                this.resolve_uncollapsed(&op_tile),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(TileError::DeadlineExceeded),
            }
        };

        let (outcome, shared) = self.flights.run(&tile.dedup_key(), op).await;
        if shared {
            self.metrics.single_flight_shared.inc();
        }
        outcome.unwrap_or_else(|| {
            Err(TileError::Inconsistency(
                "in-flight tile resolution was abandoned".to_string(),
            ))
        })
    }

    /// The read-through core, without request collapsing. Callers go
    /// through [`TileCache::resolve`].
    async fn resolve_uncollapsed(&self, tile: &Tile) -> ResolveOutcome {
        let key = format!("{}{}", self.store_prefix, tile.storage_key());

        let begin = Instant::now();
        let fetched = self.store.fetch(&key).await;
        self.observe_backend("s3_get", begin);

        match fetched {
            Ok(Some(body)) => {
                return match decode_tile(&body, tile.size()) {
                    Ok(list) => Ok((Arc::new(list), TileSource::S3)),
                    Err(err) => {
                        // A cached tile that does not decode to exactly one
                        // full tile is corrupt. Surface it rather than
                        // silently re-fetching, so the corruption is
                        // visible.
                        self.count("error", "internal_inconsistency");
                        Err(TileError::Inconsistency(format!(
                            "decoding cached tile at key {key:?}: {err}"
                        )))
                    }
                };
            }
            Ok(None) => {
                // Cache miss; fall through to the backing log.
            }
            Err(err) => {
                self.count("error", "s3_get");
                return Err(TileError::StorageRead {
                    key,
                    message: err.to_string(),
                });
            }
        }

        let begin = Instant::now();
        let fetched = upstream::fetch_tile(&self.http, tile).await;
        self.observe_backend("ct_log_get", begin);

        let list = match fetched {
            Ok(list) => list,
            Err(err) => {
                // Requests for tiles past the end of the log get a 400 from
                // the backing log; report those separately.
                if matches!(err, TileError::UpstreamStatus { status: 400, .. }) {
                    self.count("bad_request", "ct_log_get");
                } else {
                    self.count("error", "ct_log_get");
                }
                return Err(err);
            }
        };

        // A short tile means the frontier of the log: return it to the
        // caller but never cache it.
        if self.is_partial(&list) {
            self.metrics.partial_tiles.inc();
            return Ok((Arc::new(list), TileSource::CtLog));
        }

        let body = encode_tile(&list).map_err(|err| {
            self.count("error", "internal_inconsistency");
            TileError::Inconsistency(format!("encoding tile for key {key:?}: {err}"))
        })?;

        let begin = Instant::now();
        let uploaded = self.store.upload(&key, &body).await;
        self.observe_backend("s3_put", begin);

        if let Err(err) = uploaded {
            self.count("error", "s3_put");
            return Err(TileError::StorageWrite {
                key,
                message: err.to_string(),
            });
        }

        Ok((Arc::new(list), TileSource::CtLog))
    }

    pub(crate) fn count(&self, result: &str, source: &str) {
        self.metrics.requests.with_label_values(&[result, source]).inc();
    }

    fn observe_backend(&self, backend: &str, begin: Instant) {
        self.metrics
            .backend_latency
            .with_label_values(&[backend])
            .observe(begin.elapsed().as_secs_f64());
    }
}
