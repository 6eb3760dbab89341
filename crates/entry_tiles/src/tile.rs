// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

use crate::LeafIndex;
use std::fmt;

/// A Tile describes a fixed-size, aligned range of log entries on a
/// particular backing log.
///
/// `start` is inclusive and `end` is exclusive: a tile covers the half-open
/// interval `[start, start + size)`, with `start` always a multiple of
/// `size`. This differs from the CT wire protocol, which uses closed
/// intervals; the translation happens only when building the upstream URL
/// (see [`Tile::upstream_url`]).
///
/// The backing log's URL is part of the tile's identity for request
/// deduplication ([`Tile::dedup_key`]) but not of its storage location
/// ([`Tile::storage_key`]): the object store is already scoped to one log by
/// its key prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tile {
    start: LeafIndex,
    end: LeafIndex,
    size: u64,
    log_url: String,
}

impl Tile {
    /// Returns the tile of size `size` that contains the entry at `start`.
    /// The resulting tile's `start` is equal to or less than the requested
    /// position.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn containing(start: LeafIndex, size: u64, log_url: &str) -> Self {
        assert!(size > 0, "tile size must be positive");
        let tile_start = start - (start % size);
        Self {
            start: tile_start,
            end: tile_start + size,
            size,
            log_url: log_url.to_string(),
        }
    }

    /// The first entry index covered by this tile (inclusive).
    pub fn start(&self) -> LeafIndex {
        self.start
    }

    /// One past the last entry index covered by this tile.
    pub fn end(&self) -> LeafIndex {
        self.end
    }

    /// The configured tile size. A materialized tile holds exactly this many
    /// entries unless it is at the frontier of the log.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Base URL of the backing log.
    pub fn log_url(&self) -> &str {
        &self.log_url
    }

    /// Returns the object-store key for this tile, relative to the
    /// configured key prefix.
    ///
    /// The tile size is embedded in the key so that a deployment that
    /// changes its tile size never collides with previously cached tiles.
    pub fn storage_key(&self) -> String {
        format!("tile_size={}/{}.cbor.gz", self.size, self.start)
    }

    /// Returns the URL from which to fetch this tile's entries from the
    /// backing log. The wire protocol uses closed intervals, so the
    /// exclusive `end` is decremented at this boundary.
    pub fn upstream_url(&self) -> String {
        format!(
            "{}/ct/v1/get-entries?start={}&end={}",
            self.log_url,
            self.start,
            self.end - 1
        )
    }

    /// Returns the key under which concurrent resolutions of this tile are
    /// collapsed. Unlike [`Tile::storage_key`], this includes the log URL.
    pub fn dedup_key(&self) -> String {
        format!(
            "logURL-{}-tile-{}-{}",
            self.log_url, self.start, self.end
        )
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tile [{}, {}) of size {} on {}",
            self.start, self.end, self.size, self.log_url
        )
    }
}
