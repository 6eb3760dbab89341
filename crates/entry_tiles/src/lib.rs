// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Tile-structured access to the entries of an [RFC 6962](https://datatracker.ietf.org/doc/html/rfc6962)
//! Certificate Transparency log.
//!
//! A log's entry space is divided into fixed-size, aligned tiles. Tiles are
//! the unit of caching and of interaction with the backing log: an arbitrary
//! `[start, end)` request maps onto the single tile containing `start`, and a
//! fully materialized tile is stored as a gzip-compressed CBOR object.
//!
//! This crate is IO-free. It provides the tile geometry ([`Tile`]), the entry
//! data model and range trimming ([`LogEntry`], [`EntryList`]), and the
//! at-rest codec ([`codec`]).

pub mod codec;
mod entries;
mod tile;

pub use codec::CodecError;
pub use entries::{EntryList, LogEntry, TrimError};
pub use tile::Tile;

/// Index of an entry in the log. Entries are numbered from zero.
pub type LeafIndex = u64;
