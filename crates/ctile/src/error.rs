// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

use thiserror::Error;

/// Errors from resolving a tile.
///
/// The request collapser hands the same result to every caller waiting on a
/// tile, so this type is `Clone`; underlying transport errors are captured
/// as messages rather than source errors.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// The backing log answered with a non-200 status. The status and body
    /// are passed through to the client verbatim; a 400 here is a normal
    /// steady-state occurrence for clients that guess past the end of the
    /// log.
    #[error("backend responded with status code {status} and body:\n{}", String::from_utf8_lossy(.body))]
    UpstreamStatus { status: u16, body: Vec<u8> },

    /// The backing log could not be reached or its response could not be
    /// read.
    #[error("fetching {url}: {message}")]
    UpstreamTransport { url: String, message: String },

    /// The backing log answered 200 with a body that violates the
    /// protocol, for example zero entries or more entries than requested.
    #[error("fetching {url}: {message}")]
    UpstreamProtocol { url: String, message: String },

    /// Reading from the object store failed with something other than
    /// not-found. This does not fall through to the backing log: a storage
    /// outage must not turn into a stampede on the upstream.
    #[error("reading tile from storage key {key:?}: {message}")]
    StorageRead { key: String, message: String },

    /// Writing a full tile to the object store failed. The fetched entries
    /// are discarded and the client sees an error; a retry re-fetches.
    #[error("writing tile to storage key {key:?}: {message}")]
    StorageWrite { key: String, message: String },

    /// A stored or in-memory state contradicted the tile invariants, for
    /// example a cached tile that decodes to the wrong entry count.
    #[error("internal inconsistency: {0}")]
    Inconsistency(String),

    /// The per-request deadline expired before the tile was resolved.
    #[error("full request timeout exceeded")]
    DeadlineExceeded,
}
