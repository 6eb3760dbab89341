// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Fetching aligned tiles from the backing CT log.

use crate::error::TileError;
use entry_tiles::{EntryList, Tile};
use reqwest::StatusCode;

/// Fetches a tile of entries from the backing log.
///
/// Requests are always tile-aligned; the log may still truncate the response
/// at its frontier, which the caller detects by comparing the entry count to
/// the tile size.
///
/// # Errors
///
/// Returns [`TileError::UpstreamStatus`] carrying the status and body
/// verbatim when the log answers non-200, so the caller can pass both
/// through to the client. Transport failures and protocol violations (an
/// empty list, or more entries than the tile holds) surface as their own
/// variants.
pub(crate) async fn fetch_tile(http: &reqwest::Client, tile: &Tile) -> Result<EntryList, TileError> {
    let url = tile.upstream_url();
    let response = http
        .get(&url)
        .send()
        .await
        .map_err(|err| TileError::UpstreamTransport {
            url: url.clone(),
            message: err.to_string(),
        })?;

    let status = response.status();
    if status != StatusCode::OK {
        let body = response
            .bytes()
            .await
            .map_err(|err| TileError::UpstreamTransport {
                url: url.clone(),
                message: err.to_string(),
            })?;
        return Err(TileError::UpstreamStatus {
            status: status.as_u16(),
            body: body.to_vec(),
        });
    }

    let list: EntryList =
        response
            .json()
            .await
            .map_err(|err| TileError::UpstreamTransport {
                url: url.clone(),
                message: err.to_string(),
            })?;

    if list.is_empty() || list.len() as u64 > tile.size() {
        return Err(TileError::UpstreamProtocol {
            url,
            message: format!("expected between 1 and {} entries, got {}", tile.size(), list.len()),
        });
    }

    Ok(list)
}
