// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

use crate::Tile;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};
use thiserror::Error;

/// A single entry in a get-entries response
/// ([RFC 6962 §4.6](https://datatracker.ietf.org/doc/html/rfc6962#section-4.6)).
///
/// Both fields are opaque byte strings, standard base64 on the JSON wire.
/// The engine never looks inside them; only the entry count matters.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde_as(as = "Base64")]
    pub leaf_input: Vec<u8>,
    #[serde_as(as = "Base64")]
    pub extra_data: Vec<u8>,
}

/// An ordered list of entries, matching the JSON shape of the get-entries
/// response: `{"entries": [...]}`.
///
/// Entry lists returned by the cache are shared across concurrent requests
/// and must not be mutated after construction. [`EntryList::trim_to_range`]
/// produces a fresh list instead of slicing in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryList {
    pub entries: Vec<LogEntry>,
}

/// Error from trimming an entry list to a requested range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrimError {
    /// The tile's beginning is inside the log, but the requested range falls
    /// beyond the portion that has been materialized. The backing log
    /// answers requests past its end with a 400, so this maps to the same.
    #[error("requested range is past the end of the log")]
    PastTheEnd,

    /// The requested range contradicts the tile geometry. Indicates a bug in
    /// the caller, never a client-correctable condition.
    #[error("internal inconsistency: {0}")]
    Inconsistency(String),
}

impl EntryList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a new list trimmed to the entries of `tile` that fall in the
    /// half-open range `[start, end)`.
    ///
    /// `self` must hold the (possibly partial) contents of `tile`, and
    /// `start` must lie inside the tile. The result holds at most
    /// `end - start` entries, fewer when the range runs past the entries
    /// actually materialized.
    ///
    /// # Errors
    ///
    /// Returns [`TrimError::PastTheEnd`] when `start` is beyond the last
    /// materialized entry of a partial tile, and [`TrimError::Inconsistency`]
    /// when the arguments violate the tile geometry.
    pub fn trim_to_range(&self, start: u64, end: u64, tile: &Tile) -> Result<Self, TrimError> {
        if start < tile.start()
            || start >= tile.end()
            || end <= start
            || self.entries.len() as u64 > tile.size()
        {
            return Err(TrimError::Inconsistency(format!(
                "start = {start}, end = {end}, {tile}, len = {}",
                self.entries.len()
            )));
        }

        let prefix = usize::try_from(start - tile.start()).map_err(|_| {
            TrimError::Inconsistency(format!("offset {} does not fit", start - tile.start()))
        })?;
        if prefix >= self.entries.len() {
            return Err(TrimError::PastTheEnd);
        }

        let want = usize::try_from(end - start).unwrap_or(usize::MAX);
        let take = want.min(self.entries.len() - prefix);
        Ok(Self {
            entries: self.entries[prefix..prefix + take].to_vec(),
        })
    }

    /// Renders the list as two-space-indented JSON, the format the
    /// get-entries endpoint serves to clients.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails, which should never happen
    /// for this type.
    pub fn to_pretty_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_of(n: usize) -> EntryList {
        EntryList {
            entries: (0..n)
                .map(|i| LogEntry {
                    leaf_input: vec![i as u8; 4],
                    extra_data: vec![i as u8; 2],
                })
                .collect(),
        }
    }

    fn tile(start: u64, size: u64) -> Tile {
        Tile::containing(start, size, "http://example.com")
    }

    #[test]
    fn trim_rejects_geometry_violations() {
        let entries = list_of(3);

        // start before the tile
        let err = entries.trim_to_range(1, 2, &tile(10, 10)).unwrap_err();
        assert!(matches!(err, TrimError::Inconsistency(_)), "{err}");

        // start past the tile end
        let err = entries.trim_to_range(999, 1000, &tile(10, 10)).unwrap_err();
        assert!(matches!(err, TrimError::Inconsistency(_)), "{err}");

        // empty range
        let err = entries.trim_to_range(1000, 1000, &tile(10, 10)).unwrap_err();
        assert!(matches!(err, TrimError::Inconsistency(_)), "{err}");

        // more entries than the tile can hold
        let err = entries.trim_to_range(10, 20, &tile(10, 2)).unwrap_err();
        assert!(matches!(err, TrimError::Inconsistency(_)), "{err}");
    }

    #[test]
    fn trim_detects_past_the_end() {
        let entries = list_of(3);
        // Tile [10, 20), but only 3 entries materialized; offset 5 is past
        // the frontier.
        let err = entries.trim_to_range(15, 20, &tile(10, 10)).unwrap_err();
        assert_eq!(err, TrimError::PastTheEnd);
        assert_eq!(err.to_string(), "requested range is past the end of the log");
    }

    #[test]
    fn trim_clamps_to_materialized_tail() {
        let entries = list_of(3);

        let out = entries.trim_to_range(10, 20, &tile(10, 10)).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.entries, entries.entries);

        let out = entries.trim_to_range(11, 12, &tile(10, 10)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.entries[0], entries.entries[1]);

        let out = entries.trim_to_range(12, 20, &tile(10, 10)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out.entries[0], entries.entries[2]);
    }

    #[test]
    fn trim_does_not_mutate_the_source() {
        let entries = list_of(3);
        let before = entries.clone();
        let _ = entries.trim_to_range(11, 12, &tile(10, 10)).unwrap();
        assert_eq!(entries, before);
    }

    #[test]
    fn json_uses_standard_base64() {
        let list = EntryList {
            entries: vec![LogEntry {
                leaf_input: b"hello".to_vec(),
                extra_data: vec![],
            }],
        };
        let json = serde_json::to_string(&list).unwrap();
        assert_eq!(
            json,
            r#"{"entries":[{"leaf_input":"aGVsbG8=","extra_data":""}]}"#
        );

        let parsed: EntryList = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, list);
    }

    #[test]
    fn pretty_json_is_two_space_indented() {
        let list = list_of(1);
        let json = String::from_utf8(list.to_pretty_json().unwrap()).unwrap();
        assert!(json.starts_with("{\n  \"entries\": ["), "{json}");
    }
}
