// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! At-rest codec for tiles.
//!
//! A stored tile is the gzip stream of a CBOR map with a single key,
//! `entries`, holding an array of entry maps. Each entry map carries exactly
//! the byte-string fields `leaf_input` and `extra_data`. There is no length
//! prefix and no magic; the gzip stream is the whole object body.

use crate::{EntryList, LogEntry};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use minicbor::{Decoder, Encoder};
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("gzip: {0}")]
    Gzip(#[from] std::io::Error),
    #[error("cbor encode: {0}")]
    Encode(#[from] minicbor::encode::Error<std::convert::Infallible>),
    #[error("cbor decode: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("indefinite-length CBOR not allowed")]
    IndefiniteLength,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("expected {expected} entries, got {actual}")]
    EntryCount { expected: u64, actual: u64 },
    #[error("trailing bytes after tile payload")]
    TrailingBytes,
}

/// Encodes an entry list as a stored tile body.
///
/// # Errors
///
/// Returns an error if compression fails.
pub fn encode_tile(list: &EntryList) -> Result<Vec<u8>, CodecError> {
    let mut cbor = Vec::new();
    let mut enc = Encoder::new(&mut cbor);
    enc.map(1)?.str("entries")?.array(list.entries.len() as u64)?;
    for entry in &list.entries {
        enc.map(2)?
            .str("leaf_input")?
            .bytes(&entry.leaf_input)?
            .str("extra_data")?
            .bytes(&entry.extra_data)?;
    }

    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&cbor)?;
    Ok(gz.finish()?)
}

/// Decodes a stored tile body, requiring exactly `expected` entries.
///
/// Only a full tile is ever written to storage, so a count mismatch means
/// the stored object is corrupt or was written by a differently-configured
/// instance.
///
/// # Errors
///
/// Returns an error if the payload is not valid gzip-wrapped CBOR in the
/// expected shape, or if the entry count differs from `expected`.
pub fn decode_tile(body: &[u8], expected: u64) -> Result<EntryList, CodecError> {
    let mut cbor = Vec::new();
    GzDecoder::new(body).read_to_end(&mut cbor)?;

    let mut dec = Decoder::new(&cbor);
    let map_len = dec.map()?.ok_or(CodecError::IndefiniteLength)?;
    let mut entries = None;
    for _ in 0..map_len {
        match dec.str()? {
            "entries" => entries = Some(decode_entries(&mut dec)?),
            _ => dec.skip()?,
        }
    }
    if dec.datatype().is_ok() {
        return Err(CodecError::TrailingBytes);
    }

    let entries = entries.ok_or(CodecError::MissingField("entries"))?;
    if entries.len() as u64 != expected {
        return Err(CodecError::EntryCount {
            expected,
            actual: entries.len() as u64,
        });
    }
    Ok(EntryList { entries })
}

fn decode_entries(dec: &mut Decoder) -> Result<Vec<LogEntry>, CodecError> {
    let len = dec.array()?.ok_or(CodecError::IndefiniteLength)?;
    let mut entries = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
    for _ in 0..len {
        entries.push(decode_entry(dec)?);
    }
    Ok(entries)
}

fn decode_entry(dec: &mut Decoder) -> Result<LogEntry, CodecError> {
    let map_len = dec.map()?.ok_or(CodecError::IndefiniteLength)?;
    let mut leaf_input = None;
    let mut extra_data = None;
    for _ in 0..map_len {
        match dec.str()? {
            "leaf_input" => leaf_input = Some(dec.bytes()?.to_vec()),
            "extra_data" => extra_data = Some(dec.bytes()?.to_vec()),
            _ => dec.skip()?,
        }
    }
    Ok(LogEntry {
        leaf_input: leaf_input.ok_or(CodecError::MissingField("leaf_input"))?,
        extra_data: extra_data.ok_or(CodecError::MissingField("extra_data"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize) -> EntryList {
        EntryList {
            entries: (0..n)
                .map(|i| LogEntry {
                    leaf_input: (i as u64).to_be_bytes().to_vec(),
                    extra_data: vec![0xab; i],
                })
                .collect(),
        }
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(data).unwrap();
        gz.finish().unwrap()
    }

    #[test]
    fn roundtrip() {
        let list = sample(3);
        let body = encode_tile(&list).unwrap();
        let decoded = decode_tile(&body, 3).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn rejects_count_mismatch() {
        let body = encode_tile(&sample(2)).unwrap();
        let err = decode_tile(&body, 3).unwrap_err();
        assert!(
            matches!(
                err,
                CodecError::EntryCount {
                    expected: 3,
                    actual: 2
                }
            ),
            "{err}"
        );
    }

    #[test]
    fn rejects_non_gzip_body() {
        assert!(matches!(
            decode_tile(b"definitely not gzip", 1),
            Err(CodecError::Gzip(_))
        ));
    }

    #[test]
    fn rejects_non_cbor_payload() {
        assert!(matches!(
            decode_tile(&gzip(b"\xff\xff\xff"), 1),
            Err(CodecError::Decode(_))
        ));
    }

    #[test]
    fn rejects_missing_entries_field() {
        let mut cbor = Vec::new();
        let mut enc = Encoder::new(&mut cbor);
        enc.map(1).unwrap().str("other").unwrap().str("x").unwrap();
        assert!(matches!(
            decode_tile(&gzip(&cbor), 0),
            Err(CodecError::MissingField("entries"))
        ));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let list = sample(1);
        let mut cbor = Vec::new();
        let mut enc = Encoder::new(&mut cbor);
        enc.map(1)
            .unwrap()
            .str("entries")
            .unwrap()
            .array(1)
            .unwrap()
            .map(2)
            .unwrap()
            .str("leaf_input")
            .unwrap()
            .bytes(&list.entries[0].leaf_input)
            .unwrap()
            .str("extra_data")
            .unwrap()
            .bytes(&list.entries[0].extra_data)
            .unwrap()
            .u8(7)
            .unwrap();
        assert!(matches!(
            decode_tile(&gzip(&cbor), 1),
            Err(CodecError::TrailingBytes)
        ));
    }

    #[test]
    fn skips_unknown_entry_fields() {
        let mut cbor = Vec::new();
        let mut enc = Encoder::new(&mut cbor);
        enc.map(1)
            .unwrap()
            .str("entries")
            .unwrap()
            .array(1)
            .unwrap()
            .map(3)
            .unwrap()
            .str("leaf_input")
            .unwrap()
            .bytes(b"leaf")
            .unwrap()
            .str("annotation")
            .unwrap()
            .str("ignored")
            .unwrap()
            .str("extra_data")
            .unwrap()
            .bytes(b"extra")
            .unwrap();
        let decoded = decode_tile(&gzip(&cbor), 1).unwrap();
        assert_eq!(decoded.entries[0].leaf_input, b"leaf");
        assert_eq!(decoded.entries[0].extra_data, b"extra");
    }
}
