// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! HTTP surface of the tile cache.
//!
//! One router serves the whole CT URL namespace: `…/ct/v1/get-entries` is
//! answered from the tile cache, everything else is proxied to the backing
//! log unchanged.

use crate::error::TileError;
use crate::resolver::TileCache;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use entry_tiles::TrimError;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

const GET_ENTRIES_SUFFIX: &str = "/ct/v1/get-entries";

/// Builds the client-facing router.
pub fn router(cache: Arc<TileCache>) -> Router {
    Router::new().fallback(serve).with_state(cache)
}

async fn serve(State(cache): State<Arc<TileCache>>, method: Method, uri: Uri) -> Response {
    let begin = Instant::now();
    let response = dispatch(&cache, &method, &uri).await;
    cache
        .metrics
        .response_latency
        .observe(begin.elapsed().as_secs_f64());
    response
}

async fn dispatch(cache: &Arc<TileCache>, method: &Method, uri: &Uri) -> Response {
    if *method != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, "only GET is supported\n").into_response();
    }
    if !uri.path().ends_with(GET_ENTRIES_SUFFIX) {
        return pass_through(cache, uri).await;
    }

    let (start, end) = match parse_query_params(uri.query()) {
        Ok(range) => range,
        Err(reason) => {
            debug!(%uri, %reason, "rejecting malformed get-entries query");
            return (StatusCode::BAD_REQUEST, format!("{reason}\n")).into_response();
        }
    };

    match tokio::time::timeout(
        cache.full_request_timeout(),
        get_entries(cache, start, end),
    )
    .await
    {
        Ok(response) => response,
        Err(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            format!("{}\n", TileError::DeadlineExceeded),
        )
            .into_response(),
    }
}

/// Serves a get-entries request from the tile containing `start`.
///
/// `start` and `end` are half-open here; the closed-interval translation
/// already happened in [`parse_query_params`].
async fn get_entries(cache: &Arc<TileCache>, start: u64, end: u64) -> Response {
    let tile = cache.tile_containing(start);

    let (list, source) = match cache.resolve(&tile).await {
        Ok(resolved) => resolved,
        Err(err) => return error_response(&err),
    };

    // Headers are attached before trimming so that even a past-the-end 400
    // reports where the tile came from.
    let mut headers = HeaderMap::new();
    if cache.is_partial(&list) {
        headers.insert("X-Partial-Tile", HeaderValue::from_static("true"));
    }
    headers.insert("X-Source", HeaderValue::from_static(source.as_str()));

    let trimmed = match list.trim_to_range(start, end, &tile) {
        Ok(trimmed) => trimmed,
        Err(err) => {
            match &err {
                TrimError::PastTheEnd => {
                    cache.count("bad_request", "past_the_end_partial_tile");
                }
                TrimError::Inconsistency(reason) => {
                    warn!(%tile, %reason, "trim arithmetic failed");
                    cache.count("error", "internal_inconsistency");
                }
            }
            return (StatusCode::BAD_REQUEST, headers, format!("{err}\n")).into_response();
        }
    };

    cache.count("success", source.backend_label());

    headers.insert("X-Response-Len", HeaderValue::from(trimmed.len()));
    headers.insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    match trimmed.to_pretty_json() {
        Ok(body) => (StatusCode::OK, headers, body).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("encoding response: {err}\n"),
        )
            .into_response(),
    }
}

/// Maps a resolver error onto a client response.
///
/// Upstream status errors are passed through: the client sees the backing
/// log's status code and captured body verbatim. Everything else is a
/// server-side failure.
fn error_response(err: &TileError) -> Response {
    match err {
        TileError::UpstreamStatus { status, body } => {
            let status =
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            // 400s are routine for clients probing past the end of the log;
            // don't let them spam the error log.
            if status == StatusCode::BAD_REQUEST {
                debug!(%err, "passing through upstream 400");
            } else {
                warn!(%err, "passing through upstream error");
            }
            (status, body.clone()).into_response()
        }
        TileError::DeadlineExceeded => {
            warn!(%err, "request deadline expired");
            (StatusCode::GATEWAY_TIMEOUT, format!("{err}\n")).into_response()
        }
        _ => {
            warn!(%err, "tile resolution failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("{err}\n")).into_response()
        }
    }
}

/// Proxies a non-get-entries GET to the backing log, preserving the status
/// code and streaming the body back.
async fn pass_through(cache: &Arc<TileCache>, uri: &Uri) -> Response {
    let mut url = format!("{}{}", cache.log_url(), uri.path());
    if let Some(query) = uri.query() {
        url.push('?');
        url.push_str(query);
    }

    match cache.http().get(&url).send().await {
        Ok(response) => {
            let status = StatusCode::from_u16(response.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Body::from_stream(response.bytes_stream())).into_response()
        }
        Err(err) => {
            warn!(%url, %err, "pass-through fetch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("fetching {url}: {err}\n"),
            )
                .into_response()
        }
    }
}

/// Parses and validates the `start` and `end` query parameters.
///
/// The returned `end` is one greater than in the request, because CT uses
/// closed intervals while everything internal uses half-open intervals for
/// simpler math.
fn parse_query_params(query: Option<&str>) -> Result<(u64, u64), String> {
    let mut start = None;
    let mut end = None;
    // First occurrence wins for a repeated key.
    for pair in query.unwrap_or_default().split('&') {
        match pair.split_once('=') {
            Some(("start", value)) => {
                start.get_or_insert(value);
            }
            Some(("end", value)) => {
                end.get_or_insert(value);
            }
            _ => {}
        }
    }

    let start = start.ok_or_else(|| "missing start parameter".to_string())?;
    let end = end.ok_or_else(|| "missing end parameter".to_string())?;
    let start: i64 = start
        .parse()
        .ok()
        .filter(|n| *n >= 0)
        .ok_or_else(|| "invalid start parameter".to_string())?;
    let end: i64 = end
        .parse()
        .ok()
        .filter(|n| *n >= 0)
        .ok_or_else(|| "invalid end parameter".to_string())?;
    if end < start {
        return Err("end must be greater than or equal to start".to_string());
    }
    Ok((start as u64, end as u64 + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_closed_interval() {
        assert_eq!(parse_query_params(Some("start=3&end=4")), Ok((3, 5)));
        assert_eq!(parse_query_params(Some("start=0&end=0")), Ok((0, 1)));
        assert_eq!(parse_query_params(Some("end=7&start=7")), Ok((7, 8)));
    }

    #[test]
    fn parse_keeps_the_first_value_of_a_repeated_key() {
        assert_eq!(
            parse_query_params(Some("start=1&start=5&end=2&end=9")),
            Ok((1, 3))
        );
        assert_eq!(
            parse_query_params(Some("start=a&start=1&end=2")),
            Err("invalid start parameter".to_string())
        );
    }

    #[test]
    fn parse_rejects_missing_and_malformed_params() {
        for query in [
            None,
            Some(""),
            Some("start=1"),
            Some("end=1"),
            Some("start=a&end=b"),
            Some("start=1&end=b"),
            Some("start=a&end=1"),
            Some("start=-1&end=1"),
            Some("start=1&end=-1"),
            Some("start=1.5&end=2"),
            Some("start=1&end=0"),
        ] {
            assert!(parse_query_params(query).is_err(), "{query:?}");
        }
    }

    #[test]
    fn parse_rejects_out_of_range_integers() {
        assert!(parse_query_params(Some("start=9223372036854775808&end=9223372036854775809"))
            .is_err());
    }
}
