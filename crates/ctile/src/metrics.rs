// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Metrics for the tile cache.
use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, register_histogram_with_registry, Counter, CounterVec,
    Histogram, HistogramVec, Registry, TextEncoder,
};

/// Metrics emitted by the handler and the tile resolver.
///
/// `requests` is labeled by `result` (`success`, `error`, `bad_request`) and
/// `source` (`s3_get`, `ct_log_get`, `s3_put`, `past_the_end_partial_tile`,
/// `internal_inconsistency`).
#[derive(Debug)]
pub struct Metrics {
    pub registry: Registry,

    pub requests: CounterVec,
    pub partial_tiles: Counter,
    pub single_flight_shared: Counter,
    pub response_latency: Histogram,
    pub backend_latency: HistogramVec,
}

impl Metrics {
    /// Creates the metric set on a fresh registry.
    ///
    /// # Panics
    ///
    /// Panics if registration fails, which cannot happen on a fresh
    /// registry.
    #[must_use]
    pub fn new() -> Self {
        let r = Registry::new();
        let requests = register_counter_vec_with_registry!(
            "ctile_requests",
            "total number of requests, by result and source",
            &["result", "source"],
            r
        )
        .unwrap();
        let partial_tiles = register_counter_with_registry!(
            "ctile_partial_tiles",
            "number of requests not cached due to partial tile returned from CT log",
            r
        )
        .unwrap();
        let single_flight_shared = register_counter_with_registry!(
            "ctile_single_flight_shared",
            "number of inbound requests coalesced into a single set of backend requests",
            r
        )
        .unwrap();
        let response_latency = register_histogram_with_registry!(
            "ctile_response_latency_seconds",
            "overall latency of responses, including all backend requests",
            r
        )
        .unwrap();
        let backend_latency = register_histogram_vec_with_registry!(
            "ctile_backend_latency_seconds",
            "latency of each backend request",
            &["backend"],
            r
        )
        .unwrap();
        Self {
            registry: r,
            requests,
            partial_tiles,
            single_flight_shared,
            response_latency,
            backend_latency,
        }
    }

    /// Renders the registry in the Prometheus text exposition format.
    #[must_use]
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let encoder = TextEncoder::new();
        encoder
            .encode_utf8(&self.registry.gather(), &mut buffer)
            .unwrap_or_default();
        buffer
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
