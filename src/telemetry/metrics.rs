//! Metric instrument factories for biocrawl.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"biocrawl"` meter. Without
//! an OTLP endpoint the global provider is a no-op.

use opentelemetry::metrics::{Counter, Meter};

/// Returns the shared meter for biocrawl instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("biocrawl")
}

/// Counter: profiles claimed by this worker.
pub fn claims() -> Counter<u64> {
    meter()
        .u64_counter("biocrawl.lease.claimed")
        .with_description("Number of profiles claimed")
        .build()
}

/// Counter: stale claims released by the startup sweep.
pub fn sweep_resets() -> Counter<u64> {
    meter()
        .u64_counter("biocrawl.lease.swept")
        .with_description("Number of stale claims released")
        .build()
}

/// Counter: classified fetch results.
/// Labels: `outcome`.
pub fn fetch_outcomes() -> Counter<u64> {
    meter()
        .u64_counter("biocrawl.fetch.outcomes")
        .with_description("Number of profile fetches by outcome")
        .build()
}

/// Counter: records forwarded to the ingestion API.
/// Labels: `result` ("ok" | "failed").
pub fn forwards() -> Counter<u64> {
    meter()
        .u64_counter("biocrawl.ingest.forwards")
        .with_description("Number of records forwarded downstream")
        .build()
}

/// Counter: update buffer flushes.
/// Labels: `result` ("ok" | "failed").
pub fn flushes() -> Counter<u64> {
    meter()
        .u64_counter("biocrawl.buffer.flushes")
        .with_description("Number of pending-update flushes")
        .build()
}

/// Counter: identity rotations requested by the rate governor.
/// Labels: `reason`, `result` ("rotated" | "restart").
pub fn rotations() -> Counter<u64> {
    meter()
        .u64_counter("biocrawl.governor.rotations")
        .with_description("Number of identity rotations")
        .build()
}
