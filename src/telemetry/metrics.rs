//! Metric instrument factories.
//!
//! Instruments come from the `"refreshq"` meter of the globally registered
//! `MeterProvider`; without one they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("refreshq")
}

/// Counter: entities passed through the discovery upsert.
/// Labels: `result` ("updated" | "inserted" | "conflict" | "unchanged").
pub fn entities_upserted() -> Counter<u64> {
    meter()
        .u64_counter("refreshq.entities.upserted")
        .with_description("Entities upserted by discovery")
        .build()
}

/// Counter: writes rejected because another location key owns the row.
/// Labels: `operation` ("discovery" | "commit").
pub fn location_key_conflicts() -> Counter<u64> {
    meter()
        .u64_counter("refreshq.location_key.conflicts")
        .with_description("Location key ownership conflicts")
        .build()
}

/// Counter: entities handed to workers by batch claims.
pub fn entities_claimed() -> Counter<u64> {
    meter()
        .u64_counter("refreshq.entities.claimed")
        .with_description("Entities claimed for processing")
        .build()
}

/// Counter: processing results written.
/// Labels: `kind` ("processed" | "errors").
pub fn results_committed() -> Counter<u64> {
    meter()
        .u64_counter("refreshq.results.committed")
        .with_description("Processing results committed")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("refreshq.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
