//! Metric instrument factories for jobswarm.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a registered provider the instruments are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("jobswarm")
}

/// Counter: job records written by creation calls.
/// Labels: `kind`, `chunked` ("true" | "false").
pub fn jobs_created() -> Counter<u64> {
    meter()
        .u64_counter("jobswarm.jobs.created")
        .with_description("Number of job records created")
        .build()
}

/// Counter: transactional transitions.
/// Labels: `transition`, `result` ("ok" | "not_found" | "conflict" | "error").
pub fn job_transitions() -> Counter<u64> {
    meter()
        .u64_counter("jobswarm.jobs.transitions")
        .with_description("Number of job status transitions")
        .build()
}

/// Counter: conjunctive queries sent to the store.
/// Labels: `kind`.
pub fn queries() -> Counter<u64> {
    meter()
        .u64_counter("jobswarm.queries")
        .with_description("Number of store queries")
        .build()
}

/// Counter: entities deleted.
/// Labels: `kind`.
pub fn jobs_deleted() -> Counter<u64> {
    meter()
        .u64_counter("jobswarm.jobs.deleted")
        .with_description("Number of entities deleted")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("jobswarm.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
