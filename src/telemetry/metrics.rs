//! Metric instruments for queue operations.
//!
//! Created from the `"taskq"` meter on the globally registered
//! `MeterProvider`; a no-op until `init_telemetry` installs an exporter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("taskq")
}

/// Counter: tasks added.
/// Labels: `collection`.
pub fn tasks_added() -> Counter<u64> {
    meter()
        .u64_counter("taskq.tasks.added")
        .with_description("Number of tasks added")
        .build()
}

/// Counter: reservation attempts.
/// Labels: `collection`, `result` ("hit" | "empty").
pub fn tasks_reserved() -> Counter<u64> {
    meter()
        .u64_counter("taskq.tasks.reserved")
        .with_description("Number of reservation attempts")
        .build()
}

/// Counter: reservations lifted.
/// Labels: `collection`, `reason` ("reschedule" | "timeout").
pub fn tasks_released() -> Counter<u64> {
    meter()
        .u64_counter("taskq.tasks.released")
        .with_description("Number of reservations released")
        .build()
}

/// Counter: tasks removed.
/// Labels: `collection`.
pub fn tasks_removed() -> Counter<u64> {
    meter()
        .u64_counter("taskq.tasks.removed")
        .with_description("Number of tasks removed")
        .build()
}

/// Histogram: store round-trip duration in milliseconds.
/// Labels: `operation`.
pub fn store_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("taskq.store.duration_ms")
        .with_description("Store operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
