//! Shared metrics recording for store backends.

use std::time::Instant;

/// Records operation metrics for store operations.
///
/// Emits `storage_operations_total` (counter) and
/// `storage_operation_duration_ms` (histogram), both labelled with backend,
/// operation and status ("success" or "error").
pub fn record_operation_metrics(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    status: &'static str,
) {
    metrics::counter!(
        "storage_operations_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "storage_operation_duration_ms",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_operation_metrics_without_recorder() {
        // No recorder is installed in tests; recording must be a no-op.
        let start = Instant::now();
        record_operation_metrics("sqlite", "find_items", start, "success");
        record_operation_metrics("memory", "insert_item", start, "error");
    }
}
