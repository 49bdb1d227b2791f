// Metrics for the lock subsystem
// Counters per operation outcome plus the alive-lock gauge published by the
// expiry sweeper

use ::metrics::{counter, describe_counter, describe_gauge, gauge};

use waybill_common::LockKind;

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn init_metrics() {
    describe_counter!(
        "lock_acquisitions_total",
        "Total number of locks granted, by kind"
    );
    describe_counter!(
        "lock_conflicts_total",
        "Total number of acquire/extend attempts rejected by an active holder"
    );
    describe_counter!("lock_releases_total", "Total number of holder releases");
    describe_counter!(
        "lock_swept_total",
        "Total number of expired locks reclaimed by the sweeper"
    );
    describe_gauge!("lock_active", "Current number of live lock rows");

    tracing::debug!("Lock metrics initialized");
}

/// Record a granted lock
pub fn record_acquired(kind: LockKind) {
    counter!("lock_acquisitions_total", "kind" => kind.as_str()).increment(1);
}

/// Record a rejected acquire/extend
pub fn record_conflict(kind: LockKind) {
    counter!("lock_conflicts_total", "kind" => kind.as_str()).increment(1);
}

/// Record a holder release
pub fn record_released(kind: LockKind) {
    counter!("lock_releases_total", "kind" => kind.as_str()).increment(1);
}

/// Record rows reclaimed by a sweep pass
pub fn record_swept(count: usize) {
    counter!("lock_swept_total").increment(count as u64);
}

/// Publish the current alive-lock count
pub fn set_active_locks(count: usize) {
    gauge!("lock_active").set(count as f64);
}
