//! Prometheus metrics for the email retry queue.

use crate::error::ErrorCategory;
use crate::record::EmailKind;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize the Prometheus recorder.
///
/// Call this once at startup. Subsequent calls are no-ops.
pub fn init_metrics() {
    let _ = PROMETHEUS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");
        info!("Prometheus metrics initialized");
        handle
    });
}

/// Render metrics in Prometheus exposition format.
pub fn render_metrics() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

/// Record an email accepted into the queue.
pub fn record_enqueued(kind: EmailKind) {
    counter!("mailer_emails_enqueued_total", "kind" => kind.to_string()).increment(1);
}

/// Record a delivered email.
pub fn record_sent() {
    counter!("mailer_emails_sent_total").increment(1);
}

/// Record an email re-queued for retry.
pub fn record_retried(retry_count: u32) {
    counter!("mailer_emails_retried_total", "attempt" => retry_count.to_string()).increment(1);
}

/// Record an email moved to the dead-letter queue.
pub fn record_dead_lettered(category: ErrorCategory) {
    counter!("mailer_emails_dead_lettered_total", "category" => category.to_string()).increment(1);
}

/// Record stale processing leases returned to pending.
pub fn record_reclaimed(count: usize) {
    counter!("mailer_leases_reclaimed_total").increment(count as u64);
}

/// Record one worker batch.
pub fn record_batch(size: usize, duration: Duration) {
    histogram!("mailer_batch_duration_seconds").record(duration.as_secs_f64());
    histogram!("mailer_batch_size").record(size as f64);
}

/// Update queue depth gauges.
pub fn set_queue_depth(pending: usize, processing: usize, failed: usize) {
    gauge!("mailer_queue_depth", "queue" => "pending").set(pending as f64);
    gauge!("mailer_queue_depth", "queue" => "processing").set(processing as f64);
    gauge!("mailer_queue_depth", "queue" => "failed").set(failed as f64);
}
