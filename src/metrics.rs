//! Metrics and tracing hooks.
//!
//! Counters and histograms are registered on the global OpenTelemetry meter `uow`; the host
//! application installs whatever exporter it uses. Span helpers live in [`tracing_helpers`].

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
};
#[cfg(feature = "metrics")]
use std::time::Duration;

#[cfg(feature = "metrics")]
pub static METRICS: Lazy<UowMetrics> = Lazy::new(UowMetrics::init);

#[cfg(feature = "metrics")]
pub struct UowMetrics {
    pub queries_total: Counter<u64>,
    pub query_errors_total: Counter<u64>,
    pub query_duration: Histogram<f64>,
    pub saves_total: Counter<u64>,
    pub save_failures_total: Counter<u64>,
    pub entries_saved_total: Counter<u64>,
}

#[cfg(feature = "metrics")]
impl UowMetrics {
    pub fn init() -> Self {
        let meter = global::meter("uow");

        let queries_total = meter.u64_counter("uow_queries_total")
            .with_description("Total statements sent to the backend").build();

        let query_errors_total = meter.u64_counter("uow_query_errors_total")
            .with_description("Statements that failed in the backend").build();

        let query_duration = meter.f64_histogram("uow_query_duration_seconds")
            .with_description("Duration of backend statements").build();

        let saves_total = meter.u64_counter("uow_saves_total")
            .with_description("Calls to save_changes").build();

        let save_failures_total = meter.u64_counter("uow_save_failures_total")
            .with_description("save_changes calls that captured a failure").build();

        let entries_saved_total = meter.u64_counter("uow_entries_saved_total")
            .with_description("Tracked entries written by save_changes").build();

        Self {
            queries_total,
            query_errors_total,
            query_duration,
            saves_total,
            save_failures_total,
            entries_saved_total,
        }
    }

    pub fn record_query_duration(&self, elapsed: Duration) {
        self.queries_total.add(1, &[]);
        self.query_duration.record(elapsed.as_secs_f64(), &[]);
    }

    pub fn record_query_error(&self) {
        self.query_errors_total.add(1, &[]);
    }

    pub fn record_save(&self, entries: u64) {
        self.saves_total.add(1, &[]);
        self.entries_saved_total.add(entries, &[]);
    }

    pub fn record_save_failure(&self) {
        self.saves_total.add(1, &[]);
        self.save_failures_total.add(1, &[]);
    }
}

/// Span constructors used around backend calls.
#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    pub fn execute_query_span(sql: &str) -> Span {
        info_span!("uow.execute_query", db.statement = sql)
    }

    pub fn save_changes_span(pending: usize) -> Span {
        info_span!("uow.save_changes", pending)
    }

    pub fn begin_transaction_span(depth: u32) -> Span {
        info_span!("uow.begin_transaction", depth)
    }

    pub fn commit_transaction_span(depth: u32) -> Span {
        info_span!("uow.commit_transaction", depth)
    }

    pub fn rollback_transaction_span(depth: u32) -> Span {
        info_span!("uow.rollback_transaction", depth)
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record_without_exporter() {
        // The global meter is a no-op until an exporter is installed.
        METRICS.record_query_duration(Duration::from_millis(3));
        METRICS.record_query_error();
        METRICS.record_save(2);
        METRICS.record_save_failure();
    }
}
