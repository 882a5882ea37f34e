//! Prometheus metrics and tracing span helpers.
//!
//! With the `metrics` feature, [`METRICS`] records every statement sent through
//! [`MayPostgresExecutor`](crate::MayPostgresExecutor) plus staging/flush row counts.
//! Without it the recording calls compile away at their call sites.

#[cfg(feature = "metrics")]
pub use self::prometheus_metrics::{render, StagehandMetrics, METRICS};

#[cfg(feature = "metrics")]
mod prometheus_metrics {
    use once_cell::sync::Lazy;
    use opentelemetry::metrics::{Counter, Histogram, MeterProvider};
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<StagehandMetrics> = Lazy::new(StagehandMetrics::init);

    pub struct StagehandMetrics {
        registry: Registry,
        _provider: SdkMeterProvider,
        pub statements_total: Counter<u64>,
        pub statement_errors_total: Counter<u64>,
        pub statement_duration: Histogram<f64>,
        pub connection_duration: Histogram<f64>,
        pub rows_written_total: Counter<u64>,
        pub flushes_total: Counter<u64>,
        pub rows_flushed_total: Counter<u64>,
    }

    impl StagehandMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let exporter = opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
                .expect("failed to build prometheus exporter");
            let provider = SdkMeterProvider::builder().with_reader(exporter).build();
            let meter = provider.meter("stagehand");

            let statements_total = meter
                .u64_counter("stagehand_statements_total")
                .with_description("Total SQL statements executed")
                .build();

            let statement_errors_total = meter
                .u64_counter("stagehand_statement_errors_total")
                .with_description("SQL statements that returned an error")
                .build();

            let statement_duration = meter
                .f64_histogram("stagehand_statement_duration_seconds")
                .with_description("Duration of SQL statements")
                .build();

            let connection_duration = meter
                .f64_histogram("stagehand_connection_duration_seconds")
                .with_description("Time spent establishing connections")
                .build();

            let rows_written_total = meter
                .u64_counter("stagehand_rows_written_total")
                .with_description("Rows written by bulk inserts, by target")
                .build();

            let flushes_total = meter
                .u64_counter("stagehand_flushes_total")
                .with_description("Flush statements issued")
                .build();

            let rows_flushed_total = meter
                .u64_counter("stagehand_rows_flushed_total")
                .with_description("Rows promoted from staging to actual tables")
                .build();

            Self {
                registry,
                _provider: provider,
                statements_total,
                statement_errors_total,
                statement_duration,
                connection_duration,
                rows_written_total,
                flushes_total,
                rows_flushed_total,
            }
        }

        pub fn record_statement(&self, elapsed: Duration) {
            self.statements_total.add(1, &[]);
            self.statement_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_statement_error(&self) {
            self.statement_errors_total.add(1, &[]);
        }

        pub fn record_connection(&self, elapsed: Duration) {
            self.connection_duration.record(elapsed.as_secs_f64(), &[]);
        }

        pub fn record_rows_written(&self, rows: u64, staging: bool) {
            let target = if staging { "staging" } else { "actual" };
            self.rows_written_total
                .add(rows, &[KeyValue::new("target", target)]);
        }

        pub fn record_flush(&self, rows: u64) {
            self.flushes_total.add(1, &[]);
            self.rows_flushed_total.add(rows, &[]);
        }
    }

    /// Render the current metrics in the Prometheus text exposition format.
    pub fn render() -> String {
        TextEncoder::new()
            .encode_to_string(&METRICS.registry.gather())
            .unwrap_or_default()
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    /// Span wrapping a single statement sent to the backend.
    pub fn execute_statement_span(sql: &str) -> Span {
        let verb = sql
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        info_span!("stagehand.execute", db.system = "postgresql", db.operation = %verb, db.statement = sql)
    }

    pub fn acquire_connection_span() -> Span {
        info_span!("stagehand.connect", db.system = "postgresql")
    }

    pub fn flush_span(schema: &str, table: &str) -> Span {
        info_span!("stagehand.flush", db.schema = schema, db.table = table)
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_recording_does_not_panic() {
        METRICS.record_statement(Duration::from_millis(3));
        METRICS.record_statement_error();
        METRICS.record_rows_written(10, true);
        METRICS.record_flush(10);
        let _ = render();
    }
}
