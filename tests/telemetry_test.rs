//! Integration tests for telemetry initialization and span helpers.

use taskq::TaskId;

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process; a second
    // attempt returns Err, which is fine here.
    let config = taskq::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "taskq-test".to_string(),
        log_level: "debug".to_string(),
    };
    if let Ok(guard) = taskq::telemetry::init_telemetry(config) {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn task_span_records_task_and_transition() {
    let span = taskq::telemetry::task::start_task_span("reserve", "emails");
    taskq::telemetry::task::record_task(&span, &TaskId::new(), 42);
    taskq::telemetry::task::record_state_transition(&span, "available", "reserved");
}

#[test]
fn metric_instruments_work_without_exporter() {
    use opentelemetry::KeyValue;

    let labels = [KeyValue::new("collection", "emails")];
    taskq::telemetry::metrics::tasks_added().add(1, &labels);
    taskq::telemetry::metrics::tasks_reserved().add(1, &labels);
    taskq::telemetry::metrics::tasks_released().add(1, &labels);
    taskq::telemetry::metrics::tasks_removed().add(1, &labels);
    taskq::telemetry::metrics::store_duration_ms().record(1.5, &labels);
}
