//! Integration tests for telemetry initialization and span helpers.

use jobswarm::entity::EntityKey;
use uuid::Uuid;

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process; a second
    // initialization returns an error instead of panicking.
    let config = jobswarm::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "jobswarm-test".to_string(),
        log_level: "debug".to_string(),
    };
    let _guard = jobswarm::telemetry::init_telemetry(config);
}

#[test]
fn transition_span_records_status_change() {
    let key = EntityKey::new("ns", "Job", Uuid::new_v4());
    let span = jobswarm::telemetry::job::start_transition_span("activate", &key);
    jobswarm::telemetry::job::record_status_change(&span, "open", "active");
}

#[test]
fn metric_instruments_accept_recordings() {
    use opentelemetry::KeyValue;

    jobswarm::telemetry::metrics::jobs_created().add(1, &[KeyValue::new("kind", "Job")]);
    jobswarm::telemetry::metrics::operation_duration_ms()
        .record(1.5, &[KeyValue::new("operation", "query")]);
}
