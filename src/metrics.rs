use std::time::Instant;

use metrics::{Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use miette::Result;

/// Metrics collector for the palisade front end.
///
/// Handles are resolved against the global recorder at construction time.
/// Without an installed recorder every call is a no-op.
#[derive(Clone)]
pub struct Metrics {
    // Command counters
    pub commands_total: Counter,
    pub commands_auth_total: Counter,
    pub commands_sentinel_total: Counter,
    pub commands_unsupported_total: Counter,
    pub command_duration_seconds: Histogram,

    // Auth
    pub auth_success_total: Counter,
    pub auth_failures_total: Counter,
    pub unauthenticated_commands_total: Counter,
    pub goaway_total: Counter,

    // Errors
    pub errors_total: Counter,
    pub connection_errors_total: Counter,
    pub protocol_errors_total: Counter,
    pub backend_errors_total: Counter,

    // Connections
    pub connections_active: Gauge,
    pub connections_total: Counter,
    pub connections_dropped_total: Counter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            commands_total: metrics::counter!("palisade_commands_total"),
            commands_auth_total: metrics::counter!("palisade_commands_auth_total"),
            commands_sentinel_total: metrics::counter!("palisade_commands_sentinel_total"),
            commands_unsupported_total: metrics::counter!("palisade_commands_unsupported_total"),
            command_duration_seconds: metrics::histogram!("palisade_command_duration_seconds"),

            auth_success_total: metrics::counter!("palisade_auth_success_total"),
            auth_failures_total: metrics::counter!("palisade_auth_failures_total"),
            unauthenticated_commands_total: metrics::counter!(
                "palisade_unauthenticated_commands_total"
            ),
            goaway_total: metrics::counter!("palisade_goaway_total"),

            errors_total: metrics::counter!("palisade_errors_total"),
            connection_errors_total: metrics::counter!("palisade_connection_errors_total"),
            protocol_errors_total: metrics::counter!("palisade_protocol_errors_total"),
            backend_errors_total: metrics::counter!("palisade_backend_errors_total"),

            connections_active: metrics::gauge!("palisade_connections_active"),
            connections_total: metrics::counter!("palisade_connections_total"),
            connections_dropped_total: metrics::counter!("palisade_connections_dropped_total"),
        }
    }

    /// Record a handled command and its latency.
    pub fn record_command(&self, command: &str, start_time: Instant) {
        self.commands_total.increment(1);
        self.command_duration_seconds
            .record(start_time.elapsed().as_secs_f64());

        match command {
            "AUTH" => self.commands_auth_total.increment(1),
            "SENTINEL" => self.commands_sentinel_total.increment(1),
            _ => {}
        }
    }

    pub fn record_unsupported(&self) {
        self.commands_unsupported_total.increment(1);
    }

    pub fn record_auth(&self, success: bool) {
        if success {
            self.auth_success_total.increment(1);
        } else {
            self.auth_failures_total.increment(1);
        }
    }

    pub fn record_unauthenticated(&self) {
        self.unauthenticated_commands_total.increment(1);
    }

    pub fn record_goaway(&self) {
        self.goaway_total.increment(1);
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors_total.increment(1);

        match error_type {
            "connection" => self.connection_errors_total.increment(1),
            "protocol" => self.protocol_errors_total.increment(1),
            "backend" => self.backend_errors_total.increment(1),
            _ => {}
        }
    }

    pub fn record_connection(&self) {
        self.connections_total.increment(1);
        self.connections_active.increment(1.0);
    }

    pub fn record_connection_dropped(&self) {
        self.connections_dropped_total.increment(1);
        self.connections_active.decrement(1.0);
    }
}

/// Install the Prometheus recorder. Call once, before building any `Metrics`.
pub fn init_metrics_exporter() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| miette::miette!("Failed to install Prometheus recorder: {}", e))?;

    tracing::info!("Prometheus metrics exporter initialized");
    Ok(handle)
}

/// Helper struct for timing operations
pub struct Timer {
    pub start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    fn recorder() -> PrometheusRecorder {
        PrometheusBuilder::new().build_recorder()
    }

    #[test]
    fn session_events_show_up_in_the_rendered_output() {
        let recorder = recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let m = Metrics::new();
            m.record_connection();
            m.record_command("AUTH", Instant::now());
            m.record_auth(false);
            m.record_goaway();
            m.record_error("protocol");
            m.record_connection_dropped();
        });

        let rendered = handle.render();
        assert!(rendered.contains("palisade_commands_auth_total 1"));
        assert!(rendered.contains("palisade_auth_failures_total 1"));
        assert!(rendered.contains("palisade_goaway_total 1"));
        assert!(rendered.contains("palisade_protocol_errors_total 1"));
        assert!(rendered.contains("palisade_connections_total 1"));
    }

    #[test]
    fn works_without_a_recorder() {
        let m = Metrics::new();
        m.record_command("GET", Timer::start().start);
        m.record_unsupported();
        m.record_unauthenticated();
    }
}
