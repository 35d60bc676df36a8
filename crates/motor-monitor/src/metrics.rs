use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct SessionMetrics {
    pub poll_cycles: IntCounter,
    pub poll_failures: IntCounter,
    /// Labelled by violation type.
    pub violations: IntCounterVec,
    pub torque_disables: IntCounter,
    pub active_sessions: IntGauge,
}

/// Prometheus registry shared by every session in the process.
#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub session: SessionMetrics,
}

fn init_err(e: prometheus::Error) -> String {
    format!("metrics init error: {e}")
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let poll_cycles = IntCounter::new("mc_poll_cycles_total", "Telemetry poll cycles run")
            .map_err(init_err)?;
        let poll_failures = IntCounter::new(
            "mc_poll_failures_total",
            "Poll cycles where no motor produced data",
        )
        .map_err(init_err)?;
        let violations = IntCounterVec::new(
            Opts::new("mc_protection_violations_total", "Protection violations seen"),
            &["type"],
        )
        .map_err(init_err)?;
        let torque_disables = IntCounter::new(
            "mc_protection_torque_disables_total",
            "Motors disabled by the protection loop",
        )
        .map_err(init_err)?;
        let active_sessions =
            IntGauge::new("mc_active_sessions", "Sessions with a running poll loop")
                .map_err(init_err)?;
        let session = SessionMetrics {
            poll_cycles,
            poll_failures,
            violations,
            torque_disables,
            active_sessions,
        };
        let _ = registry.register(Box::new(session.poll_cycles.clone()));
        let _ = registry.register(Box::new(session.poll_failures.clone()));
        let _ = registry.register(Box::new(session.violations.clone()));
        let _ = registry.register(Box::new(session.torque_disables.clone()));
        let _ = registry.register(Box::new(session.active_sessions.clone()));
        Ok(Self { registry, session })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_counters() {
        let hub = MetricsHub::new().unwrap();
        hub.session.poll_cycles.inc();
        hub.session
            .violations
            .with_label_values(&["temp_critical"])
            .inc();
        let text = hub.encode_text();
        assert!(text.contains("mc_poll_cycles_total 1"));
        assert!(text.contains("type=\"temp_critical\""));
    }
}
