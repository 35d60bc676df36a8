//! Threshold classification of motor telemetry.
//!
//! Violations are reported in a fixed order: temperature, voltage, current. Within each
//! metric at most one violation is produced (critical temperature shadows the warning,
//! peak current shadows the sustained maximum).

use motor_registry::ProtectionParams;

use crate::types::{ProtectionStatus, StatusLevel, TelemetryMetrics, Violation, ViolationType};

/// Check one telemetry sample against `params`.
///
/// Current limits apply to the magnitude: a motor reports negative current when driven in
/// reverse or back-driven, and that draw heats the windings the same way. The violation
/// still carries the signed reading.
pub fn check_violations(params: &ProtectionParams, m: &TelemetryMetrics) -> ProtectionStatus {
    let mut violations = Vec::new();
    let mut push = |kind, value, limit| violations.push(Violation { kind, value, limit });

    if let Some(t) = m.temperature {
        if t >= params.temp_critical {
            push(ViolationType::TempCritical, t, params.temp_critical);
        } else if t >= params.temp_warning {
            push(ViolationType::TempWarning, t, params.temp_warning);
        }
    }
    if let Some(v) = m.voltage {
        if v < params.voltage_min {
            push(ViolationType::VoltageLow, v, params.voltage_min);
        } else if v > params.voltage_max {
            push(ViolationType::VoltageHigh, v, params.voltage_max);
        }
    }
    if let Some(c) = m.current {
        let mag = c.abs();
        if mag > params.current_peak {
            push(ViolationType::CurrentPeakExceeded, c, params.current_peak);
        } else if mag > params.current_max {
            push(ViolationType::CurrentMaxExceeded, c, params.current_max);
        }
    }

    let status = if violations.iter().any(|v| v.kind.is_critical()) {
        StatusLevel::Critical
    } else if violations.is_empty() {
        StatusLevel::Ok
    } else {
        StatusLevel::Warning
    };
    if status != StatusLevel::Ok {
        tracing::trace!(%status, count = violations.len(), "protection violations");
    }
    ProtectionStatus { status, violations }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ProtectionParams {
        ProtectionParams {
            temp_warning: 55.0,
            temp_critical: 65.0,
            voltage_min: 6.0,
            voltage_max: 8.4,
            current_max: 1_000.0,
            current_peak: 2_000.0,
        }
    }

    fn metrics(t: f64, v: f64, c: f64) -> TelemetryMetrics {
        TelemetryMetrics {
            temperature: Some(t),
            voltage: Some(v),
            current: Some(c),
        }
    }

    fn kinds(s: &ProtectionStatus) -> Vec<ViolationType> {
        s.violations.iter().map(|v| v.kind).collect()
    }

    #[test]
    fn test_reverse_current_is_checked_by_magnitude() {
        let s = check_violations(&params(), &metrics(30.0, 7.4, -2_500.0));
        assert_eq!(s.status, StatusLevel::Critical);
        assert_eq!(kinds(&s), vec![ViolationType::CurrentPeakExceeded]);
        assert_eq!(s.violations[0].value, -2_500.0);

        let s = check_violations(&params(), &metrics(30.0, 7.4, -1_500.0));
        assert_eq!(kinds(&s), vec![ViolationType::CurrentMaxExceeded]);
        let s = check_violations(&params(), &metrics(30.0, 7.4, -900.0));
        assert_eq!(s.status, StatusLevel::Ok);
    }

    #[test]
    fn test_nominal_is_ok() {
        let s = check_violations(&params(), &metrics(30.0, 7.4, 200.0));
        assert_eq!(s.status, StatusLevel::Ok);
        assert!(s.violations.is_empty());
    }

    #[test]
    fn test_temperature_at_critical_is_critical() {
        let s = check_violations(&params(), &metrics(65.0, 7.4, 0.0));
        assert_eq!(s.status, StatusLevel::Critical);
        assert_eq!(kinds(&s), vec![ViolationType::TempCritical]);
        assert_eq!(s.violations[0].limit, 65.0);
    }

    #[test]
    fn test_warning_only_classes() {
        let s = check_violations(&params(), &metrics(56.0, 7.4, 1_500.0));
        assert_eq!(s.status, StatusLevel::Warning);
        assert_eq!(
            kinds(&s),
            vec![ViolationType::TempWarning, ViolationType::CurrentMaxExceeded]
        );
    }

    #[test]
    fn test_order_and_classes_all_metrics() {
        let s = check_violations(&params(), &metrics(70.0, 5.0, 2_500.0));
        assert_eq!(
            kinds(&s),
            vec![
                ViolationType::TempCritical,
                ViolationType::VoltageLow,
                ViolationType::CurrentPeakExceeded
            ]
        );
        let s = check_violations(&params(), &metrics(20.0, 9.0, 0.0));
        assert_eq!(kinds(&s), vec![ViolationType::VoltageHigh]);
        assert!(s.is_critical());
    }

    #[test]
    fn test_missing_metrics_are_skipped() {
        let m = TelemetryMetrics {
            temperature: Some(40.0),
            ..Default::default()
        };
        assert_eq!(check_violations(&params(), &m).status, StatusLevel::Ok);
    }

    #[test]
    fn test_negative_current_counts() {
        let s = check_violations(&params(), &metrics(20.0, 7.4, -2_100.0));
        assert!(s.has(ViolationType::CurrentPeakExceeded));
    }

    #[test]
    fn test_serialized_shape() {
        let s = check_violations(&params(), &metrics(66.0, 7.4, 0.0));
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["status"], "critical");
        assert_eq!(json["violations"][0]["type"], "temp_critical");
    }
}
