//! Threshold alerts.
//!
//! Stateless: one check result and its thresholds yield zero or one alert.
//! No hysteresis and nothing carried between builds.

use crate::registry::CheckRegistry;
use healthcrew_common::{Alert, AlertSeverity, CheckResult, CheckStatus, Thresholds};

pub fn evaluate(result: &CheckResult, thresholds: &Thresholds) -> Option<Alert> {
    if result.status == CheckStatus::Error {
        return None;
    }
    let metric = result.metric?;
    let (severity, threshold) = thresholds.crossing(metric)?;
    let level = match severity {
        AlertSeverity::Critical => "critical",
        AlertSeverity::Warning => "warning",
    };
    Some(Alert {
        check_id: result.check_id.clone(),
        category: result.category,
        severity,
        metric,
        threshold,
        message: format!(
            "{}: {} above {} threshold {} ({})",
            result.name, metric, level, threshold, result.summary
        ),
    })
}

/// Alerts for every result whose check is still registered.
pub fn collect(results: &[CheckResult], registry: &CheckRegistry) -> Vec<Alert> {
    results
        .iter()
        .filter_map(|r| {
            let def = registry.get(&r.check_id)?;
            evaluate(r, &def.thresholds)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use healthcrew_common::Category;

    fn result(metric: Option<f64>, status: CheckStatus) -> CheckResult {
        CheckResult {
            check_id: "node_cpu".into(),
            name: "Node CPU".into(),
            category: Category::Performance,
            command: "oc adm top nodes --no-headers".into(),
            raw_output: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            metric,
            status,
            summary: "peak CPU".into(),
            findings: Vec::new(),
            timestamp: Utc::now(),
            duration_ms: 3,
        }
    }

    #[test]
    fn test_warning_alert_at_92() {
        let alert = evaluate(
            &result(Some(92.0), CheckStatus::Warning),
            &Thresholds::new(85.0, 95.0),
        )
        .unwrap();
        assert_eq!(alert.severity, AlertSeverity::Warning);
        assert_eq!(alert.threshold, 85.0);
        assert_eq!(alert.category, Category::Performance);
    }

    #[test]
    fn test_critical_wins() {
        let alert = evaluate(
            &result(Some(99.0), CheckStatus::Critical),
            &Thresholds::new(85.0, 95.0),
        )
        .unwrap();
        assert_eq!(alert.severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_no_alert_without_crossing_or_metric() {
        let t = Thresholds::new(85.0, 95.0);
        assert!(evaluate(&result(Some(85.0), CheckStatus::Ok), &t).is_none());
        assert!(evaluate(&result(None, CheckStatus::Unknown), &t).is_none());
        assert!(evaluate(&result(Some(99.0), CheckStatus::Error), &t).is_none());
    }

    #[test]
    fn test_collect_uses_registry_thresholds() {
        let registry = CheckRegistry::with_builtin_checks();
        let alerts = collect(&[result(Some(92.0), CheckStatus::Warning)], &registry);
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].message.contains("warning threshold 85"));
    }
}
