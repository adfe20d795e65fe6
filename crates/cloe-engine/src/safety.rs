//! Safety gating for in-flight executions
//!
//! Evaluates pre-flight and in-flight safety conditions against a
//! configuration-driven rule table (KPI -> comparator -> threshold ->
//! severity). Rules are deployment data, not code: new hard limits never
//! require a rebuild.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::element::TelemetrySource;
use crate::error::EngineError;
use crate::types::{Execution, KpiSnapshot};

/// How a KPI value is compared against its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Comparator {
    /// Trip when the KPI drops below the threshold
    Below,
    /// Trip when the KPI rises above the threshold
    Above,
}

/// Severity of a tripped rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    /// Recorded, does not stop the execution
    Warning,
    /// Aborts the execution it trips on
    Critical,
}

/// One entry of the safety rule table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyRule {
    /// KPI name as reported by telemetry
    pub kpi: String,
    /// Trip direction
    pub comparator: Comparator,
    /// Hard limit
    pub threshold: f64,
    /// Severity when tripped
    pub severity: Severity,
}

impl SafetyRule {
    /// Whether the given value trips this rule
    #[inline]
    #[must_use]
    pub fn trips(&self, value: f64) -> bool {
        match self.comparator {
            Comparator::Below => value < self.threshold,
            Comparator::Above => value > self.threshold,
        }
    }
}

/// A tripped rule applied to one snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyIssue {
    /// Issue classification, derived from the KPI name
    pub issue_type: String,
    /// Severity inherited from the rule
    pub severity: Severity,
    /// Human-readable description with the offending value
    pub description: String,
}

/// Result of a full safety condition evaluation
#[derive(Debug, Clone)]
pub struct SafetyVerdict {
    /// All conditions hold
    pub safe: bool,
    /// First blocking condition, when unsafe
    pub reason: Option<String>,
}

/// Default hard limits; deployments override via [`crate::EngineConfig`]
#[must_use]
pub fn default_rules() -> Vec<SafetyRule> {
    vec![
        SafetyRule {
            kpi: "rsrp_dbm".to_string(),
            comparator: Comparator::Below,
            threshold: -110.0,
            severity: Severity::Critical,
        },
        SafetyRule {
            kpi: "sinr_db".to_string(),
            comparator: Comparator::Below,
            threshold: 0.0,
            severity: Severity::Critical,
        },
        SafetyRule {
            kpi: "dl_latency_ms".to_string(),
            comparator: Comparator::Above,
            threshold: 100.0,
            severity: Severity::Critical,
        },
        SafetyRule {
            kpi: "prb_utilization".to_string(),
            comparator: Comparator::Above,
            threshold: 0.95,
            severity: Severity::Warning,
        },
    ]
}

/// Evaluates safety conditions for active executions
pub struct SafetyMonitor {
    rules: Vec<SafetyRule>,
    telemetry: Arc<dyn TelemetrySource>,
}

impl SafetyMonitor {
    /// Create a monitor over the given rule table
    #[inline]
    #[must_use]
    pub fn new(rules: Vec<SafetyRule>, telemetry: Arc<dyn TelemetrySource>) -> Self {
        Self { rules, telemetry }
    }

    /// Apply the rule table to a single snapshot
    #[must_use]
    pub fn scan(&self, snapshot: &KpiSnapshot) -> Vec<SafetyIssue> {
        let mut issues = Vec::new();
        for rule in &self.rules {
            let Some(value) = snapshot.get(&rule.kpi) else {
                continue;
            };
            if rule.trips(value) {
                issues.push(SafetyIssue {
                    issue_type: format!("{}-limit", rule.kpi),
                    severity: rule.severity,
                    description: format!(
                        "{} = {value:.2} violates {:?} {:.2}",
                        rule.kpi, rule.comparator, rule.threshold
                    ),
                });
            }
        }
        issues
    }

    /// First critical issue in a scan result, if any
    #[inline]
    #[must_use]
    pub fn first_critical(issues: &[SafetyIssue]) -> Option<&SafetyIssue> {
        issues.iter().find(|i| i.severity == Severity::Critical)
    }

    /// Pre-flight checks run during preparation
    ///
    /// Fails the phase when any stop condition is already tripped, before
    /// anything has been mutated.
    pub async fn initial_checks(&self, execution: &mut Execution) -> Result<(), EngineError> {
        let snapshot = self.telemetry.snapshot(&execution.target_element).await?;
        let issues = self.scan(&snapshot);
        self.record_issues(execution, &issues);

        if let Some(critical) = Self::first_critical(&issues) {
            execution.safety.checks_failed += 1;
            return Err(EngineError::Validation(format!(
                "pre-flight stop condition: {}",
                critical.description
            )));
        }
        execution.safety.checks_passed += 1;
        Ok(())
    }

    /// Full safety condition evaluation run during validation
    pub async fn safety_conditions(
        &self,
        execution: &mut Execution,
    ) -> Result<SafetyVerdict, EngineError> {
        let snapshot = self.telemetry.snapshot(&execution.target_element).await?;
        let issues = self.scan(&snapshot);
        self.record_issues(execution, &issues);

        match Self::first_critical(&issues) {
            Some(critical) => Ok(SafetyVerdict {
                safe: false,
                reason: Some(critical.description.clone()),
            }),
            None => Ok(SafetyVerdict {
                safe: true,
                reason: None,
            }),
        }
    }

    /// Periodic sweep over one active execution, independent of phase
    ///
    /// Catches externally caused regressions; findings are recorded on the
    /// execution so the learner counts them as anomalies. Aborting is left
    /// to the implementation-phase scan and the watchdog.
    pub async fn ongoing_monitor(&self, execution: &mut Execution) {
        let snapshot = match self.telemetry.snapshot(&execution.target_element).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(execution = %execution.id, %err, "safety sweep could not sample telemetry");
                return;
            }
        };
        let issues = self.scan(&snapshot);
        if !issues.is_empty() {
            warn!(
                execution = %execution.id,
                issues = issues.len(),
                "safety sweep found degraded KPIs"
            );
        }
        self.record_issues(execution, &issues);
    }

    pub(crate) fn record_issues(&self, execution: &mut Execution, issues: &[SafetyIssue]) {
        for issue in issues {
            match issue.severity {
                Severity::Warning => execution.safety.warnings.push(issue.description.clone()),
                Severity::Critical => {
                    execution
                        .safety
                        .stop_conditions
                        .push(issue.description.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn snapshot(pairs: &[(&str, f64)]) -> KpiSnapshot {
        let kpis: HashMap<String, f64> =
            pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        KpiSnapshot::now(kpis)
    }

    struct NullTelemetry;

    #[async_trait::async_trait]
    impl crate::element::TelemetrySource for NullTelemetry {
        async fn snapshot(
            &self,
            _element: &crate::types::ElementId,
        ) -> Result<KpiSnapshot, crate::error::AccessorError> {
            Ok(snapshot(&[("sinr_db", 12.0)]))
        }
    }

    fn monitor() -> SafetyMonitor {
        SafetyMonitor::new(default_rules(), Arc::new(NullTelemetry))
    }

    #[test]
    fn healthy_snapshot_trips_nothing() {
        let issues = monitor().scan(&snapshot(&[
            ("rsrp_dbm", -85.0),
            ("sinr_db", 15.0),
            ("dl_latency_ms", 20.0),
        ]));
        assert!(issues.is_empty());
    }

    #[test]
    fn negative_sinr_is_critical() {
        let issues = monitor().scan(&snapshot(&[("sinr_db", -5.0)]));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert!(SafetyMonitor::first_critical(&issues).is_some());
    }

    #[test]
    fn latency_ceiling_and_rsrp_floor() {
        let issues = monitor().scan(&snapshot(&[
            ("dl_latency_ms", 250.0),
            ("rsrp_dbm", -120.0),
        ]));
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.severity == Severity::Critical));
    }

    #[test]
    fn missing_kpis_are_skipped() {
        let issues = monitor().scan(&snapshot(&[("unrelated_kpi", 1.0)]));
        assert!(issues.is_empty());
    }

    #[test]
    fn warning_rules_do_not_block() {
        let issues = monitor().scan(&snapshot(&[("prb_utilization", 0.99)]));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert!(SafetyMonitor::first_critical(&issues).is_none());
    }

    #[test]
    fn custom_rule_table_is_honored() {
        let rules = vec![SafetyRule {
            kpi: "temperature_c".to_string(),
            comparator: Comparator::Above,
            threshold: 70.0,
            severity: Severity::Critical,
        }];
        let monitor = SafetyMonitor::new(rules, Arc::new(NullTelemetry));
        let issues = monitor.scan(&snapshot(&[("temperature_c", 85.0), ("sinr_db", -5.0)]));
        // Only the injected rule applies; the default SINR floor is gone.
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, "temperature_c-limit");
    }
}
