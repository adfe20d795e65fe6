//! Simulated network element and end-to-end simulation runner
//!
//! The element keeps a live parameter map and derives its KPIs from it,
//! so applied changes actually move telemetry. Fault injection (rejected
//! writes, slow writes, degraded radio conditions) covers the abort and
//! rollback paths.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::element::{ParameterAccessor, TelemetrySource};
use crate::error::AccessorError;
use crate::learning::MemoryPatternStore;
use crate::scheduler::{EngineStatus, ExecutionScheduler};
use crate::types::{
    Decision, ElementId, EngineConfig, ExecutionStatus, ExpectedImpact, KpiSnapshot, ParamValue,
    Strategy,
};

/// In-memory network element for testing and simulation
///
/// Raising `tx_power_dbm` improves RSRP, SINR, and throughput and lowers
/// downlink latency; the degraded switch forces SINR below the hard floor
/// regardless of configuration.
pub struct SimulatedElement {
    id: ElementId,
    params: Mutex<HashMap<String, ParamValue>>,
    rejected_writes: Mutex<HashSet<String>>,
    degraded: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
    rng: Mutex<StdRng>,
}

impl SimulatedElement {
    /// Element with default parameters and seed 42
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::seeded(id, 42)
    }

    /// Element with a fixed noise seed for reproducible runs
    #[must_use]
    pub fn seeded(id: impl Into<String>, seed: u64) -> Self {
        let mut params = HashMap::new();
        params.insert("tx_power_dbm".to_string(), ParamValue::Number(10.0));
        params.insert("antenna_tilt_deg".to_string(), ParamValue::Number(4.0));
        params.insert("bandwidth_mhz".to_string(), ParamValue::Number(20.0));
        Self {
            id: ElementId::new(id),
            params: Mutex::new(params),
            rejected_writes: Mutex::new(HashSet::new()),
            degraded: AtomicBool::new(false),
            write_delay: Mutex::new(None),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Seed an extra parameter
    #[must_use]
    pub fn with_parameter(self, name: impl Into<String>, value: ParamValue) -> Self {
        self.params.lock().insert(name.into(), value);
        self
    }

    /// Force SINR below the hard floor on every snapshot
    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::Release);
    }

    /// Reject all future writes to the named parameter
    pub fn reject_writes_to(&self, name: impl Into<String>) {
        self.rejected_writes.lock().insert(name.into());
    }

    /// Delay every write, for exercising the watchdog
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock() = Some(delay);
    }

    /// Current value of a parameter, for assertions
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<ParamValue> {
        self.params.lock().get(name).cloned()
    }

    fn check_element(&self, element: &ElementId) -> Result<(), AccessorError> {
        if *element == self.id {
            Ok(())
        } else {
            Err(AccessorError::Unreachable(element.to_string()))
        }
    }
}

#[async_trait::async_trait]
impl ParameterAccessor for SimulatedElement {
    async fn read(&self, element: &ElementId, name: &str) -> Result<ParamValue, AccessorError> {
        self.check_element(element)?;
        self.params
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| AccessorError::ParameterNotFound(name.to_string()))
    }

    async fn write(
        &self,
        element: &ElementId,
        name: &str,
        value: ParamValue,
    ) -> Result<(), AccessorError> {
        self.check_element(element)?;
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.rejected_writes.lock().contains(name) {
            return Err(AccessorError::WriteRejected {
                name: name.to_string(),
                reason: "parameter locked by element".to_string(),
            });
        }
        self.params.lock().insert(name.to_string(), value);
        Ok(())
    }
}

#[async_trait::async_trait]
impl TelemetrySource for SimulatedElement {
    async fn snapshot(&self, element: &ElementId) -> Result<KpiSnapshot, AccessorError> {
        self.check_element(element)?;
        let power = self
            .params
            .lock()
            .get("tx_power_dbm")
            .and_then(|v| v.as_number())
            .unwrap_or(10.0);
        let noise = self.rng.lock().gen_range(-0.3..0.3);
        let boost = power - 10.0;

        let sinr = if self.degraded.load(Ordering::Acquire) {
            -5.0
        } else {
            8.0 + boost * 0.4 + noise
        };

        let mut kpis = HashMap::new();
        kpis.insert("rsrp_dbm".to_string(), -90.0 + boost + noise);
        kpis.insert("sinr_db".to_string(), sinr);
        kpis.insert(
            "throughput_mbps".to_string(),
            (20.0 + boost * 1.5 + noise).max(0.0),
        );
        kpis.insert(
            "dl_latency_ms".to_string(),
            (30.0 - boost * 0.5 + noise).max(1.0),
        );
        kpis.insert("prb_utilization".to_string(), 0.6);
        Ok(KpiSnapshot::now(kpis))
    }
}

/// Simulation configuration
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Decisions to run end to end
    pub decisions: u64,
    /// Noise seed
    pub seed: u64,
    /// Degrade radio conditions on every n-th decision, forcing aborts
    pub degrade_every: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            decisions: 20,
            seed: 42,
            degrade_every: Some(5),
        }
    }
}

/// Final report from a simulation run
#[derive(Debug, Clone)]
pub struct SimulationReport {
    /// Configuration the run used
    pub config: SimulationConfig,
    /// Decisions submitted
    pub submitted: u64,
    /// Executions that completed
    pub completed: u64,
    /// Executions that failed without restore
    pub failed: u64,
    /// Executions that were rolled back
    pub rolled_back: u64,
    /// Mean effectiveness over all terminal executions
    pub avg_effectiveness: f64,
    /// Scheduler status after the run drained
    pub final_status: EngineStatus,
}

impl SimulationReport {
    /// Every submitted decision reached a terminal state
    #[must_use]
    pub fn drained(&self) -> bool {
        self.completed + self.failed + self.rolled_back == self.submitted
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        report.push_str("=== CLOE Simulation Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Decisions Submitted: {}\n", self.submitted));
        report.push_str(&format!("Completed: {}\n", self.completed));
        report.push_str(&format!("Failed: {}\n", self.failed));
        report.push_str(&format!("Rolled Back: {}\n", self.rolled_back));
        report.push_str(&format!(
            "Average Effectiveness: {:.3}\n",
            self.avg_effectiveness
        ));
        report.push_str(&format!(
            "Fleet Success Rate: {:.3}\n",
            self.final_status.aggregate_metrics.success_rate
        ));
        report.push_str(&format!(
            "Fleet Rollback Rate: {:.3}\n",
            self.final_status.aggregate_metrics.rollback_rate
        ));
        report.push_str(&format!(
            "Archived Executions: {}\n",
            self.final_status.total_archived
        ));
        report
    }
}

/// Drive the engine end to end against a simulated element
pub async fn run_simulation(config: SimulationConfig) -> SimulationReport {
    let element = Arc::new(SimulatedElement::seeded("sim-cell-1", config.seed));
    let store = Arc::new(MemoryPatternStore::new());
    let engine_config = EngineConfig::new()
        .with_max_concurrent(2)
        .with_execution_timeout(Duration::from_secs(10))
        .with_verification_timeout(Duration::from_millis(300))
        .with_sampling_interval(Duration::from_millis(30));
    let scheduler = ExecutionScheduler::new(
        engine_config,
        element.clone(),
        element.clone(),
        store.clone(),
    );

    let mut submitted = 0u64;
    let mut completed = 0u64;
    let mut failed = 0u64;
    let mut rolled_back = 0u64;
    let mut score_sum = 0.0f64;

    for i in 0..config.decisions {
        let degrade = config
            .degrade_every
            .is_some_and(|n| n > 0 && (i + 1) % n == 0);
        element.set_degraded(degrade);

        // Alternate between boosting and trimming power.
        let target = if i % 2 == 0 { 20.0 } else { 12.0 };
        let mut params = HashMap::new();
        params.insert("tx_power_dbm".to_string(), ParamValue::Number(target));
        let strategy = Strategy::parameter_change(params).with_impact(ExpectedImpact {
            objective_id: "throughput_mbps".to_string(),
            impact_value: if target > 10.0 { 5.0 } else { -5.0 },
            time_to_effect_secs: 1,
        });
        let decision = Decision::new(
            format!("sim-decision-{i}"),
            format!("sim-strategy-{i}"),
            ElementId::new("sim-cell-1"),
        );

        let Ok(id) = scheduler.submit(&decision, &strategy) else {
            break;
        };
        submitted += 1;
        // Sequential runs keep the fault injection attributable.
        let execution = loop {
            if let Some(execution) = scheduler.execution(id).await {
                if execution.status.is_terminal() {
                    break execution;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        match execution.status {
            ExecutionStatus::Completed => completed += 1,
            ExecutionStatus::RolledBack => rolled_back += 1,
            _ => failed += 1,
        }
        score_sum += execution.learning.effectiveness_score;
    }
    element.set_degraded(false);

    let terminal = completed + failed + rolled_back;
    let avg_effectiveness = if terminal == 0 {
        0.0
    } else {
        score_sum / terminal as f64
    };
    let report = SimulationReport {
        config,
        submitted,
        completed,
        failed,
        rolled_back,
        avg_effectiveness,
        final_status: scheduler.status(),
    };
    info!(
        completed = report.completed,
        rolled_back = report.rolled_back,
        "simulation finished"
    );
    scheduler.shutdown();
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_element_reacts_to_power() {
        let element = SimulatedElement::seeded("cell-9", 7);
        let id = ElementId::new("cell-9");

        let before = element.snapshot(&id).await.unwrap();
        element
            .write(&id, "tx_power_dbm", ParamValue::Number(20.0))
            .await
            .unwrap();
        let after = element.snapshot(&id).await.unwrap();

        // +10 dBm beats the +-0.3 noise band on every derived KPI.
        assert!(after.get("throughput_mbps") > before.get("throughput_mbps"));
        assert!(after.get("rsrp_dbm") > before.get("rsrp_dbm"));
        assert!(after.get("dl_latency_ms") < before.get("dl_latency_ms"));
    }

    #[tokio::test]
    async fn degraded_element_trips_the_sinr_floor() {
        let element = SimulatedElement::seeded("cell-9", 7);
        let id = ElementId::new("cell-9");

        element.set_degraded(true);
        let snapshot = element.snapshot(&id).await.unwrap();
        assert_eq!(snapshot.get("sinr_db"), Some(-5.0));
    }

    #[tokio::test]
    async fn unknown_element_is_unreachable() {
        let element = SimulatedElement::seeded("cell-9", 7);
        let err = element
            .read(&ElementId::new("cell-404"), "tx_power_dbm")
            .await
            .unwrap_err();
        assert!(matches!(err, AccessorError::Unreachable(_)));
    }

    #[tokio::test]
    async fn simulation_drains_and_mixes_outcomes() {
        let report = run_simulation(SimulationConfig {
            decisions: 6,
            seed: 11,
            degrade_every: Some(3),
        })
        .await;

        assert!(report.drained());
        assert_eq!(report.submitted, 6);
        // Degraded decisions 3 and 6 cannot pass the pre-flight checks.
        assert_eq!(report.completed, 4);
        assert_eq!(report.completed + report.failed + report.rolled_back, 6);
        assert!(report.generate_text().contains("Decisions Submitted: 6"));
    }
}
