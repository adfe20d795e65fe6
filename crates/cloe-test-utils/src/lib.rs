//! Testing utilities for the CLOE workspace
//!
//! Shared fixtures, fakes, and assertions.

#![allow(missing_docs)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use cloe_engine::element::{ParameterAccessor, TelemetrySource};
use cloe_engine::error::AccessorError;
use cloe_engine::{
    Decision, ElementId, EngineConfig, Execution, ExecutionId, ExecutionStatus, ExpectedImpact,
    ExecutionScheduler, KpiSnapshot, ParamValue, Strategy,
};
use parking_lot::Mutex;

/// Engine configuration with short windows, suitable for tests
pub fn fast_config() -> EngineConfig {
    EngineConfig::new()
        .with_max_concurrent(2)
        .with_execution_timeout(Duration::from_secs(10))
        .with_verification_timeout(Duration::from_millis(300))
        .with_sampling_interval(Duration::from_millis(25))
}

/// Decision plus strategy targeting the given parameters
pub fn decision_with_params(
    element: &str,
    params: Vec<(&str, ParamValue)>,
) -> (Decision, Strategy) {
    let params: HashMap<String, ParamValue> = params
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();
    (
        Decision::new("test-decision", "test-strategy", ElementId::new(element)),
        Strategy::parameter_change(params),
    )
}

/// Power step decision claiming a throughput gain
pub fn power_step_decision(element: &str, target_dbm: f64) -> (Decision, Strategy) {
    let (decision, strategy) =
        decision_with_params(element, vec![("tx_power_dbm", ParamValue::Number(target_dbm))]);
    let strategy = strategy.with_impact(ExpectedImpact {
        objective_id: "throughput_mbps".to_string(),
        impact_value: 5.0,
        time_to_effect_secs: 1,
    });
    (decision, strategy)
}

/// KPI snapshot from name/value pairs
pub fn kpis(pairs: &[(&str, f64)]) -> KpiSnapshot {
    let map: HashMap<String, f64> = pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect();
    KpiSnapshot::now(map)
}

/// Poll the scheduler until the execution reaches a terminal status
pub async fn wait_for_terminal(
    scheduler: &ExecutionScheduler,
    id: ExecutionId,
    budget: Duration,
) -> Execution {
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        if let Some(execution) = scheduler.execution(id).await {
            if execution.status.is_terminal() {
                return execution;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "execution {id} did not reach a terminal status within {budget:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Assert helper: execution finished with the expected status
pub fn assert_status(execution: &Execution, expected: ExecutionStatus) {
    assert_eq!(
        execution.status, expected,
        "unexpected terminal status; warnings: {:?}, stop conditions: {:?}",
        execution.safety.warnings, execution.safety.stop_conditions
    );
}

/// One recorded accessor operation
#[derive(Debug, Clone, PartialEq)]
pub enum AccessOp {
    Read(String),
    Write(String, ParamValue),
}

/// Accessor wrapper that records every read and write in order
pub struct RecordingAccessor {
    inner: Arc<dyn ParameterAccessor>,
    ops: Mutex<Vec<AccessOp>>,
}

impl RecordingAccessor {
    pub fn new(inner: Arc<dyn ParameterAccessor>) -> Self {
        Self {
            inner,
            ops: Mutex::new(Vec::new()),
        }
    }

    /// All operations in call order
    pub fn ops(&self) -> Vec<AccessOp> {
        self.ops.lock().clone()
    }

    /// Written (name, value) pairs in call order
    pub fn writes(&self) -> Vec<(String, ParamValue)> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                AccessOp::Write(name, value) => Some((name.clone(), value.clone())),
                AccessOp::Read(_) => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl ParameterAccessor for RecordingAccessor {
    async fn read(&self, element: &ElementId, name: &str) -> Result<ParamValue, AccessorError> {
        self.ops.lock().push(AccessOp::Read(name.to_string()));
        self.inner.read(element, name).await
    }

    async fn write(
        &self,
        element: &ElementId,
        name: &str,
        value: ParamValue,
    ) -> Result<(), AccessorError> {
        self.ops
            .lock()
            .push(AccessOp::Write(name.to_string(), value.clone()));
        self.inner.write(element, name, value).await
    }
}

/// Telemetry source that plays back scripted frames, then repeats the last
pub struct ScriptedTelemetry {
    frames: Mutex<VecDeque<KpiSnapshot>>,
    last: Mutex<Option<KpiSnapshot>>,
}

impl ScriptedTelemetry {
    pub fn new(frames: Vec<KpiSnapshot>) -> Self {
        Self {
            frames: Mutex::new(frames.into()),
            last: Mutex::new(None),
        }
    }
}

#[async_trait::async_trait]
impl TelemetrySource for ScriptedTelemetry {
    async fn snapshot(&self, element: &ElementId) -> Result<KpiSnapshot, AccessorError> {
        if let Some(frame) = self.frames.lock().pop_front() {
            *self.last.lock() = Some(frame.clone());
            return Ok(frame);
        }
        self.last
            .lock()
            .clone()
            .ok_or_else(|| AccessorError::TelemetryUnavailable(element.to_string()))
    }
}
