//! Invariant checks across the execution lifecycle
//!
//! Uses a recording accessor to observe the exact read/write sequence the
//! engine issues against the element.

use std::sync::Arc;
use std::time::Duration;

use cloe_engine::harness::SimulatedElement;
use cloe_engine::prelude::*;
use cloe_test_utils::{
    assert_status, decision_with_params, fast_config, kpis, wait_for_terminal, AccessOp,
    RecordingAccessor, ScriptedTelemetry,
};

const TERMINAL_BUDGET: Duration = Duration::from_secs(10);

fn healthy() -> KpiSnapshot {
    kpis(&[
        ("rsrp_dbm", -85.0),
        ("sinr_db", 12.0),
        ("dl_latency_ms", 25.0),
        ("throughput_mbps", 20.0),
    ])
}

fn sinr_collapsed() -> KpiSnapshot {
    kpis(&[("sinr_db", -5.0), ("throughput_mbps", 20.0)])
}

fn two_param_decision() -> (Decision, Strategy) {
    decision_with_params(
        "cell-1",
        vec![
            ("tx_power_dbm", ParamValue::Number(20.0)),
            ("antenna_tilt_deg", ParamValue::Number(6.0)),
        ],
    )
}

/// Every original is read and captured before the first write happens,
/// and the captured keys are exactly the planned parameters.
#[tokio::test]
async fn originals_are_snapshotted_before_any_write() {
    let element = Arc::new(SimulatedElement::seeded("cell-1", 3));
    let recording = Arc::new(RecordingAccessor::new(element.clone()));
    let scheduler = ExecutionScheduler::new(
        fast_config().with_verification_timeout(Duration::from_millis(50)),
        recording.clone(),
        element,
        Arc::new(MemoryPatternStore::new()),
    );

    let (decision, strategy) = two_param_decision();
    let id = scheduler.submit(&decision, &strategy).unwrap();
    let execution = wait_for_terminal(&scheduler, id, TERMINAL_BUDGET).await;

    assert_status(&execution, ExecutionStatus::Completed);

    let ops = recording.ops();
    let first_write = ops
        .iter()
        .position(|op| matches!(op, AccessOp::Write(_, _)))
        .expect("implementation never wrote");
    for (index, op) in ops.iter().enumerate() {
        if matches!(op, AccessOp::Read(_)) {
            assert!(index < first_write, "read after first write: {op:?}");
        }
    }

    let mut captured: Vec<&String> = execution.rollback.original_values.keys().collect();
    captured.sort();
    assert_eq!(captured, vec!["antenna_tilt_deg", "tx_power_dbm"]);
    assert_eq!(
        execution.rollback.original_values["tx_power_dbm"],
        ParamValue::Number(10.0)
    );

    // Writes are sequential and deterministically ordered.
    assert_eq!(
        recording.writes(),
        vec![
            ("antenna_tilt_deg".to_string(), ParamValue::Number(6.0)),
            ("tx_power_dbm".to_string(), ParamValue::Number(20.0)),
        ]
    );
}

/// A strategy with an invalid target never reaches the write path.
#[tokio::test]
async fn invalid_target_never_mutates_the_element() {
    let element = Arc::new(SimulatedElement::seeded("cell-1", 3));
    let recording = Arc::new(RecordingAccessor::new(element.clone()));
    let scheduler = ExecutionScheduler::new(
        fast_config(),
        recording.clone(),
        element.clone(),
        Arc::new(MemoryPatternStore::new()),
    );

    let (decision, strategy) = decision_with_params(
        "cell-1",
        vec![("tx_power_dbm", ParamValue::Number(-5.0))],
    );
    let id = scheduler.submit(&decision, &strategy).unwrap();
    let execution = wait_for_terminal(&scheduler, id, TERMINAL_BUDGET).await;

    assert_status(&execution, ExecutionStatus::Failed);
    assert!(!execution.rollback.triggered);
    assert!(recording.writes().is_empty());
    assert_eq!(
        element.parameter("tx_power_dbm"),
        Some(ParamValue::Number(10.0))
    );
    assert!(execution.safety.checks_failed >= 1);
}

/// After a mid-implementation abort, every captured original is written
/// back with its original value.
#[tokio::test]
async fn rollback_restores_every_captured_key() {
    let element = Arc::new(SimulatedElement::seeded("cell-1", 3));
    let recording = Arc::new(RecordingAccessor::new(element.clone()));
    let telemetry = Arc::new(ScriptedTelemetry::new(vec![
        healthy(),
        healthy(),
        sinr_collapsed(),
    ]));
    let scheduler = ExecutionScheduler::new(
        fast_config(),
        recording.clone(),
        telemetry,
        Arc::new(MemoryPatternStore::new()),
    );

    let (decision, strategy) = two_param_decision();
    let id = scheduler.submit(&decision, &strategy).unwrap();
    let execution = wait_for_terminal(&scheduler, id, TERMINAL_BUDGET).await;

    assert_status(&execution, ExecutionStatus::RolledBack);

    let writes = recording.writes();
    assert_eq!(writes.len(), 4, "two applies plus two restores: {writes:?}");
    assert_eq!(
        &writes[2..],
        &[
            ("antenna_tilt_deg".to_string(), ParamValue::Number(4.0)),
            ("tx_power_dbm".to_string(), ParamValue::Number(10.0)),
        ]
    );
    assert_eq!(
        element.parameter("tx_power_dbm"),
        Some(ParamValue::Number(10.0))
    );
}

/// Accessor that rejects restoring one specific original value
struct RejectRestoreAccessor {
    inner: Arc<SimulatedElement>,
    victim: String,
    original: ParamValue,
}

#[async_trait::async_trait]
impl cloe_engine::element::ParameterAccessor for RejectRestoreAccessor {
    async fn read(
        &self,
        element: &ElementId,
        name: &str,
    ) -> Result<ParamValue, cloe_engine::AccessorError> {
        self.inner.read(element, name).await
    }

    async fn write(
        &self,
        element: &ElementId,
        name: &str,
        value: ParamValue,
    ) -> Result<(), cloe_engine::AccessorError> {
        if name == self.victim && value == self.original {
            return Err(cloe_engine::AccessorError::WriteRejected {
                name: name.to_string(),
                reason: "element refused the restore".to_string(),
            });
        }
        self.inner.write(element, name, value).await
    }
}

/// One failed restore is recorded as a warning and the remaining keys are
/// still restored.
#[tokio::test]
async fn failed_restore_warns_but_does_not_halt() {
    let element = Arc::new(SimulatedElement::seeded("cell-1", 3));
    let accessor = Arc::new(RejectRestoreAccessor {
        inner: element.clone(),
        victim: "tx_power_dbm".to_string(),
        original: ParamValue::Number(10.0),
    });
    let telemetry = Arc::new(ScriptedTelemetry::new(vec![
        healthy(),
        healthy(),
        sinr_collapsed(),
    ]));
    let scheduler = ExecutionScheduler::new(
        fast_config(),
        accessor,
        telemetry,
        Arc::new(MemoryPatternStore::new()),
    );

    let (decision, strategy) = two_param_decision();
    let id = scheduler.submit(&decision, &strategy).unwrap();
    let execution = wait_for_terminal(&scheduler, id, TERMINAL_BUDGET).await;

    assert_status(&execution, ExecutionStatus::RolledBack);
    assert!(execution.rollback.triggered);
    assert!(execution
        .safety
        .warnings
        .iter()
        .any(|w| w.contains("tx_power_dbm")));
    // The other key was still restored.
    assert_eq!(
        element.parameter("antenna_tilt_deg"),
        Some(ParamValue::Number(4.0))
    );
    // The victim kept its applied value.
    assert_eq!(
        element.parameter("tx_power_dbm"),
        Some(ParamValue::Number(20.0))
    );
}

/// The active set never exceeds the configured bound while the queue
/// drains everything submitted.
#[tokio::test]
async fn concurrency_bound_is_respected() {
    let element = Arc::new(SimulatedElement::seeded("cell-1", 3));
    element.set_write_delay(Duration::from_millis(200));
    let scheduler = ExecutionScheduler::new(
        fast_config()
            .with_max_concurrent(2)
            .with_verification_timeout(Duration::from_millis(50)),
        element.clone(),
        element.clone(),
        Arc::new(MemoryPatternStore::new()),
    );

    for _ in 0..5 {
        let (decision, strategy) = decision_with_params(
            "cell-1",
            vec![("tx_power_dbm", ParamValue::Number(20.0))],
        );
        scheduler.submit(&decision, &strategy).unwrap();
    }

    let mut max_active = 0usize;
    let mut saw_queued = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let status = scheduler.status();
        max_active = max_active.max(status.active_count);
        saw_queued |= status.queued_count > 0;
        if status.total_archived == 5 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "queue never drained: {status:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(max_active <= 2, "bound exceeded: {max_active}");
    assert!(saw_queued, "queue depth was never observed");
    assert_eq!(scheduler.status().total_archived, 5);
}

/// A queued execution can be cancelled; it is archived, not dropped.
#[tokio::test]
async fn pending_execution_can_be_cancelled() {
    let element = Arc::new(SimulatedElement::seeded("cell-1", 3));
    element.set_write_delay(Duration::from_millis(300));
    let scheduler = ExecutionScheduler::new(
        fast_config()
            .with_max_concurrent(1)
            .with_verification_timeout(Duration::from_millis(50)),
        element.clone(),
        element.clone(),
        Arc::new(MemoryPatternStore::new()),
    );

    let (decision, strategy) = decision_with_params(
        "cell-1",
        vec![("tx_power_dbm", ParamValue::Number(20.0))],
    );
    let first = scheduler.submit(&decision, &strategy).unwrap();
    let second = scheduler.submit(&decision, &strategy).unwrap();

    scheduler.cancel(second).await.unwrap();

    let cancelled = scheduler
        .execution(second)
        .await
        .expect("cancelled execution is archived");
    assert_status(&cancelled, ExecutionStatus::Failed);
    assert!(cancelled
        .safety
        .warnings
        .iter()
        .any(|w| w.contains("cancelled")));

    let finished = wait_for_terminal(&scheduler, first, TERMINAL_BUDGET).await;
    assert_status(&finished, ExecutionStatus::Completed);
}
