//! Phase sequence for a single execution
//!
//! Each execution advances through preparation, validation,
//! implementation, verification, and finalization in strict order.
//! Failure of any phase except verification fails the execution;
//! verification records what it saw and never throws.

use std::time::Instant;

use tracing::debug;

use crate::error::EngineError;
use crate::safety::SafetyMonitor;
use crate::types::{
    ExecutionId, ExecutionPhase, ExecutionStatus, ImpactClaim, ImpactDirection,
    ImpactObservation, KpiSnapshot, ParamValue,
};

use super::{SchedulerInner, SharedExecution};

/// Drives one execution through its five phases
pub(super) struct PhaseRunner {
    pub(super) inner: std::sync::Arc<SchedulerInner>,
}

impl PhaseRunner {
    /// Run all phases in order
    ///
    /// Verification cannot fail; every other phase error propagates to the
    /// caller, which handles rollback and archival.
    pub(super) async fn run(
        &self,
        id: ExecutionId,
        record: &SharedExecution,
    ) -> Result<(), EngineError> {
        self.prepare(id, record).await?;
        self.validate(record).await?;
        self.implement(record).await?;
        self.verify(id, record).await;
        self.finalize(id, record).await;

        let mut execution = record.lock().await;
        execution.finish(ExecutionStatus::Completed);
        Ok(())
    }

    /// Snapshot originals, register feedback collection, initial safety checks
    async fn prepare(&self, id: ExecutionId, record: &SharedExecution) -> Result<(), EngineError> {
        let (element, names) = {
            let mut execution = record.lock().await;
            execution.status = ExecutionStatus::Executing;
            execution.enter_phase(ExecutionPhase::Preparation);
            let mut names: Vec<String> = execution.parameters.keys().cloned().collect();
            names.sort();
            (execution.target_element.clone(), names)
        };

        // Originals are captured before anything is mutated.
        for name in &names {
            let value = self.inner.accessor.read(&element, name).await?;
            let mut execution = record.lock().await;
            execution
                .rollback
                .original_values
                .insert(name.clone(), value.clone());
            if let Some(change) = execution.parameters.get_mut(name) {
                change.previous = Some(value);
            }
        }
        record.lock().await.rollback.available = true;

        self.inner.feedback.start_collection(id);

        let mut execution = record.lock().await;
        self.inner.safety.initial_checks(&mut execution).await
    }

    /// Type/range-check every target, then the full safety condition check
    ///
    /// Any failure aborts before a single parameter has been written.
    async fn validate(&self, record: &SharedExecution) -> Result<(), EngineError> {
        {
            let mut execution = record.lock().await;
            execution.enter_phase(ExecutionPhase::Validation);

            let mut targets: Vec<(String, ParamValue)> = execution
                .parameters
                .iter()
                .map(|(name, change)| (name.clone(), change.target.clone()))
                .collect();
            targets.sort_by(|a, b| a.0.cmp(&b.0));

            for (name, target) in targets {
                if target.is_valid_target() {
                    execution.safety.checks_passed += 1;
                } else {
                    execution.safety.checks_failed += 1;
                    return Err(EngineError::Validation(format!(
                        "invalid target for {name}: {target}"
                    )));
                }
            }
        }

        let mut execution = record.lock().await;
        let verdict = self.inner.safety.safety_conditions(&mut execution).await?;
        if verdict.safe {
            execution.safety.checks_passed += 1;
            Ok(())
        } else {
            execution.safety.checks_failed += 1;
            Err(EngineError::Validation(
                verdict
                    .reason
                    .unwrap_or_else(|| "safety conditions not met".to_string()),
            ))
        }
    }

    /// Write targets one at a time, then run the post-write critical scan
    async fn implement(&self, record: &SharedExecution) -> Result<(), EngineError> {
        let (element, writes) = {
            let mut execution = record.lock().await;
            execution.enter_phase(ExecutionPhase::Implementation);
            let mut writes: Vec<(String, ParamValue)> = execution
                .parameters
                .iter()
                .map(|(name, change)| (name.clone(), change.target.clone()))
                .collect();
            writes.sort_by(|a, b| a.0.cmp(&b.0));
            (execution.target_element.clone(), writes)
        };

        // Sequential writes bound the blast radius of a bad change.
        for (name, target) in writes {
            self.inner
                .accessor
                .write(&element, &name, target.clone())
                .await?;
            let mut execution = record.lock().await;
            if let Some(change) = execution.parameters.get_mut(&name) {
                debug_assert!(change.current.is_none(), "current set twice for {name}");
                change.current = Some(target);
            }
        }

        let snapshot = self.inner.telemetry.snapshot(&element).await?;
        let issues = self.inner.safety.scan(&snapshot);
        let mut execution = record.lock().await;
        self.inner.safety.record_issues(&mut execution, &issues);
        if let Some(critical) = SafetyMonitor::first_critical(&issues) {
            execution.safety.checks_failed += 1;
            return Err(EngineError::SafetyAbort(critical.description.clone()));
        }
        execution.safety.checks_passed += 1;
        Ok(())
    }

    /// Poll KPIs until the expected impact is observed or the window closes
    async fn verify(&self, id: ExecutionId, record: &SharedExecution) {
        let (element, claims) = {
            let mut execution = record.lock().await;
            execution.enter_phase(ExecutionPhase::Verification);
            (
                execution.target_element.clone(),
                execution.impact.expected.clone(),
            )
        };

        let deadline = Instant::now() + self.inner.config.verification_timeout;
        loop {
            match self.inner.telemetry.snapshot(&element).await {
                Ok(snapshot) => {
                    self.inner.feedback.record(id, snapshot);
                    if impact_observed(&claims, &self.inner.feedback.samples(id)) {
                        debug!(execution = %id, "expected impact observed before timeout");
                        break;
                    }
                }
                Err(err) => {
                    let mut execution = record.lock().await;
                    execution
                        .safety
                        .warnings
                        .push(format!("verification sample failed: {err}"));
                }
            }

            match deadline.checked_duration_since(Instant::now()) {
                None => break,
                Some(remaining) => {
                    let nap = remaining.min(self.inner.config.feedback_sampling_interval);
                    tokio::time::sleep(nap).await;
                }
            }
        }

        let samples = self.inner.feedback.samples(id);
        let measured = measure_impact(&claims, &samples);
        record.lock().await.impact.measured = measured;
    }

    /// Deregister feedback, score the outcome
    async fn finalize(&self, id: ExecutionId, record: &SharedExecution) {
        {
            let mut execution = record.lock().await;
            execution.enter_phase(ExecutionPhase::Finalization);
        }
        let samples = self.inner.feedback.stop_collection(id);
        let mut execution = record.lock().await;
        execution.feedback = samples;
        let learning = self.inner.learner.score(&execution);
        execution.learning = learning;
    }
}

/// Compare first and last samples per expected KPI
fn measure_impact(claims: &[ImpactClaim], samples: &[KpiSnapshot]) -> Vec<ImpactObservation> {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return Vec::new();
    };
    claims
        .iter()
        .filter_map(|claim| {
            let baseline = first.get(&claim.kpi)?;
            let observed = last.get(&claim.kpi)?;
            let delta = observed - baseline;
            let achieved = match claim.direction {
                ImpactDirection::Increase => delta > 0.0,
                ImpactDirection::Decrease => delta < 0.0,
            };
            Some(ImpactObservation {
                kpi: claim.kpi.clone(),
                baseline,
                observed,
                delta,
                achieved,
            })
        })
        .collect()
}

/// Early-exit condition for the verification loop
///
/// Every claimed KPI must have moved in the claimed direction with at
/// least half the claimed magnitude. Anything weaker keeps polling until
/// the window closes.
fn impact_observed(claims: &[ImpactClaim], samples: &[KpiSnapshot]) -> bool {
    if claims.is_empty() || samples.len() < 2 {
        return false;
    }
    let first = &samples[0];
    let last = &samples[samples.len() - 1];
    claims.iter().all(|claim| {
        let (Some(baseline), Some(observed)) = (first.get(&claim.kpi), last.get(&claim.kpi))
        else {
            return false;
        };
        let delta = observed - baseline;
        let direction_ok = match claim.direction {
            ImpactDirection::Increase => delta > 0.0,
            ImpactDirection::Decrease => delta < 0.0,
        };
        direction_ok && delta.abs() >= claim.magnitude * 0.5
    })
}
