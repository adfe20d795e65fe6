//! Outcome scoring and fleet-wide learning
//!
//! Scores the effectiveness of terminal executions, produces lessons for
//! the pattern store, and aggregates rolling fleet metrics over the most
//! recent archived executions.

use serde::{Deserialize, Serialize};
use parking_lot::Mutex;

use crate::error::StoreError;
use crate::types::{
    ActionType, ElementId, Execution, ExecutionId, ExecutionStatus, LearningResult,
};

/// Persists learning outcomes for future decision-making
///
/// Calls are fire-and-forget from the engine's point of view: a store
/// failure is logged and never fails the execution.
#[async_trait::async_trait]
pub trait PatternStore: Send + Sync {
    /// Persist one execution outcome
    async fn record(&self, outcome: &ExecutionOutcome) -> Result<(), StoreError>;
}

/// Compact archival record pushed to the pattern store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Execution id
    pub execution_id: ExecutionId,
    /// Originating decision reference
    pub decision_ref: String,
    /// Element that was changed
    pub target_element: ElementId,
    /// Declared action kind
    pub action_type: ActionType,
    /// Terminal status
    pub status: ExecutionStatus,
    /// Effectiveness score in [0, 1]
    pub effectiveness_score: f64,
    /// Upstream strategy generation should be informed
    pub adaptation_needed: bool,
    /// Lessons produced by the learner
    pub lessons: Vec<String>,
    /// Whether original values were restored
    pub rollback_triggered: bool,
    /// Wall-clock duration in milliseconds, if the execution ended
    pub duration_ms: Option<i64>,
}

impl ExecutionOutcome {
    /// Build the archival record from a terminal execution
    #[must_use]
    pub fn from_execution(execution: &Execution) -> Self {
        let duration_ms = execution
            .ended_at
            .map(|end| (end - execution.started_at).num_milliseconds());
        Self {
            execution_id: execution.id,
            decision_ref: execution.decision_ref.clone(),
            target_element: execution.target_element.clone(),
            action_type: execution.action_type,
            status: execution.status,
            effectiveness_score: execution.learning.effectiveness_score,
            adaptation_needed: execution.learning.adaptation_needed,
            lessons: execution.learning.lessons.clone(),
            rollback_triggered: execution.rollback.triggered,
            duration_ms,
        }
    }
}

/// In-memory pattern store for testing and simulation
#[derive(Debug, Default)]
pub struct MemoryPatternStore {
    outcomes: Mutex<Vec<ExecutionOutcome>>,
}

impl MemoryPatternStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far
    #[must_use]
    pub fn outcomes(&self) -> Vec<ExecutionOutcome> {
        self.outcomes.lock().clone()
    }
}

#[async_trait::async_trait]
impl PatternStore for MemoryPatternStore {
    async fn record(&self, outcome: &ExecutionOutcome) -> Result<(), StoreError> {
        self.outcomes.lock().push(outcome.clone());
        Ok(())
    }
}

/// Effectiveness band boundaries
const HIGHLY_EFFECTIVE: f64 = 0.7;
const MODERATELY_EFFECTIVE: f64 = 0.4;

/// Scores completed executions and produces lessons
pub struct OutcomeLearner {
    adaptation_enabled: bool,
}

impl OutcomeLearner {
    /// Create a learner; `adaptation_enabled` gates the adaptation flag
    #[inline]
    #[must_use]
    pub fn new(adaptation_enabled: bool) -> Self {
        Self { adaptation_enabled }
    }

    /// Score one execution from its measured impact
    ///
    /// Effectiveness is the fraction of measured KPIs whose observed
    /// direction matched the claim, or 0 when nothing was measurable.
    #[must_use]
    pub fn score(&self, execution: &Execution) -> LearningResult {
        let measured = &execution.impact.measured;
        let total = measured.len();
        let matched = measured.iter().filter(|m| m.achieved).count();
        let effectiveness_score = if total == 0 {
            0.0
        } else {
            matched as f64 / total as f64
        };

        let mut lessons = Vec::new();
        let mut adaptation_needed = false;
        if effectiveness_score > HIGHLY_EFFECTIVE {
            lessons.push(format!(
                "highly effective: {matched}/{total} expected KPI movements confirmed"
            ));
        } else if effectiveness_score >= MODERATELY_EFFECTIVE {
            lessons.push(format!(
                "moderately effective: {matched}/{total} expected KPI movements confirmed"
            ));
        } else {
            lessons.push(format!(
                "ineffective: {matched}/{total} expected KPI movements confirmed"
            ));
            adaptation_needed = self.adaptation_enabled;
        }

        let anomalies =
            execution.safety.warnings.len() + execution.safety.stop_conditions.len();
        if anomalies > 0 {
            lessons.push(format!("{anomalies} anomalies observed during execution"));
        }

        LearningResult {
            effectiveness_score,
            adaptation_needed,
            lessons,
        }
    }
}

/// Rolling fleet-wide metrics over recently archived executions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetMetrics {
    /// Fraction of archived executions that completed
    pub success_rate: f64,
    /// Fraction of archived executions that were rolled back
    pub rollback_rate: f64,
    /// Mean effectiveness score
    pub avg_improvement: f64,
    /// Number of executions the metrics were computed over
    pub sample_count: usize,
}

impl FleetMetrics {
    /// Compute metrics over the most recent `window` executions
    #[must_use]
    pub fn compute<'a, I>(archived: I, window: usize) -> Self
    where
        I: IntoIterator<Item = &'a Execution>,
        I::IntoIter: DoubleEndedIterator,
    {
        let recent: Vec<&Execution> = archived.into_iter().rev().take(window).collect();
        let total = recent.len();
        if total == 0 {
            return Self::default();
        }

        let completed = recent
            .iter()
            .filter(|e| e.status == ExecutionStatus::Completed)
            .count();
        let rolled_back = recent
            .iter()
            .filter(|e| e.status == ExecutionStatus::RolledBack)
            .count();
        let score_sum: f64 = recent
            .iter()
            .map(|e| e.learning.effectiveness_score)
            .sum();

        Self {
            success_rate: completed as f64 / total as f64,
            rollback_rate: rolled_back as f64 / total as f64,
            avg_improvement: score_sum / total as f64,
            sample_count: total,
        }
    }
}
