//! Core types for the execution engine
//!
//! Defines the fundamental types for the closed loop:
//! - Engine configuration
//! - Optimizer decisions and strategies
//! - The execution record and its lifecycle enums
//! - Impact claims and observations

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use ulid::Ulid;

use crate::safety::{default_rules, SafetyRule};

/// Unique execution identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Ulid);

impl ExecutionId {
    /// Generate new execution ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the network element being changed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementId(pub String);

impl ElementId {
    /// Create element ID from any string-like value
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum concurrently executing actions
    pub max_concurrent_executions: usize,
    /// Wall-clock budget for a whole execution, watchdog-enforced
    pub execution_timeout: Duration,
    /// Budget for the post-change verification window
    pub verification_timeout: Duration,
    /// Cadence of KPI sampling during verification
    pub feedback_sampling_interval: Duration,
    /// Cadence of the ongoing safety sweep over active executions
    pub safety_check_interval: Duration,
    /// Revert applied parameters when an execution fails
    pub enable_auto_rollback: bool,
    /// Flag lessons for upstream strategy adaptation
    pub enable_real_time_adaptation: bool,
    /// Per-execution feedback ring buffer capacity
    pub feedback_buffer_cap: usize,
    /// Number of recent archived executions folded into fleet metrics
    pub metrics_window: usize,
    /// Retention bound of the execution archive
    pub history_cap: usize,
    /// Safety rule table, injectable per deployment
    pub safety_rules: Vec<SafetyRule>,
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With max concurrent executions
    #[inline]
    #[must_use]
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_executions = max;
        self
    }

    /// With execution timeout
    #[inline]
    #[must_use]
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// With verification timeout
    #[inline]
    #[must_use]
    pub fn with_verification_timeout(mut self, timeout: Duration) -> Self {
        self.verification_timeout = timeout;
        self
    }

    /// With feedback sampling interval
    #[inline]
    #[must_use]
    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.feedback_sampling_interval = interval;
        self
    }

    /// With safety rule table
    #[inline]
    #[must_use]
    pub fn with_safety_rules(mut self, rules: Vec<SafetyRule>) -> Self {
        self.safety_rules = rules;
        self
    }

    /// With auto-rollback toggled
    #[inline]
    #[must_use]
    pub fn with_auto_rollback(mut self, enabled: bool) -> Self {
        self.enable_auto_rollback = enabled;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 3,
            execution_timeout: Duration::from_secs(300),
            verification_timeout: Duration::from_secs(120),
            feedback_sampling_interval: Duration::from_secs(5),
            safety_check_interval: Duration::from_secs(10),
            enable_auto_rollback: true,
            enable_real_time_adaptation: true,
            feedback_buffer_cap: 100,
            metrics_window: 50,
            history_cap: 1000,
            safety_rules: default_rules(),
        }
    }
}

/// Kind of optimization action, declared by the strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    /// Tune one or more configuration parameters
    ParameterChange,
    /// Switch a feature on or off
    FeatureActivation,
    /// Reassign spectrum, PRBs, or capacity
    ResourceAllocation,
    /// Change neighbor relations or cell topology
    TopologyModification,
}

/// Terminal and in-flight states of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    /// Queued, not yet dispatched
    Pending,
    /// Dispatched, advancing through phases
    Executing,
    /// All phases finished
    Completed,
    /// A phase failed or the watchdog fired
    Failed,
    /// Failed and original values restored
    RolledBack,
}

impl ExecutionStatus {
    /// Whether this status is terminal
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }
}

/// Phase of an executing action; advances strictly forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionPhase {
    /// Snapshot originals, register feedback, initial safety checks
    Preparation,
    /// Type/range checks and full safety condition evaluation
    Validation,
    /// Sequential parameter writes plus post-write critical scan
    Implementation,
    /// Bounded KPI polling window
    Verification,
    /// Feedback teardown and outcome scoring
    Finalization,
}

/// A configuration parameter value
///
/// Numeric values must be finite and non-negative to pass validation;
/// booleans are always valid; text must be non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Numeric setting (power, tilt, bandwidth, ...)
    Number(f64),
    /// On/off toggle
    Bool(bool),
    /// Named mode or profile
    Text(String),
}

impl ParamValue {
    /// Whether this value passes target validation
    #[must_use]
    pub fn is_valid_target(&self) -> bool {
        match self {
            Self::Number(n) => n.is_finite() && *n >= 0.0,
            Self::Bool(_) => true,
            Self::Text(s) => !s.is_empty(),
        }
    }

    /// Numeric view, if this is a number
    #[inline]
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Planned change of a single parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterChange {
    /// Live value read during preparation
    pub previous: Option<ParamValue>,
    /// Value the optimizer wants applied
    pub target: ParamValue,
    /// Value confirmed written, set exactly once during implementation
    pub current: Option<ParamValue>,
    /// Unit label, if known
    pub unit: Option<String>,
}

impl ParameterChange {
    /// Change toward a target value
    #[inline]
    #[must_use]
    pub fn to_target(target: ParamValue) -> Self {
        Self {
            previous: None,
            target,
            current: None,
            unit: None,
        }
    }
}

/// Rollback bookkeeping for one execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackState {
    /// Originals captured, restore is possible
    pub available: bool,
    /// A restore was performed
    pub triggered: bool,
    /// Pre-change values, captured once during preparation
    pub original_values: HashMap<String, ParamValue>,
}

/// Safety bookkeeping for one execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyRecord {
    /// Checks that passed
    pub checks_passed: u32,
    /// Checks that failed
    pub checks_failed: u32,
    /// Non-fatal observations (failed restores, degraded KPIs, ...)
    pub warnings: Vec<String>,
    /// Conditions that stopped or would stop the execution
    pub stop_conditions: Vec<String>,
}

/// Direction an expected KPI change should move in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImpactDirection {
    /// KPI should go up (throughput, SINR)
    Increase,
    /// KPI should go down (latency, drop rate)
    Decrease,
}

/// An optimizer claim about one KPI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactClaim {
    /// KPI name as reported by telemetry
    pub kpi: String,
    /// Expected direction of change
    pub direction: ImpactDirection,
    /// Expected magnitude of change, absolute
    pub magnitude: f64,
    /// Seconds until the effect should be observable
    pub time_to_effect_secs: u64,
}

/// Measured change of one KPI over the verification window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactObservation {
    /// KPI name
    pub kpi: String,
    /// First sampled value
    pub baseline: f64,
    /// Last sampled value
    pub observed: f64,
    /// observed - baseline
    pub delta: f64,
    /// Observed direction matched the claim
    pub achieved: bool,
}

/// Expected vs. measured impact of one execution
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImpactAssessment {
    /// Claims derived from the strategy
    pub expected: Vec<ImpactClaim>,
    /// Observations computed from verification samples
    pub measured: Vec<ImpactObservation>,
}

/// Outcome scoring for one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningResult {
    /// Fraction of measured KPIs whose direction matched the claim
    pub effectiveness_score: f64,
    /// Upstream strategy generation should be informed
    pub adaptation_needed: bool,
    /// Human-readable lessons for the pattern store
    pub lessons: Vec<String>,
}

impl Default for LearningResult {
    fn default() -> Self {
        Self {
            effectiveness_score: 0.0,
            adaptation_needed: false,
            lessons: Vec::new(),
        }
    }
}

/// Point-in-time KPI reading for one element
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiSnapshot {
    /// Sample time
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// KPI name to value
    pub kpis: HashMap<String, f64>,
}

impl KpiSnapshot {
    /// Snapshot taken now with the given KPI values
    #[inline]
    #[must_use]
    pub fn now(kpis: HashMap<String, f64>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            kpis,
        }
    }

    /// Value of one KPI, if present
    #[inline]
    #[must_use]
    pub fn get(&self, kpi: &str) -> Option<f64> {
        self.kpis.get(kpi).copied()
    }
}

/// Optimizer-approved intent to change one element's configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Opaque decision reference
    pub id: String,
    /// Strategy attached to this decision
    pub strategy_id: String,
    /// Element the decision targets
    pub target_element: ElementId,
}

impl Decision {
    /// Create a decision for one element
    #[inline]
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        strategy_id: impl Into<String>,
        target_element: ElementId,
    ) -> Self {
        Self {
            id: id.into(),
            strategy_id: strategy_id.into(),
            target_element,
        }
    }
}

/// Concrete parameter targets and expected-impact claims for a decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    /// Declared action kind
    pub action_type: ActionType,
    /// Parameter targets and auxiliary actions
    pub implementation: Implementation,
    /// Known risks, carried for audit
    pub risks: Vec<String>,
    /// KPI impact claims
    pub expected_impact: Vec<ExpectedImpact>,
}

impl Strategy {
    /// Parameter-change strategy with the given targets
    #[must_use]
    pub fn parameter_change(parameters: HashMap<String, ParamValue>) -> Self {
        Self {
            action_type: ActionType::ParameterChange,
            implementation: Implementation {
                parameters,
                actions: Vec::new(),
            },
            risks: Vec::new(),
            expected_impact: Vec::new(),
        }
    }

    /// Append an impact claim
    #[inline]
    #[must_use]
    pub fn with_impact(mut self, impact: ExpectedImpact) -> Self {
        self.expected_impact.push(impact);
        self
    }
}

/// How a strategy is carried out
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Implementation {
    /// Parameter name to target value
    pub parameters: HashMap<String, ParamValue>,
    /// Auxiliary action descriptions, carried for audit
    pub actions: Vec<String>,
}

/// Optimizer impact claim as received, sign of `impact_value` gives direction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedImpact {
    /// KPI / objective name
    pub objective_id: String,
    /// Signed expected change
    pub impact_value: f64,
    /// Seconds until the effect should be observable
    pub time_to_effect_secs: u64,
}

impl ExpectedImpact {
    /// Convert the signed claim into a directional one
    #[must_use]
    pub fn to_claim(&self) -> ImpactClaim {
        let direction = if self.impact_value < 0.0 {
            ImpactDirection::Decrease
        } else {
            ImpactDirection::Increase
        };
        ImpactClaim {
            kpi: self.objective_id.clone(),
            direction,
            magnitude: self.impact_value.abs(),
            time_to_effect_secs: self.time_to_effect_secs,
        }
    }
}

/// Runtime record tracking one decision's safe application
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    /// Unique id, assigned at creation
    pub id: ExecutionId,
    /// Originating decision reference
    pub decision_ref: String,
    /// Element being changed
    pub target_element: ElementId,
    /// Declared action kind
    pub action_type: ActionType,
    /// Lifecycle status
    pub status: ExecutionStatus,
    /// Current phase, only while executing
    pub phase: Option<ExecutionPhase>,
    /// Planned parameter changes
    pub parameters: HashMap<String, ParameterChange>,
    /// Rollback bookkeeping
    pub rollback: RollbackState,
    /// Safety bookkeeping
    pub safety: SafetyRecord,
    /// Expected vs. measured impact
    pub impact: ImpactAssessment,
    /// KPI samples collected during verification, oldest evicted
    pub feedback: VecDeque<KpiSnapshot>,
    /// Outcome scoring
    pub learning: LearningResult,
    /// Creation time
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Set when a terminal status is reached
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Execution {
    /// Build a pending execution from a decision and its strategy
    #[must_use]
    pub fn from_decision(decision: &Decision, strategy: &Strategy) -> Self {
        let parameters = strategy
            .implementation
            .parameters
            .iter()
            .map(|(name, target)| (name.clone(), ParameterChange::to_target(target.clone())))
            .collect();
        let expected = strategy
            .expected_impact
            .iter()
            .map(ExpectedImpact::to_claim)
            .collect();

        Self {
            id: ExecutionId::new(),
            decision_ref: decision.id.clone(),
            target_element: decision.target_element.clone(),
            action_type: strategy.action_type,
            status: ExecutionStatus::Pending,
            phase: None,
            parameters,
            rollback: RollbackState::default(),
            safety: SafetyRecord::default(),
            impact: ImpactAssessment {
                expected,
                measured: Vec::new(),
            },
            feedback: VecDeque::new(),
            learning: LearningResult::default(),
            started_at: chrono::Utc::now(),
            ended_at: None,
        }
    }

    /// Advance to the given phase
    ///
    /// Phases only move forward; re-entering or skipping back is a bug.
    pub(crate) fn enter_phase(&mut self, phase: ExecutionPhase) {
        debug_assert!(
            self.phase.map_or(true, |current| current < phase),
            "phase must advance monotonically: {:?} -> {:?}",
            self.phase,
            phase
        );
        self.phase = Some(phase);
    }

    /// Mark a terminal status and stamp the end time
    ///
    /// `phase` is only meaningful while executing, so it is cleared here.
    pub(crate) fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.phase = None;
        self.ended_at = Some(chrono::Utc::now());
    }
}
