//! CLOE Engine (cloe-engine)
//!
//! Closed-loop action execution for network optimization. The engine owns
//! the safe application lifecycle of an approved change:
//! 1. **Prepare**: snapshot originals, open feedback collection, pre-flight checks
//! 2. **Validate**: target and safety checks before anything is mutated
//! 3. **Implement**: sequential parameter writes plus a critical scan
//! 4. **Verify**: bounded KPI polling window
//! 5. **Finalize**: outcome scoring and archival
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use cloe_engine::prelude::*;
//!
//! let scheduler = ExecutionScheduler::new(
//!     EngineConfig::new(),
//!     accessor,   // Arc<dyn ParameterAccessor>
//!     telemetry,  // Arc<dyn TelemetrySource>
//!     store,      // Arc<dyn PatternStore>
//! );
//!
//! let id = scheduler.submit(&decision, &strategy)?;
//! let outcome = scheduler.execution(id).await;
//! ```

// Core modules
pub mod element;
pub mod error;
pub mod feedback;
pub mod learning;
pub mod rollback;
pub mod safety;
pub mod scheduler;
pub mod types;

// Simulation harness
pub mod harness;

// Re-exports
pub use error::{AccessorError, EngineError, StoreError};
pub use scheduler::{EngineStatus, ExecutionScheduler};
pub use types::*;

/// Re-export the common surface for convenience
pub mod prelude {
    pub use crate::element::{ParameterAccessor, TelemetrySource};
    pub use crate::error::{AccessorError, EngineError, StoreError};
    pub use crate::feedback::FeedbackController;
    pub use crate::learning::{
        ExecutionOutcome, FleetMetrics, MemoryPatternStore, OutcomeLearner, PatternStore,
    };
    pub use crate::rollback::RollbackManager;
    pub use crate::safety::{
        default_rules, Comparator, SafetyIssue, SafetyMonitor, SafetyRule, SafetyVerdict, Severity,
    };
    pub use crate::scheduler::{EngineStatus, ExecutionScheduler};
    pub use crate::types::{
        ActionType, Decision, ElementId, EngineConfig, Execution, ExecutionId, ExecutionPhase,
        ExecutionStatus, ExpectedImpact, ImpactClaim, ImpactDirection, ImpactObservation,
        KpiSnapshot, ParamValue, ParameterChange, Strategy,
    };
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
