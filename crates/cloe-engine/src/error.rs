//! Error types for the execution engine
//!
//! Provides the per-execution error taxonomy:
//! - Validation failures (pre-mutation, no rollback needed)
//! - Safety aborts (partial writes possible, rollback needed)
//! - Watchdog timeouts
//! - Accessor/telemetry failures
//! - Scheduler surface errors (cancel, shutdown)

use crate::types::{ExecutionId, ExecutionStatus};
use std::time::Duration;

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad parameter value or failed safety precondition, caught before
    /// any parameter was mutated
    #[error("validation failed: {0}")]
    Validation(String),

    /// Critical issue detected after writes started
    #[error("safety abort: {0}")]
    SafetyAbort(String),

    /// Watchdog fired while the execution was still in flight
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// Parameter accessor or telemetry source call failed
    #[error("accessor error: {0}")]
    Accessor(#[from] AccessorError),

    /// Execution not known to the scheduler
    #[error("execution not found: {0}")]
    NotFound(ExecutionId),

    /// Cancellation is only possible while pending
    #[error("execution {id} cannot be cancelled in status {status:?}")]
    NotCancellable {
        /// Target execution
        id: ExecutionId,
        /// Its current status
        status: ExecutionStatus,
    },

    /// Scheduler is shutting down, no new work accepted
    #[error("scheduler is shut down")]
    ShutDown,
}

impl EngineError {
    /// Whether a failure with this error may have left partial writes
    /// behind and therefore warrants a rollback
    #[inline]
    #[must_use]
    pub fn requires_rollback(&self) -> bool {
        matches!(
            self,
            Self::SafetyAbort(_) | Self::Timeout(_) | Self::Accessor(_)
        )
    }
}

/// Failures of the element-facing leaves
#[derive(Debug, Clone, thiserror::Error)]
pub enum AccessorError {
    /// Parameter does not exist on the element
    #[error("parameter not found: {0}")]
    ParameterNotFound(String),

    /// Element refused the write
    #[error("write rejected for {name}: {reason}")]
    WriteRejected {
        /// Parameter name
        name: String,
        /// Element-reported reason
        reason: String,
    },

    /// Element could not be reached
    #[error("element unreachable: {0}")]
    Unreachable(String),

    /// Telemetry source produced no snapshot
    #[error("telemetry unavailable: {0}")]
    TelemetryUnavailable(String),
}

/// Pattern store persistence failure; never propagated into an execution
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store rejected or failed to persist the outcome
    #[error("outcome not persisted: {0}")]
    PersistFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_classification() {
        assert!(!EngineError::Validation("bad target".into()).requires_rollback());
        assert!(EngineError::SafetyAbort("sinr floor".into()).requires_rollback());
        assert!(EngineError::Timeout(Duration::from_secs(5)).requires_rollback());
        assert!(
            EngineError::Accessor(AccessorError::Unreachable("cell-1".into()))
                .requires_rollback()
        );
    }

    #[test]
    fn error_display() {
        let err = EngineError::Validation("tx_power_dbm must be finite".into());
        assert!(err.to_string().contains("validation failed"));

        let err = EngineError::Accessor(AccessorError::WriteRejected {
            name: "tilt_deg".into(),
            reason: "locked".into(),
        });
        assert!(err.to_string().contains("tilt_deg"));
    }
}
