//! Compensating action for failed executions
//!
//! Restores the pre-change parameter values captured during preparation.
//! Restoration is best-effort: a failed restore of one key is recorded as
//! a warning and the loop continues with the remaining keys.

use std::sync::Arc;
use tracing::{info, warn};

use crate::element::ParameterAccessor;
use crate::types::{Execution, ExecutionStatus};

/// Restores pre-change parameter values after a failed or aborted execution
pub struct RollbackManager {
    accessor: Arc<dyn ParameterAccessor>,
}

impl RollbackManager {
    /// Create a rollback manager writing through the given accessor
    #[inline]
    #[must_use]
    pub fn new(accessor: Arc<dyn ParameterAccessor>) -> Self {
        Self { accessor }
    }

    /// Restore every captured original value and mark the execution rolled back
    ///
    /// Keys are restored in sorted order so the write sequence is
    /// deterministic. Individual failures never halt the loop.
    pub async fn execute_rollback(&self, execution: &mut Execution) {
        let mut originals: Vec<(String, crate::types::ParamValue)> = execution
            .rollback
            .original_values
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        originals.sort_by(|a, b| a.0.cmp(&b.0));

        let mut restored = 0usize;
        for (name, value) in originals {
            match self
                .accessor
                .write(&execution.target_element, &name, value)
                .await
            {
                Ok(()) => restored += 1,
                Err(err) => {
                    warn!(execution = %execution.id, parameter = %name, %err, "restore failed");
                    execution
                        .safety
                        .warnings
                        .push(format!("rollback of {name} failed: {err}"));
                }
            }
        }

        execution.rollback.triggered = true;
        execution.finish(ExecutionStatus::RolledBack);
        info!(
            execution = %execution.id,
            restored,
            total = execution.rollback.original_values.len(),
            "rollback finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccessorError;
    use crate::types::{Decision, ElementId, ParamValue, Strategy};
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Accessor that rejects writes to named parameters and logs the rest
    struct PartialAccessor {
        rejects: Vec<String>,
        writes: Mutex<Vec<(String, ParamValue)>>,
    }

    #[async_trait::async_trait]
    impl ParameterAccessor for PartialAccessor {
        async fn read(
            &self,
            _element: &ElementId,
            name: &str,
        ) -> Result<ParamValue, AccessorError> {
            Err(AccessorError::ParameterNotFound(name.to_string()))
        }

        async fn write(
            &self,
            _element: &ElementId,
            name: &str,
            value: ParamValue,
        ) -> Result<(), AccessorError> {
            if self.rejects.iter().any(|r| r == name) {
                return Err(AccessorError::WriteRejected {
                    name: name.to_string(),
                    reason: "locked".to_string(),
                });
            }
            self.writes.lock().push((name.to_string(), value));
            Ok(())
        }
    }

    fn execution_with_originals(originals: &[(&str, f64)]) -> Execution {
        let decision = Decision::new("d-1", "s-1", ElementId::new("cell-3"));
        let strategy = Strategy::parameter_change(HashMap::new());
        let mut execution = Execution::from_decision(&decision, &strategy);
        for (name, value) in originals {
            execution
                .rollback
                .original_values
                .insert(name.to_string(), ParamValue::Number(*value));
        }
        execution.rollback.available = true;
        execution
    }

    #[tokio::test]
    async fn restores_every_original_value() {
        let accessor = Arc::new(PartialAccessor {
            rejects: vec![],
            writes: Mutex::new(Vec::new()),
        });
        let manager = RollbackManager::new(accessor.clone());
        let mut execution = execution_with_originals(&[("tx_power_dbm", 10.0), ("tilt_deg", 4.0)]);

        manager.execute_rollback(&mut execution).await;

        assert!(execution.rollback.triggered);
        assert_eq!(execution.status, ExecutionStatus::RolledBack);
        assert_eq!(accessor.writes.lock().len(), 2);
    }

    #[tokio::test]
    async fn partial_failure_continues_and_warns() {
        let accessor = Arc::new(PartialAccessor {
            rejects: vec!["tilt_deg".to_string()],
            writes: Mutex::new(Vec::new()),
        });
        let manager = RollbackManager::new(accessor.clone());
        let mut execution = execution_with_originals(&[
            ("a_first", 1.0),
            ("tilt_deg", 4.0),
            ("z_last", 2.0),
        ]);

        manager.execute_rollback(&mut execution).await;

        // The rejected key did not stop the remaining restores.
        let written: Vec<String> = accessor
            .writes
            .lock()
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        assert_eq!(written, vec!["a_first".to_string(), "z_last".to_string()]);
        assert!(execution.rollback.triggered);
        assert_eq!(execution.safety.warnings.len(), 1);
        assert!(execution.safety.warnings[0].contains("tilt_deg"));
    }
}
