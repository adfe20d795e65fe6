//! Execution scheduler
//!
//! Owns the bounded-concurrency queue and advances each execution through
//! its phase state machine. One dispatch loop pulls from the FIFO queue
//! whenever a slot is free; a watchdog force-fails executions that outlive
//! their wall-clock budget; background loops run the ongoing safety sweep
//! and the verification-phase KPI sampler.
//!
//! The queue, the active map, and the archive live behind a single mutex;
//! each execution record has its own async lock, held briefly by whichever
//! phase or loop is touching it.

mod phases;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::element::{ParameterAccessor, TelemetrySource};
use crate::error::EngineError;
use crate::feedback::FeedbackController;
use crate::learning::{ExecutionOutcome, FleetMetrics, OutcomeLearner, PatternStore};
use crate::rollback::RollbackManager;
use crate::safety::SafetyMonitor;
use crate::types::{
    Decision, EngineConfig, Execution, ExecutionId, ExecutionPhase, ExecutionStatus, Strategy,
};

use phases::PhaseRunner;

/// Re-check cadence of the dispatch loop when idle
const DISPATCH_TICK: Duration = Duration::from_millis(50);
/// Scan cadence of the execution-age watchdog
const WATCHDOG_TICK: Duration = Duration::from_millis(100);

/// An execution record shared between the phase runner and the loops
pub(crate) type SharedExecution = Arc<tokio::sync::Mutex<Execution>>;

/// Operational status surface for dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Executions currently advancing through phases
    pub active_count: usize,
    /// Executions waiting for a free slot
    pub queued_count: usize,
    /// Terminal executions archived so far
    pub total_archived: u64,
    /// Rolling fleet metrics over the configured window
    pub aggregate_metrics: FleetMetrics,
}

struct ActiveEntry {
    record: SharedExecution,
    started: Instant,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<(ExecutionId, SharedExecution)>,
    active: HashMap<ExecutionId, ActiveEntry>,
    history: VecDeque<Execution>,
    total_archived: u64,
    metrics: FleetMetrics,
}

pub(crate) struct SchedulerInner {
    pub(crate) config: EngineConfig,
    pub(crate) accessor: Arc<dyn ParameterAccessor>,
    pub(crate) telemetry: Arc<dyn TelemetrySource>,
    store: Arc<dyn PatternStore>,
    pub(crate) safety: SafetyMonitor,
    pub(crate) rollback: RollbackManager,
    pub(crate) feedback: FeedbackController,
    pub(crate) learner: OutcomeLearner,
    state: Mutex<SchedulerState>,
    wake: Notify,
    shutdown: AtomicBool,
}

/// Applies approved decisions to network elements with bounded concurrency
///
/// Constructing a scheduler spawns its background loops; it must be built
/// inside a tokio runtime. Dropping it (or calling [`shutdown`]) stops
/// the loops.
///
/// [`shutdown`]: ExecutionScheduler::shutdown
pub struct ExecutionScheduler {
    inner: Arc<SchedulerInner>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecutionScheduler {
    /// Create a scheduler over the injected collaborator seams
    #[must_use]
    pub fn new(
        config: EngineConfig,
        accessor: Arc<dyn ParameterAccessor>,
        telemetry: Arc<dyn TelemetrySource>,
        store: Arc<dyn PatternStore>,
    ) -> Self {
        let inner = Arc::new(SchedulerInner {
            safety: SafetyMonitor::new(config.safety_rules.clone(), telemetry.clone()),
            rollback: RollbackManager::new(accessor.clone()),
            feedback: FeedbackController::new(config.feedback_buffer_cap),
            learner: OutcomeLearner::new(config.enable_real_time_adaptation),
            config,
            accessor,
            telemetry,
            store,
            state: Mutex::new(SchedulerState::default()),
            wake: Notify::new(),
            shutdown: AtomicBool::new(false),
        });

        let loops = vec![
            tokio::spawn(SchedulerInner::dispatch_loop(inner.clone())),
            tokio::spawn(SchedulerInner::watchdog_loop(inner.clone())),
            tokio::spawn(SchedulerInner::safety_loop(inner.clone())),
            tokio::spawn(SchedulerInner::feedback_loop(inner.clone())),
        ];

        Self {
            inner,
            loops: Mutex::new(loops),
        }
    }

    /// Enqueue an approved decision for execution
    ///
    /// Returns the id of the pending execution; dispatch happens as soon
    /// as a concurrency slot frees up.
    ///
    /// # Errors
    /// Returns [`EngineError::ShutDown`] after shutdown.
    pub fn submit(
        &self,
        decision: &Decision,
        strategy: &Strategy,
    ) -> Result<ExecutionId, EngineError> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(EngineError::ShutDown);
        }

        let execution = Execution::from_decision(decision, strategy);
        let id = execution.id;
        let record: SharedExecution = Arc::new(tokio::sync::Mutex::new(execution));
        {
            let mut state = self.inner.state.lock();
            state.queue.push_back((id, record));
        }
        self.inner.wake.notify_one();
        info!(execution = %id, decision = %decision.id, element = %decision.target_element, "decision submitted");
        Ok(id)
    }

    /// Cancel a pending execution
    ///
    /// Only queued executions can be cancelled; anything already
    /// dispatched is the watchdog's business.
    ///
    /// # Errors
    /// [`EngineError::NotCancellable`] when the execution has started or
    /// finished, [`EngineError::NotFound`] when the id is unknown.
    pub async fn cancel(&self, id: ExecutionId) -> Result<(), EngineError> {
        let removed = {
            let mut state = self.inner.state.lock();
            if let Some(pos) = state.queue.iter().position(|(qid, _)| *qid == id) {
                state.queue.remove(pos)
            } else if state.active.contains_key(&id) {
                return Err(EngineError::NotCancellable {
                    id,
                    status: ExecutionStatus::Executing,
                });
            } else if let Some(archived) = state.history.iter().find(|e| e.id == id) {
                return Err(EngineError::NotCancellable {
                    id,
                    status: archived.status,
                });
            } else {
                return Err(EngineError::NotFound(id));
            }
        };

        if let Some((_, record)) = removed {
            let mut execution = record.lock().await;
            execution
                .safety
                .warnings
                .push("cancelled before dispatch".to_string());
            execution.finish(ExecutionStatus::Failed);
            let snapshot = execution.clone();
            drop(execution);
            self.inner.archive_execution(snapshot);
            info!(execution = %id, "pending execution cancelled");
        }
        Ok(())
    }

    /// Current operational status; identical across calls when nothing ran
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let state = self.inner.state.lock();
        EngineStatus {
            active_count: state.active.len(),
            queued_count: state.queue.len(),
            total_archived: state.total_archived,
            aggregate_metrics: state.metrics.clone(),
        }
    }

    /// Snapshot of one execution, wherever it currently lives
    pub async fn execution(&self, id: ExecutionId) -> Option<Execution> {
        let record = {
            let state = self.inner.state.lock();
            if let Some(archived) = state.history.iter().find(|e| e.id == id) {
                return Some(archived.clone());
            }
            if let Some((_, record)) = state.queue.iter().find(|(qid, _)| *qid == id) {
                Some(record.clone())
            } else {
                state.active.get(&id).map(|entry| entry.record.clone())
            }
        };
        match record {
            Some(record) => Some(record.lock().await.clone()),
            None => None,
        }
    }

    /// Most recently archived executions, newest last
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<Execution> {
        let state = self.inner.state.lock();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    /// Stop accepting work and halt the background loops
    ///
    /// Executions already in flight keep their records but stop being
    /// dispatched, sampled, or watched.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.wake.notify_one();
        for handle in self.loops.lock().drain(..) {
            handle.abort();
        }
        info!("scheduler shut down");
    }
}

impl Drop for ExecutionScheduler {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        for handle in self.loops.lock().drain(..) {
            handle.abort();
        }
    }
}

impl SchedulerInner {
    /// Pull from the queue whenever a concurrency slot is free
    async fn dispatch_loop(inner: Arc<Self>) {
        loop {
            if inner.shutdown.load(Ordering::Acquire) {
                break;
            }

            loop {
                let next = {
                    let mut state = inner.state.lock();
                    if state.active.len() < inner.config.max_concurrent_executions {
                        state.queue.pop_front().map(|(id, record)| {
                            state.active.insert(
                                id,
                                ActiveEntry {
                                    record: record.clone(),
                                    started: Instant::now(),
                                    handle: None,
                                },
                            );
                            (id, record)
                        })
                    } else {
                        None
                    }
                };
                let Some((id, record)) = next else { break };

                debug!(execution = %id, "dispatching");
                let task_inner = inner.clone();
                let handle = tokio::spawn(async move {
                    Self::run_execution(task_inner, id, record).await;
                });
                if let Some(entry) = inner.state.lock().active.get_mut(&id) {
                    entry.handle = Some(handle);
                }
            }

            tokio::select! {
                _ = inner.wake.notified() => {}
                _ = tokio::time::sleep(DISPATCH_TICK) => {}
            }
        }
    }

    /// Run the phase sequence and handle the failure path
    ///
    /// Errors stop at this boundary; one execution's failure never
    /// affects the others in flight.
    async fn run_execution(inner: Arc<Self>, id: ExecutionId, record: SharedExecution) {
        let runner = PhaseRunner {
            inner: inner.clone(),
        };
        match runner.run(id, &record).await {
            Ok(()) => {
                info!(execution = %id, "execution completed");
            }
            Err(err) => {
                warn!(execution = %id, %err, "execution failed");
                let mut execution = record.lock().await;
                let note = match execution.phase {
                    Some(phase) => format!("failed during {phase:?}: {err}"),
                    None => format!("failed: {err}"),
                };
                execution.safety.warnings.push(note);
                execution.finish(ExecutionStatus::Failed);
                if inner.config.enable_auto_rollback
                    && err.requires_rollback()
                    && execution.rollback.available
                {
                    inner.rollback.execute_rollback(&mut execution).await;
                }
                inner.feedback.stop_collection(id);
                let learning = inner.learner.score(&execution);
                execution.learning = learning;
            }
        }
        inner.archive_active(id).await;
    }

    /// Force-fail executions that outlive their wall-clock budget
    async fn watchdog_loop(inner: Arc<Self>) {
        loop {
            tokio::time::sleep(WATCHDOG_TICK).await;
            if inner.shutdown.load(Ordering::Acquire) {
                break;
            }

            let timeout = inner.config.execution_timeout;
            let expired: Vec<(ExecutionId, SharedExecution, Option<JoinHandle<()>>)> = {
                let mut state = inner.state.lock();
                let ids: Vec<ExecutionId> = state
                    .active
                    .iter()
                    .filter(|(_, entry)| entry.started.elapsed() > timeout)
                    .map(|(id, _)| *id)
                    .collect();
                ids.into_iter()
                    .filter_map(|id| {
                        state
                            .active
                            .get_mut(&id)
                            .map(|entry| (id, entry.record.clone(), entry.handle.take()))
                    })
                    .collect()
            };

            for (id, record, handle) in expired {
                if let Some(handle) = handle {
                    handle.abort();
                    let _ = handle.await;
                }

                let mut execution = record.lock().await;
                if execution.status.is_terminal() {
                    // Finished in the race window; archive normally.
                    drop(execution);
                    inner.archive_active(id).await;
                    continue;
                }

                warn!(execution = %id, phase = ?execution.phase, "watchdog force-failing execution");
                let reason = EngineError::Timeout(timeout);
                execution.safety.stop_conditions.push(reason.to_string());
                execution.finish(ExecutionStatus::Failed);
                if inner.config.enable_auto_rollback && execution.rollback.available {
                    inner.rollback.execute_rollback(&mut execution).await;
                }
                inner.feedback.stop_collection(id);
                let learning = inner.learner.score(&execution);
                execution.learning = learning;
                drop(execution);
                inner.archive_active(id).await;
            }
        }
    }

    /// Ongoing safety sweep over every active execution, phase-independent
    async fn safety_loop(inner: Arc<Self>) {
        loop {
            tokio::time::sleep(inner.config.safety_check_interval).await;
            if inner.shutdown.load(Ordering::Acquire) {
                break;
            }

            let records: Vec<SharedExecution> = {
                let state = inner.state.lock();
                state
                    .active
                    .values()
                    .map(|entry| entry.record.clone())
                    .collect()
            };
            for record in records {
                let mut execution = record.lock().await;
                if execution.status != ExecutionStatus::Executing {
                    continue;
                }
                inner.safety.ongoing_monitor(&mut execution).await;
            }
        }
    }

    /// Background KPI sampler for executions sitting in verification
    async fn feedback_loop(inner: Arc<Self>) {
        loop {
            tokio::time::sleep(inner.config.feedback_sampling_interval).await;
            if inner.shutdown.load(Ordering::Acquire) {
                break;
            }

            let targets: Vec<(ExecutionId, crate::types::ElementId)> = {
                let state = inner.state.lock();
                state
                    .active
                    .values()
                    .filter_map(|entry| {
                        entry.record.try_lock().ok().and_then(|execution| {
                            (execution.phase == Some(ExecutionPhase::Verification))
                                .then(|| (execution.id, execution.target_element.clone()))
                        })
                    })
                    .collect()
            };
            for (id, element) in targets {
                match inner.telemetry.snapshot(&element).await {
                    Ok(snapshot) => inner.feedback.record(id, snapshot),
                    Err(err) => debug!(execution = %id, %err, "background sample failed"),
                }
            }
        }
    }

    /// Move a terminal active execution into the archive
    async fn archive_active(self: &Arc<Self>, id: ExecutionId) {
        let entry = { self.state.lock().active.remove(&id) };
        let Some(entry) = entry else {
            return; // already archived on another path
        };
        let snapshot = entry.record.lock().await.clone();
        self.archive_execution(snapshot);
    }

    /// Record a terminal execution in the archive and push its outcome
    fn archive_execution(self: &Arc<Self>, execution: Execution) {
        let outcome = ExecutionOutcome::from_execution(&execution);
        {
            let mut state = self.state.lock();
            state.history.push_back(execution);
            while state.history.len() > self.config.history_cap {
                state.history.pop_front();
            }
            state.total_archived += 1;
            let metrics = FleetMetrics::compute(state.history.iter(), self.config.metrics_window);
            state.metrics = metrics;
        }
        self.wake.notify_one();

        // Fire-and-forget: a store failure must not fail the execution.
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(err) = store.record(&outcome).await {
                warn!(execution = %outcome.execution_id, %err, "pattern store rejected outcome");
            }
        });
    }
}
