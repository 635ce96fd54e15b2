//! Cross-platform fallback orchestration.
//!
//! When a session hits its context limit, [`FallbackManager`] walks the
//! configured fallback chain strictly forward from the current platform,
//! skipping platforms whose circuit is open, packaging context for each
//! candidate, and committing a [`HandoffRecord`] for the first platform
//! that accepts. Every candidate attempt is bounded by the timeout
//! manager and its outcome feeds both the candidate's circuit breaker
//! and the timeout manager's performance learning.
//!
//! Per-task handoffs are strictly sequential: a second request while
//! one is in flight is rejected, and an in-flight attempt re-checks
//! task state before committing so a completed or abandoned task never
//! gains a late record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::detector::{SessionLimitDetector, WarningLevel};
use crate::errors::{CoordinationError, CoordinationResult};
use crate::events::{CoordinationEvent, SharedEventBus};
use crate::memory::{CompressionLevel, ContextPackage, ContextPreservation};
use crate::platform::{PlatformAdapter, PlatformId};
use crate::timeout::{IntelligentTimeoutManager, SystemLoad, TaskComplexity};
use crate::types::{SessionId, TaskId};

/// Lifecycle of one coordinated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TaskPhase {
    /// Running on a platform.
    Active { platform: PlatformId },
    /// A handoff attempt is walking the fallback chain.
    HandoffInProgress { from: PlatformId },
    /// The fallback chain was exhausted; manual escalation required.
    Failed,
    /// The task finished.
    Completed,
}

/// Persisted outcome of one handoff attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub id: String,
    pub task_id: TaskId,
    pub from_platform: PlatformId,
    /// Destination platform; `None` when the handoff failed.
    pub to_platform: Option<PlatformId>,
    pub success: bool,
    pub failure_reason: Option<String>,
    /// Candidates actually attempted, in chain order.
    pub attempted: Vec<PlatformId>,
    /// Candidates skipped because their circuit was not eligible.
    pub skipped: Vec<PlatformId>,
    /// The package the destination accepted, on success.
    pub package: Option<ContextPackage>,
    /// Compression ratio of the shipped package, when one was built.
    pub compression_ratio: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl HandoffRecord {
    /// Every platform this handoff considered, attempted or skipped,
    /// in chain order.
    pub fn considered(&self) -> Vec<PlatformId> {
        let mut all = self.attempted.clone();
        all.extend(self.skipped.iter().copied());
        all.sort();
        all.dedup();
        all
    }
}

/// Append-only log of handoff records, queryable by task.
#[derive(Default)]
pub struct HandoffLog {
    records: Mutex<Vec<HandoffRecord>>,
}

impl HandoffLog {
    fn append(&self, record: HandoffRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    /// Records for one task, ordered by start time.
    pub fn for_task(&self, task_id: &str) -> Vec<HandoffRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut found: Vec<HandoffRecord> = records
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.started_at);
        found
    }

    /// Total records across all tasks.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
struct TaskEntry {
    phase: TaskPhase,
    session_id: SessionId,
    /// Bumped on completion/abandonment so an in-flight handoff can
    /// detect that its result went stale.
    generation: u64,
}

/// Orchestrates limit-triggered handoffs across the fallback chain.
pub struct FallbackManager {
    preservation: Arc<ContextPreservation>,
    breaker: Arc<CircuitBreaker>,
    timeouts: Arc<IntelligentTimeoutManager>,
    adapters: RwLock<HashMap<PlatformId, Arc<dyn PlatformAdapter>>>,
    chain: Vec<PlatformId>,
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,
    log: HandoffLog,
    bus: SharedEventBus,
    load: RwLock<SystemLoad>,
    detector: Option<Arc<SessionLimitDetector>>,
}

impl FallbackManager {
    pub fn new(
        preservation: Arc<ContextPreservation>,
        breaker: Arc<CircuitBreaker>,
        timeouts: Arc<IntelligentTimeoutManager>,
        chain: Vec<PlatformId>,
        bus: SharedEventBus,
    ) -> Self {
        Self {
            preservation,
            breaker,
            timeouts,
            adapters: RwLock::new(HashMap::new()),
            chain,
            tasks: RwLock::new(HashMap::new()),
            log: HandoffLog::default(),
            bus,
            load: RwLock::new(SystemLoad::default()),
            detector: None,
        }
    }

    /// Attach the detector so committed handoffs re-point its session
    /// watch at the new platform.
    pub fn with_detector(mut self, detector: Arc<SessionLimitDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Register the adapter fronting one platform.
    pub fn register_adapter(&self, adapter: Arc<dyn PlatformAdapter>) {
        let mut adapters = self.adapters.write().unwrap_or_else(|e| e.into_inner());
        adapters.insert(adapter.platform(), adapter);
    }

    /// Update the load snapshot used for timeout computation.
    pub fn set_system_load(&self, load: SystemLoad) {
        *self.load.write().unwrap_or_else(|e| e.into_inner()) = load;
    }

    /// Begin coordinating a task.
    pub fn register_task(&self, task_id: &str, session_id: &str, platform: PlatformId) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        tasks.insert(
            task_id.to_string(),
            TaskEntry {
                phase: TaskPhase::Active { platform },
                session_id: session_id.to_string(),
                generation: 0,
            },
        );
    }

    /// Mark a task finished. An in-flight handoff for it will discard
    /// its result.
    pub fn complete_task(&self, task_id: &str) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = tasks.get_mut(task_id) {
            entry.phase = TaskPhase::Completed;
            entry.generation += 1;
        }
    }

    /// Drop a task without finishing it. Same staleness effect as
    /// [`Self::complete_task`].
    pub fn abandon_task(&self, task_id: &str) {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        if tasks.remove(task_id).is_some() {
            info!(task_id, "task abandoned");
        }
    }

    /// Current lifecycle phase of a task.
    pub fn task_phase(&self, task_id: &str) -> Option<TaskPhase> {
        let tasks = self.tasks.read().unwrap_or_else(|e| e.into_inner());
        tasks.get(task_id).map(|e| e.phase)
    }

    /// Handoff records for a task, ordered by start time.
    pub fn handoff_records(&self, task_id: &str) -> Vec<HandoffRecord> {
        self.log.for_task(task_id)
    }

    /// Candidates strictly after `current` in the chain. No wrap-around.
    fn candidates_after(&self, current: PlatformId) -> Vec<PlatformId> {
        match self.chain.iter().position(|p| *p == current) {
            Some(idx) => self.chain[idx + 1..].to_vec(),
            None => Vec::new(),
        }
    }

    fn compression_level_for(&self, session_id: &str) -> CompressionLevel {
        self.detector
            .as_ref()
            .and_then(|d| d.current_level(session_id))
            .map(|level| level.compression_level())
            .unwrap_or(CompressionLevel::Aggressive)
    }

    /// Atomically move the task into the handoff phase, rejecting
    /// concurrent attempts.
    fn begin_handoff(&self, task_id: &str) -> CoordinationResult<(PlatformId, SessionId, u64)> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| CoordinationError::UnknownTask {
                task_id: task_id.to_string(),
            })?;
        match entry.phase {
            TaskPhase::Active { platform } => {
                entry.phase = TaskPhase::HandoffInProgress { from: platform };
                Ok((platform, entry.session_id.clone(), entry.generation))
            }
            TaskPhase::HandoffInProgress { .. } => {
                Err(CoordinationError::ConcurrentHandoffRejected {
                    task_id: task_id.to_string(),
                })
            }
            TaskPhase::Failed | TaskPhase::Completed => Err(CoordinationError::StaleHandoff {
                task_id: task_id.to_string(),
            }),
        }
    }

    /// Commit a terminal phase for the handoff, failing when the task
    /// changed state since the handoff began.
    fn commit_phase(
        &self,
        task_id: &str,
        generation: u64,
        phase: TaskPhase,
    ) -> CoordinationResult<()> {
        let mut tasks = self.tasks.write().unwrap_or_else(|e| e.into_inner());
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| CoordinationError::StaleHandoff {
                task_id: task_id.to_string(),
            })?;
        if entry.generation != generation
            || !matches!(entry.phase, TaskPhase::HandoffInProgress { .. })
        {
            return Err(CoordinationError::StaleHandoff {
                task_id: task_id.to_string(),
            });
        }
        entry.phase = phase;
        Ok(())
    }

    async fn attempt_candidate(
        &self,
        task_id: &str,
        session_id: &str,
        from: PlatformId,
        candidate: PlatformId,
        level: CompressionLevel,
        budget: Duration,
    ) -> CoordinationResult<ContextPackage> {
        let adapter = {
            let adapters = self.adapters.read().unwrap_or_else(|e| e.into_inner());
            adapters.get(&candidate).cloned()
        }
        .ok_or_else(|| CoordinationError::AdapterUnavailable {
            platform: candidate,
            detail: "no adapter registered".into(),
        })?;

        let attempt = async {
            let package = self
                .preservation
                .preserve_for_handoff(task_id, session_id, from, candidate, level)
                .await?;
            adapter.invoke(&package).await.map_err(|e| {
                CoordinationError::AdapterUnavailable {
                    platform: candidate,
                    detail: e.to_string(),
                }
            })?;
            Ok(package)
        };

        match tokio::time::timeout(budget, attempt).await {
            Ok(result) => result,
            Err(_) => Err(CoordinationError::AttemptTimedOut {
                platform: candidate,
                timeout_ms: budget.as_millis() as u64,
            }),
        }
    }

    /// Run one handoff for a task that hit its context limit.
    ///
    /// Walks the chain strictly forward from the current platform. The
    /// first accepting candidate commits the task onto the new platform
    /// and returns the persisted record; exhaustion leaves the task
    /// `Failed` for manual escalation and is never silently retried.
    pub async fn handle_limit_reached(&self, task_id: &str) -> CoordinationResult<HandoffRecord> {
        let (from, session_id, generation) = self.begin_handoff(task_id)?;
        // Not entered: the guard cannot be held across await points.
        let span = crate::otel::handoff_span(task_id, &from.to_string());
        let walk_started = Instant::now();
        let started_at = Utc::now();
        let level = self.compression_level_for(&session_id);
        let candidates = self.candidates_after(from);

        let _ = self.bus.publish(CoordinationEvent::HandoffStarted {
            task_id: task_id.to_string(),
            from_platform: from,
            timestamp: started_at,
        });
        info!(task_id, %from, candidates = candidates.len(), "handoff started");

        let load = *self.load.read().unwrap_or_else(|e| e.into_inner());
        let mut attempted = Vec::new();
        let mut skipped = Vec::new();
        let mut last_failure: Option<String> = None;

        for candidate in candidates {
            if !self.breaker.begin_attempt(candidate) {
                info!(task_id, platform = %candidate, "candidate skipped: circuit not eligible");
                skipped.push(candidate);
                continue;
            }
            attempted.push(candidate);

            let budget_ms = self
                .timeouts
                .calculate_timeout(&candidate.to_string(), TaskComplexity::Critical, load)
                .timeout_ms;
            let started = Instant::now();
            let outcome = self
                .attempt_candidate(
                    task_id,
                    &session_id,
                    from,
                    candidate,
                    level,
                    Duration::from_millis(budget_ms),
                )
                .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let attempt_span =
                crate::otel::attempt_span(task_id, &candidate.to_string(), budget_ms);
            match outcome {
                Ok(package) => {
                    crate::otel::record_attempt_result(
                        &attempt_span,
                        true,
                        package.compression_ratio,
                        elapsed_ms,
                    );
                    self.breaker.record_outcome(candidate, true);
                    self.timeouts.record_task_performance(
                        &candidate.to_string(),
                        task_id,
                        elapsed_ms,
                        true,
                    );

                    self.commit_phase(
                        task_id,
                        generation,
                        TaskPhase::Active {
                            platform: candidate,
                        },
                    )?;
                    if let Some(detector) = &self.detector {
                        detector.migrate_session(&session_id, candidate);
                    }

                    let record = HandoffRecord {
                        id: Uuid::new_v4().to_string(),
                        task_id: task_id.to_string(),
                        from_platform: from,
                        to_platform: Some(candidate),
                        success: true,
                        failure_reason: None,
                        attempted,
                        skipped,
                        compression_ratio: Some(package.compression_ratio),
                        package: Some(package.clone()),
                        started_at,
                        finished_at: Utc::now(),
                    };
                    self.log.append(record.clone());
                    crate::otel::record_handoff_result(
                        &span,
                        true,
                        record.attempted.len(),
                        walk_started.elapsed().as_millis() as u64,
                    );
                    let _ = self.bus.publish(CoordinationEvent::HandoffCompleted {
                        task_id: task_id.to_string(),
                        from_platform: from,
                        to_platform: candidate,
                        compression_ratio: package.compression_ratio,
                        timestamp: record.finished_at,
                    });
                    info!(task_id, %from, to = %candidate, "handoff completed");
                    return Ok(record);
                }
                Err(err) if err.is_candidate_local() => {
                    crate::otel::record_attempt_result(&attempt_span, false, 0.0, elapsed_ms);
                    warn!(task_id, platform = %candidate, %err, "candidate attempt failed");
                    self.breaker.record_outcome(candidate, false);
                    self.timeouts.record_task_performance(
                        &candidate.to_string(),
                        task_id,
                        elapsed_ms,
                        false,
                    );
                    last_failure = Some(err.to_string());
                }
                Err(err) => return Err(err),
            }
        }

        // Chain exhausted. Persist the failure and park the task.
        let reason = last_failure.unwrap_or_else(|| "no eligible platform in chain".to_string());
        let attempted_count = attempted.len();
        self.commit_phase(task_id, generation, TaskPhase::Failed)?;

        let record = HandoffRecord {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            from_platform: from,
            to_platform: None,
            success: false,
            failure_reason: Some(reason.clone()),
            attempted: attempted.clone(),
            skipped,
            package: None,
            compression_ratio: None,
            started_at,
            finished_at: Utc::now(),
        };
        self.log.append(record);
        crate::otel::record_handoff_result(
            &span,
            false,
            attempted_count,
            walk_started.elapsed().as_millis() as u64,
        );
        let _ = self.bus.publish(CoordinationEvent::HandoffFailed {
            task_id: task_id.to_string(),
            from_platform: from,
            attempted,
            reason,
            timestamp: Utc::now(),
        });
        warn!(task_id, %from, attempted_count, "fallback chain exhausted");
        Err(CoordinationError::NoEligiblePlatform {
            task_id: task_id.to_string(),
            attempted: attempted_count,
        })
    }

    /// Subscribe to the bus and run a handoff whenever a session
    /// escalates to the emergency level.
    pub fn spawn_emergency_listener(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        use tokio::sync::broadcast::error::RecvError;

        let manager = self;
        let mut rx = manager.bus.subscribe();
        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    // A burst can outrun the bus; drop the missed
                    // events but keep the trigger alive.
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "emergency listener lagged behind the event bus");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if let CoordinationEvent::LevelTransition {
                    task_id, new_level, ..
                } = event
                {
                    if new_level == WarningLevel::Emergency {
                        if let Err(err) = manager.handle_limit_reached(&task_id).await {
                            warn!(task_id, %err, "emergency handoff failed");
                        }
                    }
                }
            }
        })
    }
}
