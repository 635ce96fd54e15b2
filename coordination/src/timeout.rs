//! Adaptive per-agent timeout calculation.
//!
//! Timeouts are derived from four factors layered over a per-complexity
//! base: the agent's historical behavior (success rate and average
//! response time), the task's complexity class, current system load,
//! and the operational mode. Outcomes feed back through
//! [`IntelligentTimeoutManager::record_task_performance`] so slow or
//! flaky agents earn longer timeouts over time.
//!
//! The computation is deterministic: identical history, complexity, and
//! load always yield the identical result.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

use crate::types::AgentId;

/// Task complexity classes with fixed base timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskComplexity {
    Simple,
    Moderate,
    Complex,
    Critical,
}

impl TaskComplexity {
    pub fn all() -> &'static [TaskComplexity] {
        &[
            Self::Simple,
            Self::Moderate,
            Self::Complex,
            Self::Critical,
        ]
    }

    /// Default base timeout in milliseconds.
    pub fn default_base_ms(&self) -> u64 {
        match self {
            Self::Simple => 30_000,
            Self::Moderate => 60_000,
            Self::Complex => 120_000,
            Self::Critical => 300_000,
        }
    }

    /// Complexity multiplier applied on top of the base.
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Simple => 1.0,
            Self::Moderate => 1.5,
            Self::Complex => 2.0,
            Self::Critical => 3.0,
        }
    }

    /// Parse a class name; unknown names fall back to `Moderate`.
    pub fn parse(name: &str) -> Self {
        match name {
            "simple" => Self::Simple,
            "moderate" => Self::Moderate,
            "complex" => Self::Complex,
            "critical" => Self::Critical,
            _ => Self::Moderate,
        }
    }
}

impl std::fmt::Display for TaskComplexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Moderate => write!(f, "moderate"),
            Self::Complex => write!(f, "complex"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Operational mode scaling every computed timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalMode {
    Normal,
    HighPerformance,
    Conservative,
    Learning,
}

impl OperationalMode {
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::HighPerformance => 0.8,
            Self::Conservative => 1.5,
            Self::Learning => 1.2,
        }
    }
}

impl Default for OperationalMode {
    fn default() -> Self {
        Self::Normal
    }
}

/// Tunables for timeout computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Base timeouts in milliseconds, overriding the class defaults.
    pub base_timeouts_ms: HashMap<TaskComplexity, u64>,
    /// Floor for any computed timeout.
    pub min_timeout_ms: u64,
    /// Fraction of the final timeout at which the warning fires.
    pub warning_fraction: f64,
    /// Performance-history ring capacity per agent.
    pub history_capacity: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            base_timeouts_ms: TaskComplexity::all()
                .iter()
                .map(|c| (*c, c.default_base_ms()))
                .collect(),
            min_timeout_ms: 1_000,
            warning_fraction: 0.7,
            history_capacity: 100,
        }
    }
}

impl TimeoutConfig {
    fn base_ms(&self, complexity: TaskComplexity) -> u64 {
        self.base_timeouts_ms
            .get(&complexity)
            .copied()
            .unwrap_or_else(|| complexity.default_base_ms())
    }
}

/// Current system pressure, each component in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SystemLoad {
    pub cpu: f64,
    pub memory: f64,
    pub active_tasks: f64,
}

impl SystemLoad {
    pub fn new(cpu: f64, memory: f64, active_tasks: f64) -> Self {
        Self {
            cpu: cpu.clamp(0.0, 1.0),
            memory: memory.clamp(0.0, 1.0),
            active_tasks: active_tasks.clamp(0.0, 1.0),
        }
    }

    /// Averaged pressure across the three components.
    pub fn normalized(&self) -> f64 {
        ((self.cpu + self.memory + self.active_tasks) / 3.0).clamp(0.0, 1.0)
    }
}

/// One completed task observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub task_id: String,
    pub actual_time_ms: u64,
    pub success: bool,
}

/// Learned behavior for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPerformance {
    pub agent_id: AgentId,
    pub task_count: u64,
    /// Count-weighted incremental average of response times.
    pub avg_response_ms: f64,
    /// Count-weighted incremental average of success (1.0 / 0.0).
    pub success_rate: f64,
    history: VecDeque<PerformanceRecord>,
    history_capacity: usize,
}

impl AgentPerformance {
    fn new(agent_id: AgentId, history_capacity: usize) -> Self {
        Self {
            agent_id,
            task_count: 0,
            avg_response_ms: 0.0,
            success_rate: 1.0,
            history: VecDeque::with_capacity(history_capacity.min(128)),
            history_capacity: history_capacity.max(1),
        }
    }

    fn record(&mut self, record: PerformanceRecord) {
        let n = self.task_count as f64;
        self.avg_response_ms =
            (self.avg_response_ms * n + record.actual_time_ms as f64) / (n + 1.0);
        let outcome = if record.success { 1.0 } else { 0.0 };
        self.success_rate = if self.task_count == 0 {
            outcome
        } else {
            (self.success_rate * n + outcome) / (n + 1.0)
        };
        self.task_count += 1;

        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    /// Recent outcome records, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &PerformanceRecord> {
        self.history.iter()
    }
}

/// A computed timeout with its full factor breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutResult {
    pub timeout_ms: u64,
    pub warning_ms: u64,
    pub base_ms: u64,
    pub agent_factor: f64,
    pub complexity_factor: f64,
    pub load_factor: f64,
    pub mode_multiplier: f64,
}

/// Staged checkpoints derived from one computed timeout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProgressiveTimeout {
    /// 30% — first liveness check.
    pub initial_ms: u64,
    /// 70% — warning alert.
    pub warning_ms: u64,
    /// 100% — hard cutoff.
    pub final_ms: u64,
    /// 150% — escalation for cleanup that outlived the cutoff.
    pub escalation_ms: u64,
}

/// Computes adaptive timeouts and learns from task outcomes.
///
/// One lock per agent entry; the outer map lock is only held for
/// lookup and insert.
pub struct IntelligentTimeoutManager {
    profiles: RwLock<HashMap<AgentId, Arc<Mutex<AgentPerformance>>>>,
    config: TimeoutConfig,
    mode: RwLock<OperationalMode>,
}

impl IntelligentTimeoutManager {
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            config,
            mode: RwLock::new(OperationalMode::Normal),
        }
    }

    /// Switch the operational mode for all subsequent computations.
    pub fn set_mode(&self, mode: OperationalMode) {
        *self.mode.write().unwrap_or_else(|e| e.into_inner()) = mode;
    }

    /// Current operational mode.
    pub fn mode(&self) -> OperationalMode {
        *self.mode.read().unwrap_or_else(|e| e.into_inner())
    }

    fn entry(&self, agent_id: &str) -> Arc<Mutex<AgentPerformance>> {
        if let Some(existing) = self
            .profiles
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent_id)
        {
            return Arc::clone(existing);
        }
        let mut map = self.profiles.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(agent_id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(AgentPerformance::new(
                agent_id.to_string(),
                self.config.history_capacity,
            )))
        }))
    }

    /// Feed an observed task outcome into the agent's profile.
    pub fn record_task_performance(
        &self,
        agent_id: &str,
        task_id: &str,
        actual_time_ms: u64,
        success: bool,
    ) {
        let entry = self.entry(agent_id);
        let mut profile = entry.lock().unwrap_or_else(|e| e.into_inner());
        profile.record(PerformanceRecord {
            task_id: task_id.to_string(),
            actual_time_ms,
            success,
        });
        debug!(
            agent_id,
            task_id,
            actual_time_ms,
            success,
            task_count = profile.task_count,
            success_rate = profile.success_rate,
            "performance recorded"
        );
    }

    /// Snapshot an agent's learned profile, if any.
    pub fn agent_performance(&self, agent_id: &str) -> Option<AgentPerformance> {
        let profiles = self.profiles.read().unwrap_or_else(|e| e.into_inner());
        profiles.get(agent_id).map(|entry| {
            entry
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        })
    }

    /// Discard an agent's learned history.
    pub fn reset_agent(&self, agent_id: &str) {
        let mut profiles = self.profiles.write().unwrap_or_else(|e| e.into_inner());
        profiles.remove(agent_id);
    }

    fn agent_factor(&self, agent_id: &str, base_ms: u64) -> f64 {
        let profiles = self.profiles.read().unwrap_or_else(|e| e.into_inner());
        let entry = match profiles.get(agent_id) {
            Some(entry) => Arc::clone(entry),
            None => return 1.0,
        };
        drop(profiles);
        let profile = entry.lock().unwrap_or_else(|e| e.into_inner());
        if profile.task_count == 0 {
            return 1.0;
        }
        let reliability = (2.0 - profile.success_rate).clamp(0.5, 2.0);
        let pace = (profile.avg_response_ms / base_ms as f64).clamp(0.8, 2.0);
        reliability * pace
    }

    /// Compute the timeout for one agent attempt.
    pub fn calculate_timeout(
        &self,
        agent_id: &str,
        complexity: TaskComplexity,
        load: SystemLoad,
    ) -> TimeoutResult {
        let base_ms = self.config.base_ms(complexity);
        let agent_factor = self.agent_factor(agent_id, base_ms);
        let complexity_factor = complexity.multiplier();
        let load_factor = 1.0 + 2.0 * load.normalized();
        let mode_multiplier = self.mode().multiplier();

        let raw =
            base_ms as f64 * agent_factor * complexity_factor * load_factor * mode_multiplier;
        let timeout_ms = (raw.round() as u64).max(self.config.min_timeout_ms);
        let warning_ms = (timeout_ms as f64 * self.config.warning_fraction).round() as u64;

        TimeoutResult {
            timeout_ms,
            warning_ms,
            base_ms,
            agent_factor,
            complexity_factor,
            load_factor,
            mode_multiplier,
        }
    }

    /// Derive staged checkpoints from one computed timeout.
    pub fn progressive_timeout(
        &self,
        agent_id: &str,
        complexity: TaskComplexity,
        load: SystemLoad,
    ) -> ProgressiveTimeout {
        let result = self.calculate_timeout(agent_id, complexity, load);
        let total = result.timeout_ms as f64;
        ProgressiveTimeout {
            initial_ms: (total * 0.3).round() as u64,
            warning_ms: (total * 0.7).round() as u64,
            final_ms: result.timeout_ms,
            escalation_ms: (total * 1.5).round() as u64,
        }
    }
}

impl Default for IntelligentTimeoutManager {
    fn default() -> Self {
        Self::new(TimeoutConfig::default())
    }
}
