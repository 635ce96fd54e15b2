//! Per-platform circuit breakers.
//!
//! Tracks consecutive failures and successes per [`PlatformId`]. After a
//! configurable run of failures the circuit *opens* and the platform is
//! excluded from candidate selection. Once the cooldown elapses the
//! circuit enters *half-open* and admits a limited number of trial
//! probes; enough consecutive successes close it again, any failure
//! reopens it. Recovery always passes through half-open — an open
//! circuit never closes directly.
//!
//! State changes are published on the event bus so persistence and
//! logging can subscribe without coupling to the breaker itself.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

use crate::events::{CoordinationEvent, SharedEventBus};
use crate::platform::PlatformId;

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Circuit state for a single platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy — calls allowed.
    Closed,
    /// Tripped — platform excluded until cooldown expires.
    Open,
    /// Cooldown expired — limited trial probes admitted.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Breaker thresholds, shared by default across platforms and
/// overridable per platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before CLOSED → OPEN.
    pub failure_threshold: u32,
    /// Seconds after the last transition before OPEN → HALF_OPEN.
    pub cooldown_secs: u64,
    /// Consecutive successes in HALF_OPEN before the circuit closes.
    pub success_threshold: u32,
    /// Trial probes admitted concurrently while HALF_OPEN.
    pub half_open_max_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 60,
            success_threshold: 3,
            half_open_max_probes: 3,
        }
    }
}

/// Mutable circuit for one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformCircuit {
    /// The platform this circuit guards.
    pub platform: PlatformId,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures since the last success.
    pub consecutive_failures: u32,
    /// Consecutive successes since the last failure.
    pub consecutive_successes: u32,
    /// Unix seconds of the last state change.
    pub last_transition_secs: u64,
    /// Trial probes currently admitted (HALF_OPEN only).
    pub probes_in_flight: u32,
    config: BreakerConfig,
}

impl PlatformCircuit {
    fn new(platform: PlatformId, config: BreakerConfig) -> Self {
        Self {
            platform,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_transition_secs: unix_now(),
            probes_in_flight: 0,
            config,
        }
    }

    fn transition(&mut self, next: CircuitState) -> (CircuitState, CircuitState) {
        let old = self.state;
        self.state = next;
        self.last_transition_secs = unix_now();
        self.probes_in_flight = 0;
        (old, next)
    }

    /// Apply the time-based OPEN → HALF_OPEN transition if due.
    fn refresh(&mut self) -> Option<(CircuitState, CircuitState)> {
        if self.state == CircuitState::Open
            && unix_now().saturating_sub(self.last_transition_secs) >= self.config.cooldown_secs
        {
            self.consecutive_successes = 0;
            return Some(self.transition(CircuitState::HalfOpen));
        }
        None
    }

    /// Whether a call may be admitted right now.
    fn eligible(&self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => self.probes_in_flight < self.config.half_open_max_probes,
        }
    }

    /// Record an outcome, returning every transition it caused in
    /// order. The cooldown refresh and the outcome itself can each
    /// produce one.
    fn record(&mut self, success: bool) -> Vec<(CircuitState, CircuitState)> {
        let mut changes = Vec::new();
        if let Some(change) = self.refresh() {
            changes.push(change);
        }
        if let Some(change) = self.apply_outcome(success) {
            changes.push(change);
        }
        changes
    }

    fn apply_outcome(&mut self, success: bool) -> Option<(CircuitState, CircuitState)> {
        match self.state {
            CircuitState::Closed => {
                if success {
                    self.consecutive_successes += 1;
                    self.consecutive_failures = 0;
                    None
                } else {
                    self.consecutive_failures += 1;
                    self.consecutive_successes = 0;
                    if self.consecutive_failures >= self.config.failure_threshold {
                        Some(self.transition(CircuitState::Open))
                    } else {
                        None
                    }
                }
            }
            CircuitState::HalfOpen => {
                self.probes_in_flight = self.probes_in_flight.saturating_sub(1);
                if success {
                    self.consecutive_successes += 1;
                    self.consecutive_failures = 0;
                    if self.consecutive_successes >= self.config.success_threshold {
                        Some(self.transition(CircuitState::Closed))
                    } else {
                        None
                    }
                } else {
                    self.consecutive_failures += 1;
                    self.consecutive_successes = 0;
                    Some(self.transition(CircuitState::Open))
                }
            }
            CircuitState::Open => {
                // Late completions while open only refresh the cooldown
                // window on failure; a success never closes an open circuit.
                if !success {
                    self.last_transition_secs = unix_now();
                }
                None
            }
        }
    }
}

/// Registry of per-platform circuits with fine-grained locking.
///
/// One mutex per platform entry; the outer map lock is only held for
/// lookup/insert, never across an outcome recording.
pub struct CircuitBreaker {
    circuits: RwLock<HashMap<PlatformId, Arc<Mutex<PlatformCircuit>>>>,
    default_config: BreakerConfig,
    bus: Option<SharedEventBus>,
}

impl CircuitBreaker {
    /// Create a breaker registry with a shared default config.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            default_config: config,
            bus: None,
        }
    }

    /// Attach an event bus for state-change events.
    pub fn with_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Override the config for one platform.
    pub fn set_platform_config(&self, platform: PlatformId, config: BreakerConfig) {
        let entry = self.entry(platform);
        let mut circuit = entry.lock().unwrap_or_else(|e| e.into_inner());
        circuit.config = config;
    }

    fn entry(&self, platform: PlatformId) -> Arc<Mutex<PlatformCircuit>> {
        if let Some(existing) = self
            .circuits
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&platform)
        {
            return Arc::clone(existing);
        }
        let mut map = self.circuits.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(platform).or_insert_with(|| {
            Arc::new(Mutex::new(PlatformCircuit::new(
                platform,
                self.default_config.clone(),
            )))
        }))
    }

    fn publish_transition(&self, platform: PlatformId, old: CircuitState, new: CircuitState) {
        let span = crate::otel::breaker_transition_span(
            &platform.to_string(),
            &old.to_string(),
            &new.to_string(),
        );
        let _guard = span.enter();
        debug!(%platform, %old, %new, "circuit transition");
        if let Some(bus) = &self.bus {
            let _ = bus.publish(CoordinationEvent::breaker_state_changed(platform, old, new));
        }
    }

    /// Record a call outcome for a platform.
    pub fn record_outcome(&self, platform: PlatformId, success: bool) {
        let entry = self.entry(platform);
        let changes = {
            let mut circuit = entry.lock().unwrap_or_else(|e| e.into_inner());
            circuit.record(success)
        };
        for (old, new) in changes {
            self.publish_transition(platform, old, new);
        }
    }

    /// Whether the platform may be selected as a candidate right now.
    ///
    /// True for CLOSED, and for HALF_OPEN while trial slots remain.
    pub fn is_eligible(&self, platform: PlatformId) -> bool {
        let entry = self.entry(platform);
        let (eligible, change) = {
            let mut circuit = entry.lock().unwrap_or_else(|e| e.into_inner());
            let change = circuit.refresh();
            (circuit.eligible(), change)
        };
        if let Some((old, new)) = change {
            self.publish_transition(platform, old, new);
        }
        eligible
    }

    /// Admit an attempt, consuming a trial slot when HALF_OPEN.
    ///
    /// Returns false when the platform is not currently eligible. Every
    /// admitted attempt must be paired with a later [`Self::record_outcome`].
    pub fn begin_attempt(&self, platform: PlatformId) -> bool {
        let entry = self.entry(platform);
        let (admitted, change) = {
            let mut circuit = entry.lock().unwrap_or_else(|e| e.into_inner());
            let change = circuit.refresh();
            if circuit.eligible() {
                if circuit.state == CircuitState::HalfOpen {
                    circuit.probes_in_flight += 1;
                }
                (true, change)
            } else {
                (false, change)
            }
        };
        if let Some((old, new)) = change {
            self.publish_transition(platform, old, new);
        }
        admitted
    }

    /// Current state of the platform's circuit.
    pub fn state(&self, platform: PlatformId) -> CircuitState {
        let entry = self.entry(platform);
        let (state, change) = {
            let mut circuit = entry.lock().unwrap_or_else(|e| e.into_inner());
            let change = circuit.refresh();
            (circuit.state, change)
        };
        if let Some((old, new)) = change {
            self.publish_transition(platform, old, new);
        }
        state
    }

    /// Consecutive failures recorded for the platform.
    pub fn failure_count(&self, platform: PlatformId) -> u32 {
        let entry = self.entry(platform);
        let circuit = entry.lock().unwrap_or_else(|e| e.into_inner());
        circuit.consecutive_failures
    }

    /// Snapshot of one platform's circuit for diagnostics.
    pub fn circuit(&self, platform: PlatformId) -> PlatformCircuit {
        let entry = self.entry(platform);
        let circuit = entry.lock().unwrap_or_else(|e| e.into_inner());
        circuit.clone()
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
