//! Session limit detection.
//!
//! Polls a metrics source for each registered session, classifies
//! context-window utilization into warning levels, and publishes a
//! level-transition event whenever a session's level rises. The
//! detector only classifies; it never mutates session state. The
//! fallback manager subscribes to `emergency` transitions, while
//! `warning` and `critical` map to advisory compression levels for
//! context preservation.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::{CoordinationError, CoordinationResult};
use crate::events::{CoordinationEvent, SharedEventBus};
use crate::memory::CompressionLevel;
use crate::platform::PlatformId;
use crate::types::{SessionId, TaskId};

/// Default poll interval for the monitoring loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Utilization classification with fixed breakpoints.
///
/// Boundaries are closed on the lower bound: 0.70 is already `Warning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningLevel {
    Normal,
    Warning,
    Critical,
    Emergency,
}

impl WarningLevel {
    /// Classify a utilization ratio. Pure and monotone.
    pub fn classify(utilization: f64) -> Self {
        if utilization >= 0.95 {
            Self::Emergency
        } else if utilization >= 0.85 {
            Self::Critical
        } else if utilization >= 0.70 {
            Self::Warning
        } else {
            Self::Normal
        }
    }

    /// Advisory compression level for context preservation at this level.
    pub fn compression_level(&self) -> CompressionLevel {
        match self {
            Self::Normal => CompressionLevel::Standard,
            Self::Warning => CompressionLevel::Proactive,
            Self::Critical | Self::Emergency => CompressionLevel::Aggressive,
        }
    }
}

impl std::fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

/// One observation of a session's utilization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub session_id: SessionId,
    pub tokens_used: u64,
    pub utilization: f64,
    pub level: WarningLevel,
}

/// Supplies current token usage per session.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Tokens consumed by the session, or `None` when unknown.
    async fn tokens_used(&self, session_id: &str) -> Option<u64>;
}

#[derive(Debug, Clone)]
struct WatchedSession {
    task_id: TaskId,
    platform: PlatformId,
    last_level: WarningLevel,
    last_sample: Option<UtilizationSample>,
    /// Set when the metrics source could not report usage last tick.
    unknown_risk: bool,
}

/// Monitors registered sessions for context-limit risk.
pub struct SessionLimitDetector {
    sessions: RwLock<HashMap<SessionId, WatchedSession>>,
    /// Context ceilings in tokens per platform.
    ceilings: HashMap<PlatformId, u64>,
    metrics: Arc<dyn MetricsSource>,
    bus: SharedEventBus,
    monitoring: AtomicBool,
    poll_interval: Duration,
}

impl SessionLimitDetector {
    pub fn new(metrics: Arc<dyn MetricsSource>, bus: SharedEventBus) -> Self {
        let ceilings = PlatformId::all()
            .iter()
            .map(|p| (*p, p.default_context_ceiling()))
            .collect();
        Self {
            sessions: RwLock::new(HashMap::new()),
            ceilings,
            metrics,
            bus,
            monitoring: AtomicBool::new(false),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Replace the ceiling table. Platforms absent from the map are
    /// treated as unknown by [`Self::calculate_utilization`].
    pub fn with_ceilings(mut self, ceilings: HashMap<PlatformId, u64>) -> Self {
        self.ceilings = ceilings;
        self
    }

    /// Override the monitoring poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Begin watching a session.
    pub fn register_session(&self, session_id: &str, task_id: &str, platform: PlatformId) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(
            session_id.to_string(),
            WatchedSession {
                task_id: task_id.to_string(),
                platform,
                last_level: WarningLevel::Normal,
                last_sample: None,
                unknown_risk: false,
            },
        );
    }

    /// Stop watching a session.
    pub fn remove_session(&self, session_id: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
    }

    /// Re-point a watched session at a new platform after a handoff,
    /// resetting its level.
    pub fn migrate_session(&self, session_id: &str, platform: PlatformId) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(watch) = sessions.get_mut(session_id) {
            watch.platform = platform;
            watch.last_level = WarningLevel::Normal;
            watch.last_sample = None;
            watch.unknown_risk = false;
        }
    }

    /// Ratio of tokens used to the platform's context ceiling, clamped
    /// to `[0, 1]`.
    pub fn calculate_utilization(
        &self,
        tokens_used: u64,
        platform: PlatformId,
    ) -> CoordinationResult<f64> {
        let ceiling = self
            .ceilings
            .get(&platform)
            .copied()
            .ok_or(CoordinationError::UnknownPlatform { platform })?;
        if ceiling == 0 {
            return Err(CoordinationError::InvalidConfig {
                detail: format!("zero context ceiling for {}", platform),
            });
        }
        Ok((tokens_used as f64 / ceiling as f64).clamp(0.0, 1.0))
    }

    /// True only when the session's last observed level is `critical`
    /// or `emergency`.
    pub fn is_session_approaching_limit(&self, session_id: &str) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(session_id)
            .map(|w| w.last_level >= WarningLevel::Critical)
            .unwrap_or(false)
    }

    /// Last observed level for a session.
    pub fn current_level(&self, session_id: &str) -> Option<WarningLevel> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).map(|w| w.last_level)
    }

    /// Most recent utilization sample for a session, if one landed.
    pub fn latest_sample(&self, session_id: &str) -> Option<UtilizationSample> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).and_then(|w| w.last_sample.clone())
    }

    /// Whether the last poll failed to classify this session (missing
    /// metrics or an unusable ceiling). Cleared by the next good sample.
    pub fn is_unknown_risk(&self, session_id: &str) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(session_id)
            .map(|w| w.unknown_risk)
            .unwrap_or(false)
    }

    /// Poll every watched session once, publishing transitions for any
    /// level increases. Returns the samples observed this tick.
    pub async fn sample(&self) -> Vec<UtilizationSample> {
        let span = crate::otel::monitor_tick_span();
        let tick_started = std::time::Instant::now();
        let watched: Vec<(SessionId, WatchedSession)> = {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            sessions
                .iter()
                .map(|(id, w)| (id.clone(), w.clone()))
                .collect()
        };

        let mut samples = Vec::with_capacity(watched.len());
        for (session_id, watch) in watched {
            let tokens = match self.metrics.tokens_used(&session_id).await {
                Some(tokens) => tokens,
                None => {
                    warn!(session_id, "metrics source returned no usage");
                    let mut sessions =
                        self.sessions.write().unwrap_or_else(|e| e.into_inner());
                    if let Some(w) = sessions.get_mut(&session_id) {
                        w.unknown_risk = true;
                    }
                    continue;
                }
            };

            let utilization = match self.calculate_utilization(tokens, watch.platform) {
                Ok(ratio) => ratio,
                Err(err) => {
                    warn!(session_id, %err, "utilization calculation failed");
                    let mut sessions =
                        self.sessions.write().unwrap_or_else(|e| e.into_inner());
                    if let Some(w) = sessions.get_mut(&session_id) {
                        w.unknown_risk = true;
                    }
                    continue;
                }
            };
            let level = WarningLevel::classify(utilization);
            debug!(session_id, utilization, %level, "session sampled");

            if level > watch.last_level {
                let _ = self.bus.publish(CoordinationEvent::LevelTransition {
                    session_id: session_id.clone(),
                    task_id: watch.task_id.clone(),
                    platform: watch.platform,
                    old_level: watch.last_level,
                    new_level: level,
                    utilization,
                    timestamp: Utc::now(),
                });
            }

            let sample = UtilizationSample {
                session_id: session_id.clone(),
                tokens_used: tokens,
                utilization,
                level,
            };
            {
                let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
                if let Some(w) = sessions.get_mut(&session_id) {
                    w.last_level = level;
                    w.last_sample = Some(sample.clone());
                    w.unknown_risk = false;
                }
            }
            samples.push(sample);
        }
        crate::otel::record_monitor_tick(
            &span,
            samples.len(),
            tick_started.elapsed().as_millis() as u64,
        );
        samples
    }

    /// Start the recurring monitoring loop. Idempotent; a second call
    /// while active is a no-op.
    pub fn start_monitoring(self: Arc<Self>) {
        if self.monitoring.swap(true, Ordering::SeqCst) {
            return;
        }
        let detector = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(detector.poll_interval);
            loop {
                ticker.tick().await;
                if !detector.monitoring.load(Ordering::SeqCst) {
                    break;
                }
                detector.sample().await;
            }
        });
    }

    /// Stop the monitoring loop. Idempotent.
    pub fn stop_monitoring(&self) {
        self.monitoring.store(false, Ordering::SeqCst);
    }

    /// Whether the monitoring loop is currently running.
    pub fn is_monitoring_active(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use std::sync::Mutex;

    struct FakeMetrics {
        usage: Mutex<HashMap<String, u64>>,
    }

    impl FakeMetrics {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                usage: Mutex::new(HashMap::new()),
            })
        }

        fn set(&self, session_id: &str, tokens: u64) {
            self.usage
                .lock()
                .unwrap()
                .insert(session_id.to_string(), tokens);
        }
    }

    #[async_trait]
    impl MetricsSource for FakeMetrics {
        async fn tokens_used(&self, session_id: &str) -> Option<u64> {
            self.usage.lock().unwrap().get(session_id).copied()
        }
    }

    fn detector(metrics: Arc<FakeMetrics>) -> Arc<SessionLimitDetector> {
        Arc::new(SessionLimitDetector::new(
            metrics,
            EventBus::new().shared(),
        ))
    }

    #[test]
    fn test_classify_breakpoints() {
        assert_eq!(WarningLevel::classify(0.0), WarningLevel::Normal);
        assert_eq!(WarningLevel::classify(0.699), WarningLevel::Normal);
        assert_eq!(WarningLevel::classify(0.70), WarningLevel::Warning);
        assert_eq!(WarningLevel::classify(0.849), WarningLevel::Warning);
        assert_eq!(WarningLevel::classify(0.85), WarningLevel::Critical);
        assert_eq!(WarningLevel::classify(0.949), WarningLevel::Critical);
        assert_eq!(WarningLevel::classify(0.95), WarningLevel::Emergency);
        assert_eq!(WarningLevel::classify(1.0), WarningLevel::Emergency);
    }

    #[test]
    fn test_level_ordering() {
        assert!(WarningLevel::Emergency > WarningLevel::Critical);
        assert!(WarningLevel::Critical > WarningLevel::Warning);
        assert!(WarningLevel::Warning > WarningLevel::Normal);
    }

    #[test]
    fn test_compression_advisories() {
        assert_eq!(
            WarningLevel::Warning.compression_level(),
            CompressionLevel::Proactive
        );
        assert_eq!(
            WarningLevel::Critical.compression_level(),
            CompressionLevel::Aggressive
        );
    }

    #[test]
    fn test_calculate_utilization() {
        let d = detector(FakeMetrics::new());
        let ratio = d
            .calculate_utilization(100_000, PlatformId::ClaudeCode)
            .unwrap();
        assert!((ratio - 0.5).abs() < 1e-9);
        // Overshoot clamps to 1.0.
        let ratio = d
            .calculate_utilization(400_000, PlatformId::ClaudeCode)
            .unwrap();
        assert!((ratio - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_platform_ceiling() {
        let metrics = FakeMetrics::new();
        let d = SessionLimitDetector::new(metrics, EventBus::new().shared())
            .with_ceilings(HashMap::new());
        let err = d
            .calculate_utilization(1_000, PlatformId::ClaudeCode)
            .unwrap_err();
        assert!(matches!(err, CoordinationError::UnknownPlatform { .. }));
    }

    #[tokio::test]
    async fn test_sample_emits_transition_on_increase() {
        let metrics = FakeMetrics::new();
        let bus = EventBus::new().shared();
        let mut rx = bus.subscribe();
        let d = Arc::new(SessionLimitDetector::new(
            Arc::clone(&metrics) as Arc<dyn MetricsSource>,
            Arc::clone(&bus),
        ));
        d.register_session("s1", "t1", PlatformId::ClaudeCode);

        metrics.set("s1", 150_000); // 0.75 → warning
        d.sample().await;

        let event = rx.recv().await.unwrap();
        match event {
            CoordinationEvent::LevelTransition {
                old_level,
                new_level,
                ..
            } => {
                assert_eq!(old_level, WarningLevel::Normal);
                assert_eq!(new_level, WarningLevel::Warning);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_transition_when_level_steady() {
        let metrics = FakeMetrics::new();
        let bus = EventBus::new().shared();
        let mut rx = bus.subscribe();
        let d = Arc::new(SessionLimitDetector::new(
            Arc::clone(&metrics) as Arc<dyn MetricsSource>,
            Arc::clone(&bus),
        ));
        d.register_session("s1", "t1", PlatformId::ClaudeCode);

        metrics.set("s1", 150_000);
        d.sample().await;
        let _ = rx.recv().await.unwrap();

        // Same level again; nothing new on the bus.
        d.sample().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_approaching_limit() {
        let metrics = FakeMetrics::new();
        let d = detector(Arc::clone(&metrics));
        d.register_session("s1", "t1", PlatformId::ClaudeCode);

        metrics.set("s1", 150_000); // warning
        d.sample().await;
        assert!(!d.is_session_approaching_limit("s1"));

        metrics.set("s1", 180_000); // 0.9 → critical
        d.sample().await;
        assert!(d.is_session_approaching_limit("s1"));
        assert!(!d.is_session_approaching_limit("unregistered"));
    }

    #[tokio::test]
    async fn test_latest_sample_retained() {
        let metrics = FakeMetrics::new();
        let d = detector(Arc::clone(&metrics));
        d.register_session("s1", "t1", PlatformId::ClaudeCode);
        assert!(d.latest_sample("s1").is_none());

        metrics.set("s1", 100_000);
        d.sample().await;
        let sample = d.latest_sample("s1").unwrap();
        assert_eq!(sample.tokens_used, 100_000);
        assert_eq!(sample.level, WarningLevel::Normal);
    }

    #[tokio::test]
    async fn test_migrate_resets_level() {
        let metrics = FakeMetrics::new();
        let d = detector(Arc::clone(&metrics));
        d.register_session("s1", "t1", PlatformId::ClaudeCode);

        metrics.set("s1", 195_000); // emergency
        d.sample().await;
        assert_eq!(d.current_level("s1"), Some(WarningLevel::Emergency));

        d.migrate_session("s1", PlatformId::GeminiCli);
        assert_eq!(d.current_level("s1"), Some(WarningLevel::Normal));
    }

    #[tokio::test]
    async fn test_monitoring_toggle_idempotent() {
        let d = detector(FakeMetrics::new());
        assert!(!d.is_monitoring_active());
        Arc::clone(&d).start_monitoring();
        Arc::clone(&d).start_monitoring();
        assert!(d.is_monitoring_active());
        d.stop_monitoring();
        d.stop_monitoring();
        assert!(!d.is_monitoring_active());
    }

    #[tokio::test]
    async fn test_missing_metrics_marks_unknown_risk() {
        let metrics = FakeMetrics::new();
        let d = detector(Arc::clone(&metrics));
        d.register_session("s1", "t1", PlatformId::ClaudeCode);

        let samples = d.sample().await;
        assert!(samples.is_empty());
        assert_eq!(d.current_level("s1"), Some(WarningLevel::Normal));
        assert!(d.is_unknown_risk("s1"));

        // A good sample clears the mark.
        metrics.set("s1", 10_000);
        d.sample().await;
        assert!(!d.is_unknown_risk("s1"));
    }

    #[tokio::test]
    async fn test_unusable_ceiling_marks_unknown_risk() {
        let metrics = FakeMetrics::new();
        let d = Arc::new(
            SessionLimitDetector::new(
                Arc::clone(&metrics) as Arc<dyn MetricsSource>,
                EventBus::new().shared(),
            )
            .with_ceilings(HashMap::new()),
        );
        d.register_session("s1", "t1", PlatformId::ClaudeCode);
        metrics.set("s1", 10_000);

        let samples = d.sample().await;
        assert!(samples.is_empty());
        assert!(d.is_unknown_risk("s1"));
    }
}
