//! # Application State Management
//!
//! Shared state that HTTP handlers and bridge sessions all reach into: the
//! loaded configuration, request metrics, and bridge counters.
//!
//! Bridge sessions never share *session* state with each other. The only thing
//! they touch here is a handful of counters, which is also where swallowed send
//! failures become visible to operators.
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (every handler and session actor holds a clone)
//! - **RwLock**: Multiple readers OR one writer
//! - Locks are held only long enough to bump a counter or copy a snapshot

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers
/// and bridge sessions.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration, fixed after startup
    pub config: Arc<RwLock<AppConfig>>,

    /// Request and bridge metrics (constantly being updated)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Metrics collected across all HTTP requests and bridge sessions.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of HTTP errors since server start
    pub error_count: u64,

    /// Bridge sessions currently running
    pub active_sessions: u32,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,

    /// Bridge session counters
    pub bridge: BridgeMetrics,
}

/// Counters describing what bridge sessions have done.
///
/// ## Why these matter:
/// - **sessions_rejected**: sessions that ended in `INIT` (missing credential)
/// - **upstream_failures**: connect failures and socket errors on the vendor side
/// - **send_failures**: writes that were swallowed instead of escalated. A rising
///   count points at a systemically failing peer.
/// - **discarded_messages**: malformed, unrecognized, or too-early messages
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BridgeMetrics {
    pub sessions_started: u64,
    pub sessions_rejected: u64,
    pub upstream_failures: u64,
    pub frames_to_upstream: u64,
    pub events_to_client: u64,
    pub discarded_messages: u64,
    pub send_failures: u64,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the lock immediately, so other threads aren't blocked.
    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Metrics are plain counters, so a writer that panicked mid-update
    /// cannot leave them inconsistent enough to matter. Recover instead of
    /// propagating the poison.
    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_ref(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Called when a bridge session actor starts.
    pub fn session_started(&self) {
        let mut metrics = self.metrics_mut();
        metrics.active_sessions += 1;
        metrics.bridge.sessions_started += 1;
    }

    /// Called when a bridge session actor stops. Guards against underflow.
    pub fn session_stopped(&self) {
        let mut metrics = self.metrics_mut();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    pub fn active_sessions(&self) -> u32 {
        self.metrics_ref().active_sessions
    }

    pub fn record_session_rejected(&self) {
        self.metrics_mut().bridge.sessions_rejected += 1;
    }

    pub fn record_upstream_failure(&self) {
        self.metrics_mut().bridge.upstream_failures += 1;
    }

    pub fn record_frame_to_upstream(&self) {
        self.metrics_mut().bridge.frames_to_upstream += 1;
    }

    pub fn record_event_to_client(&self) {
        self.metrics_mut().bridge.events_to_client += 1;
    }

    pub fn record_discarded_message(&self) {
        self.metrics_mut().bridge.discarded_messages += 1;
    }

    pub fn record_send_failure(&self) {
        self.metrics_mut().bridge.send_failures += 1;
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_ref().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time in milliseconds, 0.0 before the first request.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counters() {
        let state = AppState::new(AppConfig::default());
        state.session_started();
        state.session_started();
        state.session_stopped();
        state.session_stopped();
        state.session_stopped(); // no underflow

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_sessions, 0);
        assert_eq!(metrics.bridge.sessions_started, 2);
    }

    #[test]
    fn test_bridge_counters() {
        let state = AppState::new(AppConfig::default());
        state.record_send_failure();
        state.record_send_failure();
        state.record_discarded_message();
        state.record_frame_to_upstream();

        let bridge = state.get_metrics_snapshot().bridge;
        assert_eq!(bridge.send_failures, 2);
        assert_eq!(bridge.discarded_messages, 1);
        assert_eq!(bridge.frames_to_upstream, 1);
        assert_eq!(bridge.events_to_client, 0);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let metrics = state.get_metrics_snapshot();
        let health = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(health.request_count, 2);
        assert_eq!(health.average_duration_ms(), 20.0);
        assert_eq!(health.error_rate(), 0.5);
    }
}
