//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## What is shared and how:
//! - **config**: resolved once at startup, never mutated, so a plain `Arc`
//! - **dispatcher**: gate, connector settings and the session slot counter;
//!   the counter is atomic, everything else is read-only
//! - **metrics**: counters updated by the middleware and once per session
//!   outcome, behind `Arc<RwLock<T>>`
//!
//! Sessions never touch this state while relaying audio. Each one owns its
//! legs outright and only reports here when it starts and when it ends.
//!
//! ## Lock poisoning:
//! Metrics are plain counters; a panic while holding the lock cannot leave
//! them in a state worth refusing to read, so a poisoned lock is recovered
//! with `PoisonError::into_inner` instead of propagating the panic.

use crate::config::AppConfig;
use crate::error::RelayError;
use crate::relay::session::SessionSummary;
use crate::relay::RelayDispatcher;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    /// Startup configuration (read-only)
    pub config: Arc<AppConfig>,

    /// Admission and session wiring for upgrade requests
    pub dispatcher: Arc<RelayDispatcher>,

    /// Counters for the metrics endpoint
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all requests and sessions.
///
/// ## Session outcomes:
/// - **sessions_completed**: reached Active before ending
/// - **sessions_failed_connect**: the upstream leg never opened
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Requests answered with a 4xx or 5xx status
    pub error_count: u64,

    pub sessions_started: u64,
    pub sessions_completed: u64,
    pub sessions_failed_connect: u64,

    pub upgrades_unauthorized: u64,
    pub upgrades_not_found: u64,
    pub upgrades_over_capacity: u64,

    /// Caller audio frames relayed to the realtime API
    pub frames_upstream: u64,

    /// Assistant audio frames relayed to the caller
    pub frames_downstream: u64,

    /// Frames discarded (not active yet, malformed, undecodable)
    pub frames_dropped: u64,

    pub marks_sent: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for one endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,

    /// Total time spent on this endpoint (milliseconds)
    pub total_duration_ms: u64,

    pub error_count: u64,
}

impl AppState {
    /// Build the shared state; the dispatcher is derived from the same config.
    pub fn new(config: AppConfig) -> Self {
        let dispatcher = RelayDispatcher::from_config(&config);
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by the metrics middleware for every request.
    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    /// Record one request against its endpoint label.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count an upgrade that never became a session.
    pub fn record_upgrade_rejected(&self, err: &RelayError) {
        let mut metrics = self.metrics_mut();
        match err {
            RelayError::AuthRejected => metrics.upgrades_unauthorized += 1,
            RelayError::RouteNotFound(_) => metrics.upgrades_not_found += 1,
            RelayError::CapacityExceeded(_) => metrics.upgrades_over_capacity += 1,
            _ => {}
        }
    }

    pub fn record_session_started(&self) {
        self.metrics_mut().sessions_started += 1;
    }

    /// Fold one finished session into the totals.
    pub fn record_session_finished(&self, summary: &SessionSummary) {
        let mut metrics = self.metrics_mut();

        if summary.reached_active {
            metrics.sessions_completed += 1;
        } else if matches!(summary.end_reason, Some(RelayError::UpstreamConnectFailure(_))) {
            metrics.sessions_failed_connect += 1;
        }

        metrics.frames_upstream += summary.frames_upstream;
        metrics.frames_downstream += summary.frames_downstream;
        metrics.frames_dropped += summary.frames_dropped;
        metrics.marks_sent += summary.marks_sent;
    }

    /// Copy of the current metrics, so no lock is held while responding.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, from 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
