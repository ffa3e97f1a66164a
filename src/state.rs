//! # Application State Management
//!
//! Shared state every request handler and WebSocket actor can reach: the
//! runtime configuration, server metrics, the application store, the session
//! registry, and the pipeline client.
//!
//! ## Arc<RwLock<T>> Pattern:
//! Configuration and metrics are mutable at runtime, so they live behind
//! `Arc<RwLock<_>>`: many readers or one writer, and cloning `AppState`
//! just bumps reference counts. The store and registry manage their own
//! interior locking; the pipeline client is immutable after startup.

use crate::config::AppConfig;
use crate::pipeline::AgentPipeline;
use crate::session::SessionRegistry;
use crate::store::engine::ApplicationStore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Server metrics (updated on every request and session event)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// The job-application store all sessions mutate
    store: Arc<ApplicationStore>,

    /// Live-session registry (capacity enforcement + reporting)
    registry: Arc<SessionRegistry>,

    /// Client for the external speech/agent service
    pipeline: Arc<dyn AgentPipeline>,

    /// When the server started (immutable, safe to share directly)
    pub start_time: Instant,
}

/// Metrics collected across HTTP requests and voice sessions.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of request errors since server start
    pub error_count: u64,

    /// Utterances committed and handed to the pipeline
    pub utterances_processed: u64,

    /// Agent turns that ended in an upstream failure
    pub turns_failed: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint request statistics.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl EndpointMetric {
    /// Average response time for this endpoint in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: Arc<dyn AgentPipeline>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.session.max_concurrent_sessions));
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            store: Arc::new(ApplicationStore::new()),
            registry,
            pipeline,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration. Cloning releases the read
    /// lock immediately so nothing blocks on a handler.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn store(&self) -> Arc<ApplicationStore> {
        self.store.clone()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    pub fn pipeline(&self) -> Arc<dyn AgentPipeline> {
        self.pipeline.clone()
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap().error_count += 1;
    }

    pub fn record_utterance(&self) {
        self.metrics.write().unwrap().utterances_processed += 1;
    }

    pub fn record_turn_failure(&self) {
        self.metrics.write().unwrap().turns_failed += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Snapshot of current metrics (for the metrics endpoint). Cloned so no
    /// lock is held while the HTTP response serializes.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            utterances_processed: metrics.utterances_processed,
            turns_failed: metrics.turns_failed,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
