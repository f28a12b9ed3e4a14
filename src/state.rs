//! # Application State
//!
//! `AppState` is cloned into every actix worker through `web::Data`. Each
//! field is an `Arc`, so clones share the same configuration, metrics,
//! sessions and pipeline.
//!
//! ## Runtime Configuration Updates:
//! `update_config` validates the new configuration and rebuilds the provider
//! clients and pipeline, so new runs pick up changed models, prompts and the
//! speech toggle. Runs already in flight keep the pipeline they started with.
//! `PUT /config` only reaches the fields `AppConfig::update_from_json` allows;
//! endpoints, keys, the output directory, capture settings and the session
//! limit are fixed when the server starts.

use crate::audio::SessionManager;
use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::providers::{ProviderError, Providers};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub sessions: Arc<SessionManager>,
    pipeline: Arc<RwLock<Arc<Pipeline>>>,
    pub start_time: Instant,
}

#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Counters for one `"METHOD /path"` pattern.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AppState {
    /// Build state with HTTP-backed providers from the configuration.
    pub fn new(config: AppConfig) -> Result<Self, ProviderError> {
        let providers = Providers::from_config(&config.providers)?;
        Ok(Self::with_providers(config, providers))
    }

    /// Build state around an explicit set of providers.
    pub fn with_providers(config: AppConfig, providers: Providers) -> Self {
        let sessions = SessionManager::new(
            config.performance.max_concurrent_sessions,
            config.audio.to_capture_settings(),
        );
        let pipeline = Pipeline::new(providers, &config.pipeline);

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            sessions: Arc::new(sessions),
            pipeline: Arc::new(RwLock::new(Arc::new(pipeline))),
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> AppConfig {
        read_lock(&self.config).clone()
    }

    /// Pipeline used for newly started runs.
    pub fn pipeline(&self) -> Arc<Pipeline> {
        read_lock(&self.pipeline).clone()
    }

    /// Validate and install a new configuration, rebuilding the providers.
    pub fn update_config(&self, new_config: AppConfig) -> anyhow::Result<()> {
        new_config.validate()?;
        let providers = Providers::from_config(&new_config.providers)?;
        self.replace_pipeline(Pipeline::new(providers, &new_config.pipeline));
        *write_lock(&self.config) = new_config;
        Ok(())
    }

    pub fn replace_pipeline(&self, pipeline: Pipeline) {
        *write_lock(&self.pipeline) = Arc::new(pipeline);
    }

    pub fn increment_request_count(&self) {
        write_lock(&self.metrics).request_count += 1;
    }

    pub fn increment_error_count(&self) {
        write_lock(&self.metrics).error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = write_lock(&self.metrics);
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        read_lock(&self.metrics).clone()
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

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
