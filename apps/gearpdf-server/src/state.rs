//! Application state management

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::compress::{CompressionService, Compressor};
use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pub config: Config,
    pub compression: CompressionService,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create a new application state around a compressor backend
    pub fn new(config: Config, compressor: Arc<dyn Compressor>) -> Self {
        Self::with_second_stage(config, compressor, None)
    }

    /// Like [`AppState::new`], with a compressor that takes over when the
    /// primary one misses the target or fails
    pub fn with_second_stage(
        config: Config,
        compressor: Arc<dyn Compressor>,
        second_stage: Option<Arc<dyn Compressor>>,
    ) -> Self {
        let compression = CompressionService::new(
            compressor,
            second_stage,
            config.compression.max_concurrent_jobs,
            config.compression.timeout(),
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                compression,
                started_at: Utc::now(),
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the compression service
    pub fn compression(&self) -> &CompressionService {
        &self.inner.compression
    }

    /// When this process started serving
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }
}
