//! # Builder Module
//!
//! Provides the `PipelineBuilder`, a fluent API for assembling a
//! [`DownloadPipeline`](crate::DownloadPipeline) from a downloader, an ordered list of
//! middlewares and a few limits.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_downloader_middleware::PipelineBuilder;
//!
//! async fn setup() -> Result<(), PipelineError> {
//!     let pipeline = PipelineBuilder::new(MyDownloader::default())
//!         .max_concurrent_downloads(8)
//!         .max_active_size(10 * 1024 * 1024)
//!         .add_middleware(UserAgent("spider/1.0"))
//!         .add_middleware(RetryOnTimeout::default())
//!         .build()
//!         .await?;
//!
//!     let output = pipeline.download(request).await?;
//!     pipeline.close().await
//! }
//! ```

use crate::crawler::DownloadPipeline;
use crate::downloader::Downloader;
use crate::error::PipelineError;
use crate::manager::DownloaderMiddlewareManager;
use crate::middleware::Middleware;
use crate::stats::StatCollector;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Limits applied by the downloader task.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The maximum number of pipeline runs in flight at once.
    pub max_concurrent_downloads: usize,
    /// Response bytes held in memory above which no new download starts.
    pub max_active_size: usize,
    /// How long to sleep between active size checks while saturated.
    pub backpressure_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            max_concurrent_downloads: num_cpus::get().max(16),
            max_active_size: 5_000_000,
            backpressure_interval: Duration::from_millis(50),
        }
    }
}

pub struct PipelineBuilder<D: Downloader> {
    config: PipelineConfig,
    downloader: D,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl<D: Downloader + 'static> PipelineBuilder<D> {
    pub fn new(downloader: D) -> Self {
        Self {
            config: PipelineConfig::default(),
            downloader,
            middlewares: Vec::new(),
        }
    }

    pub fn max_concurrent_downloads(mut self, limit: usize) -> Self {
        self.config.max_concurrent_downloads = limit;
        self
    }

    pub fn max_active_size(mut self, bytes: usize) -> Self {
        self.config.max_active_size = bytes;
        self
    }

    pub fn backpressure_interval(mut self, interval: Duration) -> Self {
        self.config.backpressure_interval = interval;
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Appends a middleware. The first one added sees requests first and responses last.
    pub fn add_middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Appends a middleware that is also referenced elsewhere.
    pub fn add_shared_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Validates the configuration, registers the middlewares and calls their `open` hooks.
    pub async fn build(self) -> Result<DownloadPipeline<D>, PipelineError> {
        self.validate()?;

        let manager = DownloaderMiddlewareManager::from_middlewares(self.middlewares);
        manager.open().await?;
        debug!(
            "Download pipeline built with {} middlewares and config {:?}",
            manager.len(),
            self.config
        );

        Ok(DownloadPipeline::new(
            Arc::new(manager),
            Arc::new(self.downloader),
            self.config,
            Arc::new(StatCollector::new()),
        ))
    }

    fn validate(&self) -> Result<(), PipelineError> {
        if self.config.max_concurrent_downloads == 0 {
            return Err(PipelineError::Configuration(
                "max_concurrent_downloads must be greater than 0.".to_string(),
            ));
        }
        if self.config.max_active_size == 0 {
            return Err(PipelineError::Configuration(
                "max_active_size must be greater than 0.".to_string(),
            ));
        }
        if self.config.backpressure_interval.is_zero() {
            return Err(PipelineError::Configuration(
                "backpressure_interval must be non-zero.".to_string(),
            ));
        }
        Ok(())
    }
}
