//! The `DownloadPipeline`: a built middleware chain bound to its downloader.

use super::request_handler::{spawn_downloader_task, InstrumentedDownloader};
use crate::builder::PipelineConfig;
use crate::downloader::Downloader;
use crate::error::PipelineError;
use crate::manager::{DownloaderMiddlewareManager, PipelineOutput};
use crate::request::Request;
use crate::response::Response;
use crate::stats::StatCollector;
use kanal::{AsyncReceiver, AsyncSender};
use std::sync::Arc;
use tracing::info;

/// A middleware chain, the transport it feeds, and the limits the downloader task obeys.
pub struct DownloadPipeline<D> {
    manager: Arc<DownloaderMiddlewareManager>,
    downloader: Arc<InstrumentedDownloader<D>>,
    config: PipelineConfig,
    stats: Arc<StatCollector>,
}

impl<D: Downloader + 'static> DownloadPipeline<D> {
    pub(crate) fn new(
        manager: Arc<DownloaderMiddlewareManager>,
        downloader: Arc<D>,
        config: PipelineConfig,
        stats: Arc<StatCollector>,
    ) -> Self {
        let downloader = Arc::new(InstrumentedDownloader::new(downloader, Arc::clone(&stats)));
        DownloadPipeline {
            manager,
            downloader,
            config,
            stats,
        }
    }

    /// Runs a single request through the pipeline.
    pub async fn download(&self, request: Request) -> Result<PipelineOutput, PipelineError> {
        self.manager.download(self.downloader.as_ref(), request).await
    }

    /// Spawns the downloader task feeding on `req_rx`.
    ///
    /// Responses go to `res_tx`; requests produced by middlewares go to `reschedule_tx`.
    pub fn spawn(
        &self,
        req_rx: AsyncReceiver<Request>,
        res_tx: AsyncSender<Response>,
        reschedule_tx: AsyncSender<Request>,
    ) -> tokio::task::JoinHandle<()> {
        spawn_downloader_task(
            req_rx,
            res_tx,
            reschedule_tx,
            Arc::clone(&self.manager),
            Arc::clone(&self.downloader),
            self.config.clone(),
            Arc::clone(&self.stats),
        )
    }

    /// Body bytes of responses currently alive.
    pub fn current_size(&self) -> usize {
        self.manager.current_size()
    }

    /// Whether the active response size exceeds `max_active_size`.
    pub fn is_saturated(&self) -> bool {
        self.current_size() > self.config.max_active_size
    }

    pub fn manager(&self) -> &Arc<DownloaderMiddlewareManager> {
        &self.manager
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns a cloned Arc to the `StatCollector` of this pipeline.
    pub fn stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.stats)
    }

    /// Closes every middleware, then logs the collected statistics.
    pub async fn close(&self) -> Result<(), PipelineError> {
        let result = self.manager.close().await;
        info!("Download pipeline closed. {}", self.stats);
        result
    }
}
