//! Contains the downloader task that feeds requests through the middleware pipeline.
//!
//! The task:
//!
//! - Receives requests from the scheduler channel
//! - Bounds the number of concurrent pipeline runs
//! - Applies backpressure while too many response bytes are held in memory
//! - Routes each run's outcome: responses onward, new requests back to the scheduler
//!
//! The main entry point is [`spawn_downloader_task`]. It exits once the request
//! channel is closed and every in-flight run has finished.

use crate::builder::PipelineConfig;
use crate::downloader::Downloader;
use crate::error::{DownloadError, Fault, PipelineError};
use crate::manager::{DownloaderMiddlewareManager, PipelineOutput};
use crate::request::Request;
use crate::response::Response;
use crate::stats::StatCollector;
use async_trait::async_trait;
use kanal::{AsyncReceiver, AsyncSender};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};

/// Counts calls that actually reach the transport.
pub(crate) struct InstrumentedDownloader<D> {
    inner: Arc<D>,
    stats: Arc<StatCollector>,
}

impl<D> InstrumentedDownloader<D> {
    pub(crate) fn new(inner: Arc<D>, stats: Arc<StatCollector>) -> Self {
        Self { inner, stats }
    }
}

#[async_trait]
impl<D: Downloader> Downloader for InstrumentedDownloader<D> {
    async fn download(&self, request: Request) -> Result<Response, DownloadError> {
        self.stats.increment_requests_downloaded();
        let url = request.url.clone();
        let start_time = Instant::now();
        let result = self.inner.download(request).await;
        trace!("Download of {} took {:?}", url, start_time.elapsed());
        result
    }
}

pub fn spawn_downloader_task<D>(
    req_rx: AsyncReceiver<Request>,
    res_tx: AsyncSender<Response>,
    reschedule_tx: AsyncSender<Request>,
    manager: Arc<DownloaderMiddlewareManager>,
    downloader: Arc<D>,
    config: PipelineConfig,
    stats: Arc<StatCollector>,
) -> tokio::task::JoinHandle<()>
where
    D: Downloader + ?Sized + 'static,
{
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_downloads));
    let mut tasks = JoinSet::new();

    tokio::spawn(async move {
        trace!(
            "Downloader task started with max_concurrent_downloads: {}, max_active_size: {}",
            config.max_concurrent_downloads,
            config.max_active_size
        );
        loop {
            while let Some(res) = tasks.try_join_next() {
                if let Err(e) = res {
                    error!("A download task failed: {:?}", e);
                }
            }

            let request = match req_rx.recv().await {
                Ok(req) => {
                    trace!("Received request for URL: {}", req.url);
                    stats.increment_requests_received();
                    req
                }
                Err(_) => {
                    trace!("Request channel closed, exiting downloader task");
                    break;
                }
            };

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    warn!("Semaphore closed, shutting down downloader task.");
                    break;
                }
            };

            while manager.current_size() > config.max_active_size {
                trace!(
                    "Applying backpressure, active response size: {} > {}",
                    manager.current_size(),
                    config.max_active_size
                );
                stats.increment_backpressure_waits();
                tokio::time::sleep(config.backpressure_interval).await;
            }

            let manager_clone = Arc::clone(&manager);
            let downloader_clone = Arc::clone(&downloader);
            let res_tx_clone = res_tx.clone();
            let reschedule_tx_clone = reschedule_tx.clone();
            let stats_clone = Arc::clone(&stats);

            tasks.spawn(async move {
                let url = request.url.clone();
                let outcome = manager_clone
                    .download(downloader_clone.as_ref(), request)
                    .await;
                dispatch_outcome(outcome, &url, &res_tx_clone, &reschedule_tx_clone, &stats_clone)
                    .await;
                drop(permit);
            });
        }

        trace!("Waiting for active download tasks to complete");
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!("A download task failed: {:?}", e);
            }
        }
        trace!("Downloader task finished");
    })
}

async fn dispatch_outcome(
    outcome: Result<PipelineOutput, PipelineError>,
    url: &url::Url,
    res_tx: &AsyncSender<Response>,
    reschedule_tx: &AsyncSender<Request>,
    stats: &StatCollector,
) {
    match outcome {
        Ok(PipelineOutput::Response(response)) => {
            stats.increment_requests_succeeded();
            stats.record_response_status(response.status().as_u16());
            stats.add_bytes_received(response.body_len());
            trace!("Sending response for URL: {}", response.url());
            if res_tx.send(response).await.is_err() {
                error!("Response channel closed, cannot send response for URL: {}", url);
            }
        }
        Ok(PipelineOutput::Request(next)) => {
            debug!("Middleware rescheduled {} as {}", url, next.url);
            stats.increment_requests_rescheduled();
            if reschedule_tx.send(next).await.is_err() {
                error!("Reschedule channel closed, request for {} is lost", url);
            }
        }
        Err(PipelineError::Fault(Fault::IgnoreRequest(reason))) => {
            debug!("Request dropped by middleware for URL {}: {}", url, reason);
            stats.increment_requests_ignored();
        }
        Err(e @ PipelineError::InvalidStageOutput { .. }) => {
            error!("Misbehaving middleware while processing {}: {}", url, e);
            stats.increment_invalid_outputs();
        }
        Err(e) => {
            error!("Download error for URL {}: {}", url, e);
            stats.increment_requests_failed();
        }
    }
}
