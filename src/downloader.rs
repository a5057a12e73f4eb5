//! The transport the pipeline hands requests to once no middleware short-circuited.

use crate::error::DownloadError;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use std::future::Future;

/// Performs the actual network download of a request.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, request: Request) -> Result<Response, DownloadError>;
}

#[async_trait]
impl<F, Fut> Downloader for F
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, DownloadError>> + Send + 'static,
{
    async fn download(&self, request: Request) -> Result<Response, DownloadError> {
        (self)(request).await
    }
}
