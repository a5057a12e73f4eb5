//! # spider-downloader-middleware
//!
//! Downloader middleware pipeline of the `spider-lib` web scraping framework.
//!
//! Sits between the crawling engine and the network transport: every outgoing
//! request, every incoming response and every download fault passes through an
//! ordered chain of [`Middleware`]s, any of which may short-circuit the chain. The
//! pipeline also keeps a running total of response bytes held in memory so the
//! engine can apply backpressure.
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_downloader_middleware::prelude::*;
//!
//! async fn fetch(request: Request) -> Result<Response, DownloadError> {
//!     todo!()
//! }
//!
//! async fn run() -> Result<(), PipelineError> {
//!     let pipeline = PipelineBuilder::new(fetch)
//!         .add_middleware(UserAgent("spider/1.0"))
//!         .build()
//!         .await?;
//!
//!     let url = url::Url::parse("https://example.com").unwrap();
//!     match pipeline.download(Request::new(url)).await? {
//!         PipelineOutput::Response(response) => println!("{}", response),
//!         PipelineOutput::Request(request) => println!("reschedule {}", request),
//!     }
//!     pipeline.close().await
//! }
//! ```

pub mod builder;
pub mod crawler;
pub mod downloader;
pub mod error;
pub mod manager;
pub mod middleware;
pub mod prelude;
pub mod request;
pub mod response;
pub mod stats;
pub mod tracker;

pub use builder::{PipelineBuilder, PipelineConfig};
pub use crawler::{spawn_downloader_task, DownloadPipeline};
pub use downloader::Downloader;
pub use error::{DownloadError, Fault, Phase, PipelineError};
pub use manager::{DownloaderMiddlewareManager, PipelineOutput};
pub use middleware::{
    ExceptionHandler, ForeignValue, Middleware, RequestHandler, ResponseHandler, StageOutput,
};
pub use request::Request;
pub use response::{Response, ResponseBuilder};
pub use stats::StatCollector;
pub use tracker::ActiveSizeTracker;

pub use async_trait::async_trait;
pub use tokio;
