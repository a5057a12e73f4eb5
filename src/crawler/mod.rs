//! # Crawler Module
//!
//! Engine-side plumbing around the [`DownloaderMiddlewareManager`](crate::DownloaderMiddlewareManager).
//!
//! ## Key Components
//!
//! - **DownloadPipeline**: bundles the manager, the downloader, limits and statistics
//! - **Downloader Task**: pulls requests from a channel, applies backpressure on the
//!   active response size and runs each request through the pipeline concurrently
//!
//! Communication with the rest of the crawler happens through `kanal` channels.

mod core;
mod request_handler;

pub use self::core::DownloadPipeline;
pub use request_handler::spawn_downloader_task;
