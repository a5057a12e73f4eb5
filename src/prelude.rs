//! A "prelude" for users of the `spider-downloader-middleware` crate.
//!
//! Re-exports the traits and types needed to write middlewares and drive a pipeline.
//!
//! # Example
//!
//! ```
//! use spider_downloader_middleware::prelude::*;
//! ```

pub use crate::{
    // Core structs
    DownloadPipeline,
    DownloaderMiddlewareManager,
    PipelineBuilder,
    PipelineOutput,
    Request,
    Response,
    // Core traits
    Downloader,
    ExceptionHandler,
    Middleware,
    RequestHandler,
    ResponseHandler,
    StageOutput,
    // Errors
    DownloadError,
    Fault,
    PipelineError,
    // Essential re-exports for trait implementation
    async_trait,
};
