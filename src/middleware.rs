//! # Middleware Module
//!
//! Defines the contract between the pipeline and pluggable downloader middlewares.
//!
//! A middleware advertises up to three capabilities, each its own trait:
//!
//! - [`RequestHandler`]: sees every outgoing request, in registration order.
//! - [`ResponseHandler`]: sees every response, in reverse registration order.
//! - [`ExceptionHandler`]: sees every fault, in reverse registration order.
//!
//! Capabilities are read once, when the middleware is registered with a
//! [`DownloaderMiddlewareManager`](crate::DownloaderMiddlewareManager).
//!
//! ## Example
//!
//! ```rust,ignore
//! use spider_downloader_middleware::prelude::*;
//! use std::sync::Arc;
//!
//! struct UserAgent(&'static str);
//!
//! impl Middleware for UserAgent {
//!     fn name(&self) -> &str {
//!         "UserAgent"
//!     }
//!
//!     fn request_handler(self: Arc<Self>) -> Option<Arc<dyn RequestHandler>> {
//!         Some(self)
//!     }
//! }
//!
//! #[async_trait]
//! impl RequestHandler for UserAgent {
//!     async fn process_request(&self, request: &mut Request) -> Result<StageOutput, Fault> {
//!         request.headers.insert(http::header::USER_AGENT, self.0.parse().unwrap());
//!         Ok(StageOutput::Continue)
//!     }
//! }
//! ```

use crate::error::Fault;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Value returned by any middleware handler.
///
/// Only `Continue`, `Response` and `Request` are meaningful. `Foreign` carries any
/// other value a handler produced and is always rejected by validation.
pub enum StageOutput {
    /// Nothing to report; hand the current value to the next middleware.
    Continue,
    Response(Response),
    Request(Request),
    Foreign(ForeignValue),
}

impl StageOutput {
    /// Wraps an arbitrary value, remembering its type name for diagnostics.
    pub fn foreign<T: Any + Send>(value: T) -> Self {
        StageOutput::Foreign(ForeignValue {
            type_name: std::any::type_name::<T>(),
            value: Box::new(value),
        })
    }

    /// Type name used in validation errors.
    pub fn kind(&self) -> &'static str {
        match self {
            StageOutput::Continue => "Continue",
            StageOutput::Response(_) => "Response",
            StageOutput::Request(_) => "Request",
            StageOutput::Foreign(value) => value.type_name,
        }
    }
}

impl From<Response> for StageOutput {
    fn from(response: Response) -> Self {
        StageOutput::Response(response)
    }
}

impl From<Request> for StageOutput {
    fn from(request: Request) -> Self {
        StageOutput::Request(request)
    }
}

impl fmt::Debug for StageOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageOutput::Continue => f.write_str("Continue"),
            StageOutput::Response(response) => f.debug_tuple("Response").field(response).finish(),
            StageOutput::Request(request) => f.debug_tuple("Request").field(request).finish(),
            StageOutput::Foreign(value) => f.debug_tuple("Foreign").field(value).finish(),
        }
    }
}

/// A value of some type the pipeline does not understand.
pub struct ForeignValue {
    type_name: &'static str,
    value: Box<dyn Any + Send>,
}

impl ForeignValue {
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn into_inner(self) -> Box<dyn Any + Send> {
        self.value
    }
}

impl fmt::Debug for ForeignValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.type_name)
    }
}

/// Request-phase capability.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Inspects or mutates an outgoing request.
    ///
    /// Returning a `Response` skips the download, returning a `Request` ends the run
    /// with that request, and raising [`Fault::IgnoreRequest`] drops it.
    async fn process_request(&self, request: &mut Request) -> Result<StageOutput, Fault>;
}

/// Response-phase capability. Must always produce a `Response` or a `Request`.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn process_response(
        &self,
        request: &Request,
        response: Response,
    ) -> Result<StageOutput, Fault>;
}

/// Exception-phase capability.
#[async_trait]
pub trait ExceptionHandler: Send + Sync {
    async fn process_exception(
        &self,
        request: &Request,
        fault: &Fault,
    ) -> Result<StageOutput, Fault>;
}

/// A pluggable downloader middleware.
///
/// Each capability accessor defaults to `None`; a middleware opts in by returning
/// itself as the corresponding handler.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Name used in logs and validation errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn request_handler(self: Arc<Self>) -> Option<Arc<dyn RequestHandler>> {
        None
    }

    fn response_handler(self: Arc<Self>) -> Option<Arc<dyn ResponseHandler>> {
        None
    }

    fn exception_handler(self: Arc<Self>) -> Option<Arc<dyn ExceptionHandler>> {
        None
    }

    /// Called once before the first pipeline run.
    async fn open(&self) -> Result<(), Fault> {
        Ok(())
    }

    /// Called once after the last pipeline run.
    async fn close(&self) -> Result<(), Fault> {
        Ok(())
    }
}
