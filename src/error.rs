//! # Error Module
//!
//! Error taxonomy for the downloader middleware pipeline.
//!
//! - [`DownloadError`]: what the transport reports when a download fails.
//! - [`Fault`]: any failure that exception-phase middlewares may recover from,
//!   including the distinguished "ignore this request" signal.
//! - [`PipelineError`]: what a caller of a pipeline run finally receives.

use std::fmt;
use thiserror::Error;

/// Failure reported by a [`Downloader`](crate::Downloader).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    #[error("download timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("DNS lookup failed for host '{0}'")]
    Dns(String),
    #[error("{0}")]
    Other(String),
}

/// A failure flowing through the exception phase.
///
/// Raised either by the transport or by a middleware. Exception handlers receive it
/// by reference and may convert it into a `Response` or a `Request`; otherwise it is
/// returned verbatim to the caller of the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    /// Raised by a request handler that wants the request dropped.
    #[error("request ignored: {0}")]
    IgnoreRequest(String),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("middleware '{stage}' failed: {message}")]
    Middleware { stage: String, message: String },
}

impl Fault {
    /// Shorthand for building a [`Fault::Middleware`].
    pub fn middleware(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Fault::Middleware {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn is_ignore(&self) -> bool {
        matches!(self, Fault::IgnoreRequest(_))
    }
}

/// The three phases of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Request,
    Response,
    Exception,
}

impl Phase {
    /// Whether a handler of this phase may return nothing.
    pub fn allows_continue(self) -> bool {
        !matches!(self, Phase::Response)
    }

    pub(crate) fn expected(self) -> &'static str {
        if self.allows_continue() {
            "Continue, Response or Request"
        } else {
            "Response or Request"
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Request => "process_request",
            Phase::Response => "process_response",
            Phase::Exception => "process_exception",
        };
        f.write_str(name)
    }
}

/// Error returned to the caller of a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A middleware returned a value its phase does not accept.
    #[error("middleware '{stage}' must return {expected} from {phase}, got {received}")]
    InvalidStageOutput {
        stage: String,
        phase: Phase,
        expected: &'static str,
        received: String,
    },
    /// A fault nobody recovered from.
    #[error(transparent)]
    Fault(#[from] Fault),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("failed to serialize statistics: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub(crate) fn invalid_output(stage: &str, phase: Phase, received: impl Into<String>) -> Self {
        PipelineError::InvalidStageOutput {
            stage: stage.to_string(),
            phase,
            expected: phase.expected(),
            received: received.into(),
        }
    }

    /// Returns the unrecovered fault, if this error carries one.
    pub fn as_fault(&self) -> Option<&Fault> {
        match self {
            PipelineError::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}
