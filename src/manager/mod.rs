//! # Downloader Middleware Manager
//!
//! Runs requests, responses and faults through the registered middlewares.
//!
//! ## Pipeline Run
//!
//! Every call to [`DownloaderMiddlewareManager::download`] drives one request through
//! an explicit state machine:
//!
//! ```text
//! RequestPhase --(all Continue)--> Download --(Ok)--> ResponsePhase --> Done
//!      |  |                            |                   ^
//!      |  +--(Response)----------------|-------------------+
//!      |                               |                   |
//!      +--(Fault)--> ExceptionPhase <--+ (Err)             |
//!                         +--(Response)--------------------+
//! ```
//!
//! A `Request` returned from any phase ends the run immediately with that request.
//! Every response seen along the way is counted by the manager's
//! [`ActiveSizeTracker`] exactly once.
//!
//! The manager is immutable once built; share it behind an `Arc` and run as many
//! pipelines concurrently as needed.

mod registry;
mod validation;

#[cfg(test)]
mod tests;

use crate::downloader::Downloader;
use crate::error::{Fault, Phase, PipelineError};
use crate::middleware::Middleware;
use crate::request::Request;
use crate::response::Response;
use crate::tracker::ActiveSizeTracker;
use futures_util::future::join_all;
use registry::StageRegistry;
use std::sync::Arc;
use tracing::{debug, error, info, trace};
use validation::{validate, Flow};

/// Final result of a successful pipeline run.
#[derive(Debug)]
pub enum PipelineOutput {
    Response(Response),
    /// A request to hand back to the scheduler instead of a response.
    Request(Request),
}

impl PipelineOutput {
    pub fn into_response(self) -> Option<Response> {
        match self {
            PipelineOutput::Response(response) => Some(response),
            PipelineOutput::Request(_) => None,
        }
    }

    pub fn into_request(self) -> Option<Request> {
        match self {
            PipelineOutput::Request(request) => Some(request),
            PipelineOutput::Response(_) => None,
        }
    }
}

enum RunState {
    RequestPhase,
    Download,
    ExceptionPhase(Fault),
    ResponsePhase(Response),
    Done(PipelineOutput),
}

/// Holds the ordered middleware chain and the shared response size tracker.
pub struct DownloaderMiddlewareManager {
    middlewares: Vec<Arc<dyn Middleware>>,
    stages: StageRegistry,
    tracker: ActiveSizeTracker,
}

impl DownloaderMiddlewareManager {
    /// Builds the manager from middlewares listed outermost first.
    pub fn from_middlewares(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        let mut stages = StageRegistry::default();
        for middleware in &middlewares {
            stages.register(middleware);
        }
        debug!(
            "Enabled downloader middlewares: request={:?}, response={:?}, exception={:?}",
            stages.request_stage_names(),
            stages.response_stage_names(),
            stages.exception_stage_names()
        );
        Self {
            middlewares,
            stages,
            tracker: ActiveSizeTracker::new(),
        }
    }

    /// Total body bytes of all responses seen by this manager that are still alive.
    pub fn current_size(&self) -> usize {
        self.tracker.current_size()
    }

    pub fn tracked_responses(&self) -> usize {
        self.tracker.tracked_responses()
    }

    pub fn tracker(&self) -> &ActiveSizeTracker {
        &self.tracker
    }

    pub fn middleware_names(&self) -> Vec<&str> {
        self.middlewares.iter().map(|m| m.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs `request` through the middleware chain and, unless a middleware
    /// short-circuits, through `downloader`.
    pub async fn download<D>(
        &self,
        downloader: &D,
        mut request: Request,
    ) -> Result<PipelineOutput, PipelineError>
    where
        D: Downloader + ?Sized,
    {
        let mut state = RunState::RequestPhase;
        loop {
            state = match state {
                RunState::RequestPhase => self.process_request(&mut request).await?,
                RunState::Download => {
                    trace!("Downloading {}", request);
                    match downloader.download(request.clone()).await {
                        Ok(response) => {
                            self.tracker.track(&response);
                            RunState::ResponsePhase(response)
                        }
                        Err(e) => {
                            debug!("Download of {} failed: {}", request, e);
                            RunState::ExceptionPhase(Fault::Download(e))
                        }
                    }
                }
                RunState::ExceptionPhase(fault) => {
                    self.process_exception(&request, fault).await?
                }
                RunState::ResponsePhase(response) => {
                    self.process_response(&request, response).await?
                }
                RunState::Done(output) => return Ok(output),
            };
        }
    }

    async fn process_request(&self, request: &mut Request) -> Result<RunState, PipelineError> {
        for stage in &self.stages.request {
            let output = match stage.handler.process_request(request).await {
                Ok(output) => output,
                Err(fault) => {
                    debug!("Middleware '{}' raised on {}: {}", stage.name, request, fault);
                    return Ok(RunState::ExceptionPhase(fault));
                }
            };
            match validate(&stage.name, Phase::Request, output)? {
                None => continue,
                Some(Flow::Response(response)) => {
                    trace!("Middleware '{}' answered {} with {}", stage.name, request, response);
                    self.tracker.track(&response);
                    return Ok(RunState::ResponsePhase(response));
                }
                Some(Flow::Request(next)) => {
                    trace!("Middleware '{}' replaced {} with {}", stage.name, request, next);
                    return Ok(RunState::Done(PipelineOutput::Request(next)));
                }
            }
        }
        Ok(RunState::Download)
    }

    async fn process_exception(
        &self,
        request: &Request,
        fault: Fault,
    ) -> Result<RunState, PipelineError> {
        for stage in &self.stages.exception {
            let output = stage.handler.process_exception(request, &fault).await?;
            match validate(&stage.name, Phase::Exception, output)? {
                None => continue,
                Some(Flow::Response(response)) => {
                    debug!("Middleware '{}' recovered {} with {}", stage.name, request, response);
                    self.tracker.track(&response);
                    return Ok(RunState::ResponsePhase(response));
                }
                Some(Flow::Request(next)) => {
                    debug!("Middleware '{}' rescheduled {} as {}", stage.name, request, next);
                    return Ok(RunState::Done(PipelineOutput::Request(next)));
                }
            }
        }
        Err(fault.into())
    }

    async fn process_response(
        &self,
        request: &Request,
        response: Response,
    ) -> Result<RunState, PipelineError> {
        let mut current = response;
        for stage in &self.stages.response {
            let output = stage.handler.process_response(request, current).await?;
            match validate(&stage.name, Phase::Response, output)? {
                Some(Flow::Response(response)) => {
                    self.tracker.track(&response);
                    current = response;
                }
                Some(Flow::Request(next)) => {
                    trace!("Middleware '{}' turned response into {}", stage.name, next);
                    return Ok(RunState::Done(PipelineOutput::Request(next)));
                }
                None => {
                    return Err(PipelineError::invalid_output(
                        &stage.name,
                        Phase::Response,
                        "Continue",
                    ))
                }
            }
        }
        Ok(RunState::Done(PipelineOutput::Response(current)))
    }

    /// Calls every middleware's `open` hook concurrently.
    pub async fn open(&self) -> Result<(), PipelineError> {
        info!("Opening {} downloader middlewares", self.middlewares.len());
        let results = join_all(self.middlewares.iter().map(|m| m.open())).await;
        self.first_failure("open", results)
    }

    /// Calls every middleware's `close` hook concurrently.
    ///
    /// A failing hook does not prevent the others from running.
    pub async fn close(&self) -> Result<(), PipelineError> {
        info!("Closing {} downloader middlewares", self.middlewares.len());
        let results = join_all(self.middlewares.iter().map(|m| m.close())).await;
        self.first_failure("close", results)
    }

    fn first_failure(
        &self,
        hook: &str,
        results: Vec<Result<(), Fault>>,
    ) -> Result<(), PipelineError> {
        let mut first = None;
        for (middleware, result) in self.middlewares.iter().zip(results) {
            if let Err(fault) = result {
                error!("Downloader middleware '{}' failed to {}: {}", middleware.name(), hook, fault);
                first.get_or_insert(fault);
            }
        }
        match first {
            Some(fault) => Err(fault.into()),
            None => Ok(()),
        }
    }
}
