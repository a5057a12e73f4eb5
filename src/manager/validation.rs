//! Return-type policing for middleware handlers.

use crate::error::{Phase, PipelineError};
use crate::middleware::StageOutput;
use crate::request::Request;
use crate::response::Response;

/// A validated, actionable handler result.
#[derive(Debug)]
pub(crate) enum Flow {
    Response(Response),
    Request(Request),
}

/// Checks `output` against what `phase` accepts.
///
/// `Ok(None)` means "continue with the next middleware" and is only produced for
/// phases that allow it.
pub(crate) fn validate(
    stage: &str,
    phase: Phase,
    output: StageOutput,
) -> Result<Option<Flow>, PipelineError> {
    match output {
        StageOutput::Response(response) => Ok(Some(Flow::Response(response))),
        StageOutput::Request(request) => Ok(Some(Flow::Request(request))),
        StageOutput::Continue if phase.allows_continue() => Ok(None),
        other => Err(PipelineError::invalid_output(stage, phase, other.kind())),
    }
}
