//! Ordered handler lists built from registered middlewares.

use crate::middleware::{ExceptionHandler, Middleware, RequestHandler, ResponseHandler};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

/// A handler together with the name of the middleware that supplied it.
pub(crate) struct Stage<H: ?Sized> {
    pub(crate) name: Arc<str>,
    pub(crate) handler: Arc<H>,
}

/// Request handlers in registration order; response and exception handlers reversed.
#[derive(Default)]
pub(crate) struct StageRegistry {
    pub(crate) request: Vec<Stage<dyn RequestHandler>>,
    pub(crate) response: VecDeque<Stage<dyn ResponseHandler>>,
    pub(crate) exception: VecDeque<Stage<dyn ExceptionHandler>>,
}

impl StageRegistry {
    pub(crate) fn register(&mut self, middleware: &Arc<dyn Middleware>) {
        let name: Arc<str> = Arc::from(middleware.name());
        trace!("Registering downloader middleware '{}'", name);

        if let Some(handler) = Arc::clone(middleware).request_handler() {
            self.request.push(Stage {
                name: Arc::clone(&name),
                handler,
            });
        }
        if let Some(handler) = Arc::clone(middleware).response_handler() {
            self.response.push_front(Stage {
                name: Arc::clone(&name),
                handler,
            });
        }
        if let Some(handler) = Arc::clone(middleware).exception_handler() {
            self.exception.push_front(Stage { name, handler });
        }
    }

    pub(crate) fn request_stage_names(&self) -> Vec<&str> {
        self.request.iter().map(|s| &*s.name).collect()
    }

    pub(crate) fn response_stage_names(&self) -> Vec<&str> {
        self.response.iter().map(|s| &*s.name).collect()
    }

    pub(crate) fn exception_stage_names(&self) -> Vec<&str> {
        self.exception.iter().map(|s| &*s.name).collect()
    }
}
