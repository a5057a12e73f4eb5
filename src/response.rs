//! Inbound response value object.
//!
//! A [`Response`] is a reference-counted handle: clones share one allocation and one
//! identity. The pipeline never owns responses; it only registers size releases on
//! them (see [`ActiveSizeTracker`](crate::ActiveSizeTracker)), which run when the last
//! handle is dropped.

use crate::request::Request;
use crate::tracker::SizeRelease;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use url::Url;

static NEXT_RESPONSE_ID: AtomicU64 = AtomicU64::new(1);

struct ResponseInner {
    id: u64,
    url: Url,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    flags: Vec<String>,
    request: Option<Request>,
    releases: Mutex<Vec<SizeRelease>>,
}

/// An HTTP response travelling back through the pipeline.
#[derive(Clone)]
pub struct Response {
    inner: Arc<ResponseInner>,
}

impl Response {
    /// Creates a `200 OK` response with the given body.
    pub fn new(url: Url, body: impl Into<Bytes>) -> Self {
        Self::builder(url).body(body).build()
    }

    pub fn builder(url: Url) -> ResponseBuilder {
        ResponseBuilder {
            url,
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            flags: Vec::new(),
            request: None,
        }
    }

    /// Process-unique identity shared by every clone of this handle.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn status(&self) -> StatusCode {
        self.inner.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.inner.body
    }

    pub fn body_len(&self) -> usize {
        self.inner.body.len()
    }

    pub fn flags(&self) -> &[String] {
        &self.inner.flags
    }

    /// The request this response answers, when one was attached.
    pub fn request(&self) -> Option<&Request> {
        self.inner.request.as_ref()
    }

    /// Meta of the originating request.
    pub fn meta(&self) -> Option<&HashMap<String, Value>> {
        self.inner.request.as_ref().map(|r| &r.meta)
    }

    /// Whether `other` is a handle to the very same response.
    pub fn same_as(&self, other: &Response) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Starts a new response carrying this one's attributes.
    ///
    /// The result is a distinct response with its own identity, so it is tracked
    /// separately from `self`.
    pub fn replace(&self) -> ResponseBuilder {
        ResponseBuilder {
            url: self.inner.url.clone(),
            status: self.inner.status,
            headers: self.inner.headers.clone(),
            body: self.inner.body.clone(),
            flags: self.inner.flags.clone(),
            request: self.inner.request.clone(),
        }
    }

    /// A distinct response with identical attributes.
    pub fn copy(&self) -> Response {
        self.replace().build()
    }

    pub(crate) fn releases(&self) -> &Mutex<Vec<SizeRelease>> {
        &self.inner.releases
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}>", self.inner.status.as_u16(), self.inner.url)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url.as_str())
            .field("status", &self.inner.status)
            .field("body_len", &self.inner.body.len())
            .field("flags", &self.inner.flags)
            .finish()
    }
}

/// Builder returned by [`Response::builder`] and [`Response::replace`].
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    url: Url,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    flags: Vec<String>,
    request: Option<Request>,
}

impl ResponseBuilder {
    pub fn url(mut self, url: Url) -> Self {
        self.url = url;
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.push(flag.into());
        self
    }

    pub fn request(mut self, request: Request) -> Self {
        self.request = Some(request);
        self
    }

    pub fn build(self) -> Response {
        Response {
            inner: Arc::new(ResponseInner {
                id: NEXT_RESPONSE_ID.fetch_add(1, Ordering::Relaxed),
                url: self.url,
                status: self.status,
                headers: self.headers,
                body: self.body,
                flags: self.flags,
                request: self.request,
                releases: Mutex::new(Vec::new()),
            }),
        }
    }
}
