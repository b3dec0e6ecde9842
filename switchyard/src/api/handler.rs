//! Request handlers and the values flowing through them.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::HeaderMap;

use super::Method;
use crate::envelope;

/// Everything a handler or an access policy may inspect about a request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request method.
    pub method: Method,
    /// Request path, without the query string.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Address of the remote peer, when known.
    pub remote_addr: Option<SocketAddr>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Fully buffered request body.
    pub body: Bytes,
}

impl RequestContext {
    /// Create a context with no peer, headers or body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            remote_addr: None,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Set the remote peer address.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Set the request body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Body as UTF-8 text, lossily decoded.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// An enveloped reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Envelope code; also used as the HTTP status.
    pub code: u16,
    /// Encoded envelope body.
    pub body: String,
}

impl Reply {
    /// A `200` reply carrying `payload`.
    pub fn ok(payload: impl AsRef<str>) -> Self {
        Self::nok(200, payload)
    }

    /// A reply carrying `payload` under an arbitrary code.
    pub fn nok(code: u16, payload: impl AsRef<str>) -> Self {
        Self {
            code,
            body: envelope::encode(code, payload.as_ref()),
        }
    }

    /// The uniform not-found reply.
    ///
    /// Unknown paths, unknown methods, disabled endpoints and denied access
    /// all produce exactly this value.
    pub fn not_found() -> Self {
        Self {
            code: envelope::NOT_FOUND_CODE,
            body: envelope::not_found(),
        }
    }

    /// Whether this is the uniform not-found reply.
    pub fn is_not_found(&self) -> bool {
        *self == Self::not_found()
    }
}

/// Something that can answer a request.
///
/// Implemented for any `Fn(RequestContext) -> impl Future<Output = Reply>`,
/// so plain async closures can be bound directly.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Produce the reply for `request`.
    async fn call(&self, request: RequestContext) -> Reply;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    async fn call(&self, request: RequestContext) -> Reply {
        (self)(request).await
    }
}

/// Shared, type-erased handler.
pub type SharedHandler = Arc<dyn Handler>;
