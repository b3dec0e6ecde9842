//! HTTP/1.1 front-end feeding requests into a [`Router`].

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Method, Reply, RequestContext, Router};
use crate::config::ApiConfig;

/// Serves a frozen [`Router`] over HTTP.
///
/// Every response carries the envelope as its body and the envelope code as
/// its status.
#[derive(Debug, Clone)]
pub struct ApiServer {
    router: Arc<Router>,
    header_read_timeout: Duration,
    max_body_bytes: usize,
}

/// Pause after a failed accept, so a persistent error (such as running out
/// of file descriptors) does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

impl ApiServer {
    /// Serve `router` with default settings.
    pub fn new(router: Arc<Router>) -> Self {
        Self::with_config(router, &ApiConfig::default())
    }

    /// Serve `router` with the given settings.
    pub fn with_config(router: Arc<Router>, config: &ApiConfig) -> Self {
        Self {
            router,
            header_read_timeout: config.header_read_timeout(),
            max_body_bytes: config.max_body_bytes,
        }
    }

    /// The router being served.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Bind `address` and serve until `shutdown` is cancelled.
    pub async fn run(&self, address: &str, shutdown: CancellationToken) -> io::Result<()> {
        let listener = TcpListener::bind(address).await?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on `listener` until `shutdown` is cancelled.
    ///
    /// Open connections are asked to finish their in-flight request and
    /// close once shutdown begins.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> io::Result<()> {
        let local = listener.local_addr()?;
        info!(address = %local, routes = ?self.router.routes(), "api server listening");

        loop {
            let (stream, remote) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => continue,
                        }
                    }
                },
            };

            let router = Arc::clone(&self.router);
            let shutdown = shutdown.clone();
            let header_read_timeout = self.header_read_timeout;
            let max_body_bytes = self.max_body_bytes;
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let router = Arc::clone(&router);
                    async move {
                        Ok::<_, Infallible>(respond(&router, remote, max_body_bytes, req).await)
                    }
                });

                let conn = http1::Builder::new()
                    .timer(TokioTimer::new())
                    .header_read_timeout(header_read_timeout)
                    .serve_connection(TokioIo::new(stream), service);
                tokio::pin!(conn);

                let result = tokio::select! {
                    result = conn.as_mut() => result,
                    _ = shutdown.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        conn.as_mut().await
                    }
                };
                if let Err(e) = result {
                    debug!(%remote, error = %e, "connection ended with error");
                }
            });
        }

        info!(address = %local, "api server stopped");
        Ok(())
    }
}

async fn respond(
    router: &Router,
    remote: SocketAddr,
    max_body_bytes: usize,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    debug!(method = %req.method(), uri = %req.uri(), %remote, "request");

    let Ok(method) = Method::try_from(req.method()) else {
        return into_response(Reply::not_found());
    };

    let (parts, body) = req.into_parts();
    let body = match Limited::new(body, max_body_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            debug!(%remote, limit = max_body_bytes, "request body too large");
            return into_response(Reply::nok(413, "payload too large"));
        }
        Err(e) => {
            debug!(%remote, error = %e, "failed to read request body");
            return into_response(Reply::nok(400, "bad request"));
        }
    };

    let context = RequestContext {
        method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        remote_addr: Some(remote),
        headers: parts.headers,
        body,
    };

    into_response(router.dispatch(context).await)
}

fn into_response(reply: Reply) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(reply.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::new(Full::new(Bytes::from(reply.body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
