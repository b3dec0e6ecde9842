//! Server built around one listener, and the handle that stops it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BoxListener, Channel, HookResult, RpcError};

/// Handles inbound channels accepted by a [`Server`].
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Serve one connection until it ends.
    ///
    /// The channel is closed when this returns or when the server stops.
    async fn serve_connection(&self, channel: Channel) -> HookResult;
}

/// Accept loop for a single protocol.
///
/// Handed to [`Implementer::bind_server`](super::Implementer::bind_server) so
/// the implementer can register its service before accepting starts.
pub struct Server {
    protocol: String,
    service: Option<Arc<dyn Service>>,
    shutdown: CancellationToken,
}

impl Server {
    pub(crate) fn new(protocol: &str, shutdown: CancellationToken) -> Self {
        Self {
            protocol: protocol.to_string(),
            service: None,
            shutdown,
        }
    }

    /// Protocol this server accepts.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Set the service answering every accepted channel, replacing any
    /// previous one.
    pub fn register(&mut self, service: impl Service) -> &mut Self {
        if self.service.is_some() {
            debug!(protocol = %self.protocol, "replacing bound service");
        }
        self.service = Some(Arc::new(service));
        self
    }

    /// Handle that stops this server.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Accept on `listener` until stopped.
    ///
    /// Returns `Ok(())` when stopped through a [`ServerHandle`] or manager
    /// shutdown. Accept failures end the loop with an error. In-flight
    /// connections are cancelled and awaited before returning.
    pub(crate) async fn run(self, listener: BoxListener) -> Result<(), RpcError> {
        let service = self.service.ok_or_else(|| RpcError::NoService {
            protocol: self.protocol.clone(),
        })?;
        let mut tasks = JoinSet::new();

        let result = loop {
            let channel = tokio::select! {
                _ = self.shutdown.cancelled() => break Ok(()),
                Some(_) = tasks.join_next(), if !tasks.is_empty() => continue,
                accepted = listener.accept() => match accepted {
                    Ok(channel) => channel,
                    Err(e) => {
                        warn!(protocol = %self.protocol, error = %e, "accept failed");
                        break Err(RpcError::Io(e));
                    }
                },
            };

            debug!(protocol = %self.protocol, peer = %channel.peer(), "accepted");
            let service = Arc::clone(&service);
            let shutdown = self.shutdown.clone();
            tasks.spawn(async move {
                let outcome = tokio::select! {
                    _ = shutdown.cancelled() => Ok(()),
                    _ = channel.closed() => Ok(()),
                    outcome = service.serve_connection(channel.clone()) => outcome,
                };
                if let Err(e) = outcome {
                    debug!(peer = %channel.peer(), error = %e, "connection ended with error");
                }
                channel.close().await;
            });
        };

        self.shutdown.cancel();
        while tasks.join_next().await.is_some() {}
        info!(protocol = %self.protocol, "server stopped");
        result
    }
}

/// Stops a running [`Server`].
///
/// Clones share the same server. Stopping is idempotent.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown: CancellationToken,
}

impl ServerHandle {
    /// Stop accepting and cancel in-flight connections.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Whether [`stop`](Self::stop) was called or the server has exited.
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
