//! Capabilities the connection manager expects from its callers.

use async_trait::async_trait;

use super::{BoxListener, Channel, HookError, HookResult, Server, SlotId};

/// Client-side collaborator: one outbound connection.
///
/// Hooks are synchronous and are never called while the manager holds its
/// internal lock, so they may call back into the manager.
pub trait Inventory: Send + Sync {
    /// API version this client speaks.
    fn version(&self) -> String;

    /// Slot last handed to [`on_connected`](Self::on_connected), or `None`
    /// if not connected.
    fn socket(&self) -> Option<SlotId>;

    /// Dial target for `protocol`. `None` uses the protocol's configured
    /// default.
    fn address(&self, _protocol: &str) -> Option<String> {
        None
    }

    /// Take the freshly dialed channel.
    fn bind_connection(&self, channel: Channel) -> HookResult;

    /// About to try `protocol`. An error skips it.
    fn on_connecting(&self, protocol: &str) -> HookResult;

    /// The connection is established and registered under `slot`.
    fn on_connected(&self, slot: SlotId) -> HookResult;

    /// The connection in `slot` broke and has been dropped.
    fn on_broken(&self, slot: SlotId) -> HookResult;

    /// The connection is about to be closed on request.
    fn on_disconnecting(&self);
}

/// Server-side collaborator: binds services to an accepted listener.
#[async_trait]
pub trait Implementer: Send + Sync {
    /// API version this server speaks.
    fn version(&self) -> String;

    /// Offer a listener for `protocol`.
    ///
    /// `Ok(None)` defers to the protocol's own listen factory (or skips the
    /// protocol if it has none). An error aborts serving.
    async fn listen(&self, protocol: &str) -> Result<Option<BoxListener>, HookError>;

    /// Register services on `server` before it starts accepting.
    fn bind_server(&self, server: &mut Server) -> HookResult;
}
