//! Error types for the RPC connection manager.

use std::fmt;
use std::io;

use super::SlotId;

/// Error returned by collaborator hooks ([`Inventory`](super::Inventory),
/// [`Implementer`](super::Implementer), [`Service`](super::Service)).
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a collaborator hook.
pub type HookResult = Result<(), HookError>;

/// Step of a connection attempt that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    /// `Inventory::on_connecting` refused the protocol.
    Connecting,
    /// The protocol could not dial.
    Dial,
    /// `Inventory::bind_connection` rejected the channel.
    Bind,
    /// `Inventory::on_connected` failed.
    Connected,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectStage::Connecting => f.write_str("connecting"),
            ConnectStage::Dial => f.write_str("dial"),
            ConnectStage::Bind => f.write_str("bind"),
            ConnectStage::Connected => f.write_str("connected"),
        }
    }
}

/// One protocol's failed attempt inside [`RpcError::ConnectFailed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolFailure {
    /// Protocol that was tried.
    pub protocol: String,
    /// Where the attempt stopped.
    pub stage: ConnectStage,
    /// Human-readable cause.
    pub reason: String,
}

impl fmt::Display for ProtocolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.protocol, self.stage, self.reason)
    }
}

/// Errors from connection lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// No usable strategy is registered for the protocol.
    #[error("don't support protocol {protocol}")]
    UnsupportedProtocol {
        /// Requested protocol.
        protocol: String,
    },

    /// Every registered protocol was tried and none produced a connection.
    #[error("can't establish a new connection ({} protocol(s) tried)", .failures.len())]
    ConnectFailed {
        /// One entry per protocol tried, in priority order.
        failures: Vec<ProtocolFailure>,
    },

    /// The inventory is not (or no longer) connected.
    #[error("disconnect an already disconnected inventory (slot {})", fmt_slot(.slot))]
    AlreadyDisconnected {
        /// Slot the inventory reported, if any.
        slot: Option<SlotId>,
    },

    /// The implementer failed to produce a listener.
    #[error("implementer failed to listen on {protocol}: {reason}")]
    Listen {
        /// Protocol being served.
        protocol: String,
        /// Cause reported by the implementer.
        reason: String,
    },

    /// The implementer failed to bind its services.
    #[error("implementer failed to bind server on {protocol}: {reason}")]
    Bind {
        /// Protocol being served.
        protocol: String,
        /// Cause reported by the implementer.
        reason: String,
    },

    /// No protocol yielded a listener.
    #[error("can't serve this implementer")]
    NoListener,

    /// A server was started without any service bound to it.
    #[error("no service bound to server on {protocol}")]
    NoService {
        /// Protocol being served.
        protocol: String,
    },

    /// The channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// A collaborator hook failed outside a connection attempt.
    #[error("hook failed: {0}")]
    Hook(String),

    /// Transport I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The manager is shutting down.
    #[error("connection manager is shutting down")]
    Shutdown,
}

fn fmt_slot(slot: &Option<SlotId>) -> String {
    match slot {
        Some(slot) => slot.to_string(),
        None => "none".to_string(),
    }
}
