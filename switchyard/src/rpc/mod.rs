//! Connection lifecycle over pluggable protocols.
//!
//! A [`ProtocolRegistry`] lists [`ProtocolBundle`]s in priority order. The
//! [`ConnectionManager`] walks that order to dial out on behalf of an
//! [`Inventory`] and to serve an [`Implementer`], keeping the bookkeeping
//! that lets any single connection be torn down without disturbing the
//! others.
//!
//! ```no_run
//! use std::sync::Arc;
//! use switchyard::config::RpcConfig;
//! use switchyard::rpc::ConnectionManager;
//!
//! # async fn run(inventory: Arc<dyn switchyard::rpc::Inventory>) -> Result<(), switchyard::rpc::RpcError> {
//! let manager = ConnectionManager::from_config(&RpcConfig::default());
//! let slot = manager.connect(inventory.clone()).await?;
//! println!("connected in slot {slot}");
//! manager.disconnect(inventory.as_ref()).await?;
//! # Ok(())
//! # }
//! ```

mod collaborator;
mod error;
mod manager;
mod protocol;
mod server;
mod transport;

pub use collaborator::{Implementer, Inventory};
pub use error::{ConnectStage, HookError, HookResult, ProtocolFailure, RpcError};
pub use manager::{ConnectionInfo, ConnectionManager, ServerInfo, SlotId};
pub use protocol::{
    ProtocolBundle, ProtocolRegistry, DEFAULT_PRIORITY, IPC, QUIC, SCTP, TCP, TIPC,
};
pub use server::{Server, ServerHandle, Service};
pub use transport::{
    BoxListener, BoxStream, Channel, Dialer, ListenFactory, Listener, Stream, StreamGuard,
    TcpAcceptor, TcpTransport,
};
