//! Connection lifecycle across protocol bundles.
//!
//! # Bookkeeping
//!
//! Every established connection gets a [`SlotId`] from a monotonically
//! increasing counter. Records live in a slot-ordered map, and each protocol
//! keeps the set of slots it carries. Removing a connection therefore never
//! moves any other one: a slot handed to an inventory stays valid until that
//! inventory is disconnected.
//!
//! ```text
//!   connect(A) ─► slot 0     connections: {0:A, 1:B, 2:C}
//!   connect(B) ─► slot 1     tcp:         {0, 1, 2}
//!   connect(C) ─► slot 2
//!   disconnect(B)            connections: {0:A, 2:C}   (A, C untouched)
//! ```
//!
//! The tables sit behind one mutex that is never held across an `.await`
//! or while a collaborator hook runs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    BoxListener, Channel, ConnectStage, Implementer, Inventory, ProtocolFailure, ProtocolRegistry,
    RpcError, Server, ServerHandle,
};
use crate::config::RpcConfig;

/// Stable identifier of an established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(u64);

impl SlotId {
    /// Wrap a raw slot number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw slot number.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of one established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Slot of the connection.
    pub slot: SlotId,
    /// Protocol it runs over.
    pub protocol: String,
    /// Remote address.
    pub peer: String,
    /// Version reported by the inventory.
    pub version: String,
}

/// Snapshot of one running server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Registration id, unique per manager.
    pub id: u64,
    /// Protocol being served.
    pub protocol: String,
    /// Version reported by the implementer.
    pub version: String,
    /// Bound address, when the listener knows it.
    pub local_addr: Option<String>,
}

struct ConnectionRecord {
    protocol: String,
    channel: Channel,
    inventory: Arc<dyn Inventory>,
}

struct ServerRecord {
    protocol: String,
    implementer: Arc<dyn Implementer>,
    handle: ServerHandle,
    local_addr: Option<String>,
}

#[derive(Default)]
struct Tables {
    connections: BTreeMap<SlotId, ConnectionRecord>,
    active: HashMap<String, BTreeSet<SlotId>>,
    servers: BTreeMap<u64, ServerRecord>,
}

impl Tables {
    fn insert_connection(&mut self, slot: SlotId, record: ConnectionRecord) {
        self.active
            .entry(record.protocol.clone())
            .or_default()
            .insert(slot);
        self.connections.insert(slot, record);
    }

    fn remove_connection(&mut self, slot: SlotId) -> Option<ConnectionRecord> {
        let record = self.connections.remove(&slot)?;
        if let Some(slots) = self.active.get_mut(&record.protocol) {
            slots.remove(&slot);
        }
        Some(record)
    }
}

/// Dials, accepts and tears down connections over a [`ProtocolRegistry`].
///
/// Share it behind an [`Arc`]; every operation takes `&self`.
pub struct ConnectionManager {
    registry: ProtocolRegistry,
    tables: Mutex<Tables>,
    next_slot: AtomicU64,
    next_server: AtomicU64,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// Manage connections over `registry`, trying protocols in its order.
    pub fn new(registry: ProtocolRegistry) -> Self {
        Self {
            registry,
            tables: Mutex::new(Tables::default()),
            next_slot: AtomicU64::new(0),
            next_server: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Manager over the default protocols.
    pub fn from_config(config: &RpcConfig) -> Self {
        Self::new(ProtocolRegistry::with_defaults(config))
    }

    /// Protocols in priority order.
    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    /// Establish a connection for `inventory` over the first protocol that
    /// works.
    ///
    /// For each protocol in priority order: `on_connecting`, dial,
    /// `bind_connection`, `on_connected`. Any failure moves on to the next
    /// protocol; the first success is registered and its slot returned.
    ///
    /// The slot is registered before `on_connected` sees it, and dropped
    /// again if that hook fails. If the manager shuts down after
    /// `bind_connection`, the channel is closed and the inventory gets
    /// `on_disconnecting`.
    ///
    /// # Errors
    ///
    /// [`RpcError::ConnectFailed`] with one entry per protocol tried, or
    /// [`RpcError::Shutdown`] once [`shutdown`](Self::shutdown) was called.
    pub async fn connect(&self, inventory: Arc<dyn Inventory>) -> Result<SlotId, RpcError> {
        if self.shutdown.is_cancelled() {
            return Err(RpcError::Shutdown);
        }

        let mut failures = Vec::new();
        for bundle in self.registry.iter() {
            let protocol = bundle.name();
            let fail = |stage: ConnectStage, reason: String| {
                warn!(%protocol, %stage, %reason, "connection attempt failed");
                ProtocolFailure {
                    protocol: protocol.to_string(),
                    stage,
                    reason,
                }
            };

            if let Err(e) = inventory.on_connecting(protocol) {
                failures.push(fail(ConnectStage::Connecting, e.to_string()));
                continue;
            }

            let dialer = match bundle.dialer() {
                Ok(dialer) => dialer,
                Err(e) => {
                    failures.push(fail(ConnectStage::Dial, e.to_string()));
                    continue;
                }
            };

            let target = inventory.address(protocol);
            debug!(%protocol, target = ?target, "dialing");
            let dialed = tokio::select! {
                _ = self.shutdown.cancelled() => return Err(RpcError::Shutdown),
                dialed = dialer.dial(target.as_deref()) => dialed,
            };
            let channel = match dialed {
                Ok(channel) => channel,
                Err(e) => {
                    failures.push(fail(ConnectStage::Dial, e.to_string()));
                    continue;
                }
            };

            if let Err(e) = inventory.bind_connection(channel.clone()) {
                channel.close().await;
                failures.push(fail(ConnectStage::Bind, e.to_string()));
                continue;
            }

            // Register before the inventory learns its slot, so the slot it
            // is handed can already be disconnected.
            let slot = SlotId(self.next_slot.fetch_add(1, Ordering::Relaxed));
            let registered = {
                let mut tables = self.tables.lock();
                if self.shutdown.is_cancelled() {
                    false
                } else {
                    tables.insert_connection(
                        slot,
                        ConnectionRecord {
                            protocol: protocol.to_string(),
                            channel: channel.clone(),
                            inventory: Arc::clone(&inventory),
                        },
                    );
                    true
                }
            };
            if !registered {
                channel.close().await;
                inventory.on_disconnecting();
                return Err(RpcError::Shutdown);
            }

            if let Err(e) = inventory.on_connected(slot) {
                self.tables.lock().remove_connection(slot);
                channel.close().await;
                failures.push(fail(ConnectStage::Connected, e.to_string()));
                continue;
            }

            info!(
                %protocol,
                %slot,
                peer = %channel.peer(),
                version = %inventory.version(),
                "connection established"
            );
            return Ok(slot);
        }

        Err(RpcError::ConnectFailed { failures })
    }

    /// Close the connection `inventory` reports through
    /// [`socket`](Inventory::socket).
    ///
    /// The record is only removed if it belongs to this very inventory.
    ///
    /// # Errors
    ///
    /// [`RpcError::AlreadyDisconnected`] if the inventory has no slot or its
    /// slot is not (or no longer) registered to it.
    pub async fn disconnect(&self, inventory: &dyn Inventory) -> Result<(), RpcError> {
        let slot = inventory.socket();
        let record = slot.and_then(|slot| {
            let mut tables = self.tables.lock();
            let owned = tables
                .connections
                .get(&slot)
                .is_some_and(|record| same_inventory(&record.inventory, inventory));
            if owned {
                tables.remove_connection(slot)
            } else {
                None
            }
        });
        let (Some(slot), Some(record)) = (slot, record) else {
            return Err(RpcError::AlreadyDisconnected { slot });
        };

        inventory.on_disconnecting();
        record.channel.close().await;
        info!(protocol = %record.protocol, %slot, "connection closed");
        Ok(())
    }

    /// Drop the connection in `slot` after its transport failed, then notify
    /// its inventory through [`on_broken`](Inventory::on_broken).
    pub async fn report_broken(&self, slot: SlotId) -> Result<(), RpcError> {
        let record = self
            .tables
            .lock()
            .remove_connection(slot)
            .ok_or(RpcError::AlreadyDisconnected { slot: Some(slot) })?;

        record.channel.close().await;
        warn!(protocol = %record.protocol, %slot, "connection broken");
        record
            .inventory
            .on_broken(slot)
            .map_err(|e| RpcError::Hook(e.to_string()))
    }

    /// Disconnect every connection, notifying each inventory.
    pub async fn disconnect_all(&self) {
        let records: Vec<(SlotId, ConnectionRecord)> = {
            let mut tables = self.tables.lock();
            tables.active.clear();
            std::mem::take(&mut tables.connections).into_iter().collect()
        };
        for (slot, record) in records {
            record.inventory.on_disconnecting();
            record.channel.close().await;
            debug!(protocol = %record.protocol, %slot, "connection closed");
        }
    }

    /// Serve `implementer` on the first protocol that yields a listener.
    ///
    /// Blocks until the server stops. Only one protocol is served per call;
    /// run one call per protocol on separate tasks to serve several.
    ///
    /// # Errors
    ///
    /// Listener, bind and accept failures end the call. If no protocol
    /// yields a listener, [`RpcError::NoListener`].
    pub async fn serve(&self, implementer: Arc<dyn Implementer>) -> Result<(), RpcError> {
        for bundle in self.registry.iter() {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            let protocol = bundle.name();

            let offered = implementer
                .listen(protocol)
                .await
                .map_err(|e| RpcError::Listen {
                    protocol: protocol.to_string(),
                    reason: e.to_string(),
                })?;
            let listener = match offered {
                Some(listener) => listener,
                None => match bundle.listen_factory() {
                    Ok(factory) => factory.listen().await?,
                    Err(_) => {
                        debug!(%protocol, "no listener offered, trying next protocol");
                        continue;
                    }
                },
            };

            let mut server = Server::new(protocol, self.shutdown.child_token());
            implementer
                .bind_server(&mut server)
                .map_err(|e| RpcError::Bind {
                    protocol: protocol.to_string(),
                    reason: e.to_string(),
                })?;

            let local_addr = listener.local_addr().ok();
            let registration = self.register_server(ServerRecord {
                protocol: protocol.to_string(),
                implementer: Arc::clone(&implementer),
                handle: server.handle(),
                local_addr: local_addr.clone(),
            });
            info!(
                %protocol,
                address = ?local_addr,
                version = %implementer.version(),
                id = registration.id,
                "serving"
            );

            return server.run(listener).await;
        }

        Err(RpcError::NoListener)
    }

    /// Bind a listener with the listen factory of `protocol`.
    pub async fn make_listener(&self, protocol: &str) -> Result<BoxListener, RpcError> {
        let bundle = self
            .registry
            .get(protocol)
            .ok_or_else(|| RpcError::UnsupportedProtocol {
                protocol: protocol.to_string(),
            })?;
        Ok(bundle.listen_factory()?.listen().await?)
    }

    /// Stop every server and fail pending and future `connect` calls.
    ///
    /// Established connections stay open; see
    /// [`disconnect_all`](Self::disconnect_all).
    pub fn shutdown(&self) {
        info!("connection manager shutting down");
        self.shutdown.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Established connections, ordered by slot.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.tables
            .lock()
            .connections
            .iter()
            .map(|(slot, record)| ConnectionInfo {
                slot: *slot,
                protocol: record.protocol.clone(),
                peer: record.channel.peer().to_string(),
                version: record.inventory.version(),
            })
            .collect()
    }

    /// Slots carried by `protocol`, ordered.
    pub fn active_slots(&self, protocol: &str) -> Vec<SlotId> {
        self.tables
            .lock()
            .active
            .get(protocol)
            .map(|slots| slots.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Channel registered under `slot`.
    pub fn channel(&self, slot: SlotId) -> Option<Channel> {
        self.tables
            .lock()
            .connections
            .get(&slot)
            .map(|record| record.channel.clone())
    }

    /// Running servers, ordered by registration.
    pub fn servers(&self) -> Vec<ServerInfo> {
        self.tables
            .lock()
            .servers
            .iter()
            .map(|(id, record)| ServerInfo {
                id: *id,
                protocol: record.protocol.clone(),
                version: record.implementer.version(),
                local_addr: record.local_addr.clone(),
            })
            .collect()
    }

    /// Stop the server registered under `id`. Returns `false` if none.
    pub fn stop_server(&self, id: u64) -> bool {
        match self.tables.lock().servers.get(&id) {
            Some(record) => {
                record.handle.stop();
                true
            }
            None => false,
        }
    }

    fn register_server(&self, record: ServerRecord) -> ServerRegistration<'_> {
        let id = self.next_server.fetch_add(1, Ordering::Relaxed);
        self.tables.lock().servers.insert(id, record);
        ServerRegistration { manager: self, id }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.lock();
        f.debug_struct("ConnectionManager")
            .field("protocols", &self.registry.names())
            .field("connections", &tables.connections.len())
            .field("servers", &tables.servers.len())
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

/// Removes a server record when `serve` returns or is dropped.
struct ServerRegistration<'a> {
    manager: &'a ConnectionManager,
    id: u64,
}

impl Drop for ServerRegistration<'_> {
    fn drop(&mut self) {
        self.manager.tables.lock().servers.remove(&self.id);
    }
}

fn same_inventory(stored: &Arc<dyn Inventory>, candidate: &dyn Inventory) -> bool {
    std::ptr::eq(
        Arc::as_ptr(stored).cast::<()>(),
        std::ptr::from_ref(candidate).cast::<()>(),
    )
}
