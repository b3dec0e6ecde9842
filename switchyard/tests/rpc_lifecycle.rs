//! Integration tests for the connection manager.
//!
//! These tests drive real loopback TCP through the manager:
//! - outbound connections with mock inventories
//! - teardown of one connection leaving the others addressable
//! - serving an implementer until stopped

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use switchyard::config::RpcConfig;
use switchyard::rpc::{
    BoxListener, Channel, ConnectStage, ConnectionManager, HookError, HookResult, Implementer,
    Inventory, Listener, ProtocolBundle, ProtocolRegistry, RpcError, Server, Service, SlotId,
    TcpAcceptor, DEFAULT_PRIORITY, QUIC, TCP,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

// ---------------------------------------------------------------------------
// Mock collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
struct InventoryState {
    slot: Option<SlotId>,
    channel: Option<Channel>,
    tried: Vec<String>,
    broken: Vec<SlotId>,
    disconnecting: usize,
    registered_when_connected: Option<Vec<SlotId>>,
}

#[derive(Default)]
struct MockInventory {
    target: Option<String>,
    refuse: Vec<&'static str>,
    reject_bind: bool,
    reject_connected: bool,
    shutdown_on_bind: bool,
    manager: Option<Arc<ConnectionManager>>,
    state: Mutex<InventoryState>,
}

impl MockInventory {
    fn dialing(target: &str) -> Arc<Self> {
        Arc::new(Self {
            target: Some(target.to_string()),
            ..Self::default()
        })
    }

    fn watching(target: &str, manager: &Arc<ConnectionManager>) -> Self {
        Self {
            target: Some(target.to_string()),
            manager: Some(Arc::clone(manager)),
            ..Self::default()
        }
    }

    fn slot(&self) -> Option<SlotId> {
        self.state.lock().slot
    }

    fn tried(&self) -> Vec<String> {
        self.state.lock().tried.clone()
    }
}

impl Inventory for MockInventory {
    fn version(&self) -> String {
        "v1".to_string()
    }

    fn socket(&self) -> Option<SlotId> {
        self.state.lock().slot
    }

    fn address(&self, _protocol: &str) -> Option<String> {
        self.target.clone()
    }

    fn bind_connection(&self, channel: Channel) -> HookResult {
        self.state.lock().channel = Some(channel);
        if self.shutdown_on_bind {
            if let Some(manager) = &self.manager {
                manager.shutdown();
            }
        }
        if self.reject_bind {
            return Err("bind rejected".into());
        }
        Ok(())
    }

    fn on_connecting(&self, protocol: &str) -> HookResult {
        self.state.lock().tried.push(protocol.to_string());
        if self.refuse.iter().any(|refused| *refused == protocol) {
            return Err(format!("{protocol} refused").into());
        }
        Ok(())
    }

    fn on_connected(&self, slot: SlotId) -> HookResult {
        let registered = self.manager.as_ref().map(|manager| manager.active_slots(TCP));
        let mut state = self.state.lock();
        state.registered_when_connected = registered;
        if self.reject_connected {
            return Err("not ready".into());
        }
        state.slot = Some(slot);
        Ok(())
    }

    fn on_broken(&self, slot: SlotId) -> HookResult {
        let mut state = self.state.lock();
        state.broken.push(slot);
        state.slot = None;
        Ok(())
    }

    fn on_disconnecting(&self) {
        let mut state = self.state.lock();
        state.disconnecting += 1;
        state.slot = None;
    }
}

struct EchoService;

#[async_trait]
impl Service for EchoService {
    async fn serve_connection(&self, channel: Channel) -> HookResult {
        let mut buf = [0u8; 64];
        loop {
            let mut stream = channel.lock().await?;
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            stream.write_all(&buf[..n]).await?;
        }
    }
}

enum Offer {
    Defer,
    Own(String),
    Fail,
}

struct MockImplementer {
    offer: Offer,
    bind_service: bool,
    asked: Mutex<Vec<String>>,
}

impl MockImplementer {
    fn new(offer: Offer) -> Arc<Self> {
        Arc::new(Self {
            offer,
            bind_service: true,
            asked: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Implementer for MockImplementer {
    fn version(&self) -> String {
        "v1".to_string()
    }

    async fn listen(&self, protocol: &str) -> Result<Option<BoxListener>, HookError> {
        self.asked.lock().push(protocol.to_string());
        match &self.offer {
            Offer::Defer => Ok(None),
            Offer::Own(address) if protocol == TCP => {
                let listener: BoxListener = Box::new(TcpAcceptor::bind(address).await?);
                Ok(Some(listener))
            }
            Offer::Own(_) => Ok(None),
            Offer::Fail => Err("no sockets today".into()),
        }
    }

    fn bind_server(&self, server: &mut Server) -> HookResult {
        if self.bind_service {
            server.register(EchoService);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// An address nothing listens on.
async fn closed_address() -> String {
    let listener = TcpAcceptor::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    drop(listener);
    address
}

async fn wait_for_server(manager: &ConnectionManager) -> String {
    for _ in 0..200 {
        if let Some(info) = manager.servers().into_iter().next() {
            return info.local_addr.expect("bound address");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server never registered");
}

async fn round_trip(address: &str, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(address).await.expect("connect");
    stream.write_all(payload).await.expect("write");
    let mut buf = vec![0u8; payload.len()];
    stream.read_exact(&mut buf).await.expect("read");
    buf
}

// ---------------------------------------------------------------------------
// Connect / disconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_disconnect_middle_keeps_other_slots() {
    init_tracing();
    let listener = TcpAcceptor::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let manager = ConnectionManager::from_config(&RpcConfig::default());

    let a = MockInventory::dialing(&address);
    let b = MockInventory::dialing(&address);
    let c = MockInventory::dialing(&address);
    let slot_a = manager.connect(a.clone()).await.expect("connect a");
    let slot_b = manager.connect(b.clone()).await.expect("connect b");
    let slot_c = manager.connect(c.clone()).await.expect("connect c");
    assert_eq!(a.slot(), Some(slot_a));
    assert_eq!(manager.active_slots(TCP), vec![slot_a, slot_b, slot_c]);

    manager.disconnect(b.as_ref()).await.expect("disconnect b");
    assert_eq!(manager.active_slots(TCP), vec![slot_a, slot_c]);

    manager.disconnect(c.as_ref()).await.expect("disconnect c");
    let remaining: Vec<SlotId> = manager.connections().iter().map(|info| info.slot).collect();
    assert_eq!(remaining, vec![slot_a]);
    assert_eq!(manager.connections()[0].protocol, TCP);
    assert_eq!(manager.connections()[0].version, "v1");

    let state = b.state.lock();
    assert_eq!(state.disconnecting, 1);
    assert!(state.channel.as_ref().expect("bound channel").is_closed());
}

#[tokio::test]
async fn test_disconnect_twice_fails() {
    init_tracing();
    let listener = TcpAcceptor::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let manager = ConnectionManager::from_config(&RpcConfig::default());

    let a = MockInventory::dialing(&address);
    manager.connect(a.clone()).await.expect("connect");
    manager.disconnect(a.as_ref()).await.expect("disconnect");

    assert!(matches!(
        manager.disconnect(a.as_ref()).await,
        Err(RpcError::AlreadyDisconnected { slot: None })
    ));
    let stranger = MockInventory::default();
    assert!(matches!(
        manager.disconnect(&stranger).await,
        Err(RpcError::AlreadyDisconnected { .. })
    ));
}

#[tokio::test]
async fn test_disconnect_ignores_borrowed_slot() {
    init_tracing();
    let listener = TcpAcceptor::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let manager = ConnectionManager::from_config(&RpcConfig::default());

    let owner = MockInventory::dialing(&address);
    let slot = manager.connect(owner.clone()).await.expect("connect");

    let impostor = MockInventory::default();
    impostor.state.lock().slot = Some(slot);
    assert!(matches!(
        manager.disconnect(&impostor).await,
        Err(RpcError::AlreadyDisconnected { slot: Some(s) }) if s == slot
    ));
    assert_eq!(manager.active_slots(TCP), vec![slot]);
}

#[tokio::test]
async fn test_connect_exhausts_every_protocol() {
    init_tracing();
    let config = RpcConfig::local(closed_address().await);
    let manager = ConnectionManager::from_config(&config);
    let inventory = Arc::new(MockInventory::default());

    let err = manager.connect(inventory.clone()).await.expect_err("no route");
    assert_eq!(
        err.to_string(),
        "can't establish a new connection (5 protocol(s) tried)"
    );
    let RpcError::ConnectFailed { failures } = err else {
        panic!("expected ConnectFailed");
    };

    let protocols: Vec<&str> = failures.iter().map(|f| f.protocol.as_str()).collect();
    assert_eq!(protocols, DEFAULT_PRIORITY.to_vec());
    assert!(failures.iter().all(|f| f.stage == ConnectStage::Dial));
    assert_eq!(failures[4].reason, "don't support protocol quic");
    assert_eq!(inventory.tried(), DEFAULT_PRIORITY.to_vec());
    assert!(manager.connections().is_empty());
}

#[tokio::test]
async fn test_refused_protocol_is_skipped() {
    init_tracing();
    let listener = TcpAcceptor::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let manager = ConnectionManager::from_config(&RpcConfig::default());

    let inventory = Arc::new(MockInventory {
        target: Some(address),
        refuse: vec![TCP],
        ..MockInventory::default()
    });
    let result = manager.connect(inventory.clone()).await;
    let Err(RpcError::ConnectFailed { failures }) = result else {
        panic!("connect should fail");
    };
    assert_eq!(failures[0].stage, ConnectStage::Connecting);
    assert_eq!(failures[0].reason, "tcp refused");
    assert!(inventory.state.lock().channel.is_none());
}

#[tokio::test]
async fn test_rejected_bind_closes_channel() {
    init_tracing();
    let listener = TcpAcceptor::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let manager = ConnectionManager::from_config(&RpcConfig::default());

    let inventory = Arc::new(MockInventory {
        target: Some(address),
        reject_bind: true,
        ..MockInventory::default()
    });
    let result = manager.connect(inventory.clone()).await;
    let Err(RpcError::ConnectFailed { failures }) = result else {
        panic!("connect should fail");
    };
    assert_eq!(failures[0].stage, ConnectStage::Bind);

    let state = inventory.state.lock();
    assert!(state.channel.as_ref().expect("bound channel").is_closed());
    assert_eq!(state.slot, None);
}

#[tokio::test]
async fn test_protocol_priority_is_honoured() {
    init_tracing();
    let listener = TcpAcceptor::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let config = RpcConfig {
        priority: vec![QUIC.to_string(), TCP.to_string()],
        ..RpcConfig::default()
    };
    let manager = ConnectionManager::from_config(&config);

    let inventory = MockInventory::dialing(&address);
    manager.connect(inventory.clone()).await.expect("connect");
    assert_eq!(inventory.tried(), vec![QUIC, TCP]);
}

#[tokio::test]
async fn test_report_broken_notifies_inventory() {
    init_tracing();
    let listener = TcpAcceptor::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let manager = ConnectionManager::from_config(&RpcConfig::default());

    let inventory = MockInventory::dialing(&address);
    let slot = manager.connect(inventory.clone()).await.expect("connect");
    let channel = manager.channel(slot).expect("channel");

    manager.report_broken(slot).await.expect("report");
    assert!(channel.is_closed());
    assert_eq!(inventory.state.lock().broken, vec![slot]);
    assert!(manager.connections().is_empty());
    assert!(matches!(
        manager.report_broken(slot).await,
        Err(RpcError::AlreadyDisconnected { .. })
    ));
}

#[tokio::test]
async fn test_disconnect_all() {
    init_tracing();
    let listener = TcpAcceptor::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let manager = ConnectionManager::from_config(&RpcConfig::default());

    let inventories: Vec<_> = (0..3).map(|_| MockInventory::dialing(&address)).collect();
    for inventory in &inventories {
        manager.connect(inventory.clone()).await.expect("connect");
    }

    manager.disconnect_all().await;
    assert!(manager.connections().is_empty());
    assert!(manager.active_slots(TCP).is_empty());
    for inventory in &inventories {
        assert_eq!(inventory.state.lock().disconnecting, 1);
        assert_eq!(inventory.slot(), None);
    }
}

#[tokio::test]
async fn test_slot_is_registered_before_on_connected() {
    init_tracing();
    let listener = TcpAcceptor::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let manager = Arc::new(ConnectionManager::from_config(&RpcConfig::default()));

    let inventory = Arc::new(MockInventory::watching(&address, &manager));
    let slot = manager.connect(inventory.clone()).await.expect("connect");
    assert_eq!(
        inventory.state.lock().registered_when_connected,
        Some(vec![slot])
    );
}

#[tokio::test]
async fn test_rejected_on_connected_unregisters() {
    init_tracing();
    let listener = TcpAcceptor::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let manager = Arc::new(ConnectionManager::from_config(&RpcConfig::default()));

    let inventory = Arc::new(MockInventory {
        reject_connected: true,
        ..MockInventory::watching(&address, &manager)
    });
    let result = manager.connect(inventory.clone()).await;
    let Err(RpcError::ConnectFailed { failures }) = result else {
        panic!("connect should fail");
    };
    assert_eq!(failures[0].stage, ConnectStage::Connected);
    assert_eq!(failures[0].reason, "not ready");
    assert!(manager.connections().is_empty());
    assert!(manager.active_slots(TCP).is_empty());

    let state = inventory.state.lock();
    assert_eq!(state.registered_when_connected.as_ref().map(Vec::len), Some(1));
    assert!(state.channel.as_ref().expect("bound channel").is_closed());
    assert_eq!(state.slot, None);
}

#[tokio::test]
async fn test_shutdown_during_bind_notifies_inventory() {
    init_tracing();
    let listener = TcpAcceptor::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let manager = Arc::new(ConnectionManager::from_config(&RpcConfig::default()));

    let inventory = Arc::new(MockInventory {
        shutdown_on_bind: true,
        ..MockInventory::watching(&address, &manager)
    });
    assert!(matches!(
        manager.connect(inventory.clone()).await,
        Err(RpcError::Shutdown)
    ));
    assert!(manager.connections().is_empty());

    let state = inventory.state.lock();
    assert_eq!(state.slot, None);
    assert_eq!(state.disconnecting, 1);
    assert_eq!(state.registered_when_connected, None);
    assert!(state.channel.as_ref().expect("bound channel").is_closed());
}

#[tokio::test]
async fn test_disconnect_wakes_blocked_reader() {
    init_tracing();
    let listener = TcpAcceptor::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let manager = ConnectionManager::from_config(&RpcConfig::default());

    let inventory = MockInventory::dialing(&address);
    manager.connect(inventory.clone()).await.expect("connect");
    let channel = inventory.state.lock().channel.clone().expect("bound channel");

    // The peer never writes, so the read parks while holding the stream.
    let (locked_tx, locked_rx) = tokio::sync::oneshot::channel();
    let reader = tokio::spawn(async move {
        let mut stream = channel.lock().await.expect("lock");
        let _ = locked_tx.send(());
        let mut buf = [0u8; 16];
        stream.read(&mut buf).await
    });
    locked_rx.await.expect("reader holds the stream");

    tokio::time::timeout(Duration::from_secs(3), manager.disconnect(inventory.as_ref()))
        .await
        .expect("disconnect does not wait for the reader")
        .expect("disconnect");

    let read = tokio::time::timeout(Duration::from_secs(3), reader)
        .await
        .expect("reader woke")
        .expect("join");
    assert!(read.is_err());
    assert_eq!(inventory.state.lock().disconnecting, 1);
}

// ---------------------------------------------------------------------------
// Serve
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_serve_falls_back_to_listen_factory() {
    init_tracing();
    let manager = Arc::new(ConnectionManager::from_config(&RpcConfig::local(
        "127.0.0.1:0",
    )));
    let implementer = MockImplementer::new(Offer::Defer);

    let serving = {
        let manager = Arc::clone(&manager);
        let implementer = implementer.clone();
        tokio::spawn(async move { manager.serve(implementer).await })
    };

    let address = wait_for_server(&manager).await;
    assert_eq!(round_trip(&address, b"ping").await, b"ping");

    let servers = manager.servers();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].protocol, TCP);
    assert_eq!(servers[0].version, "v1");

    manager.shutdown();
    serving.await.expect("join").expect("serve");
    assert!(manager.servers().is_empty());
    assert_eq!(*implementer.asked.lock(), vec![TCP]);
}

#[tokio::test]
async fn test_serve_uses_offered_listener() {
    init_tracing();
    let manager = Arc::new(ConnectionManager::from_config(&RpcConfig::local(
        closed_address().await,
    )));
    let implementer = MockImplementer::new(Offer::Own("127.0.0.1:0".to_string()));

    let serving = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.serve(implementer).await })
    };

    let address = wait_for_server(&manager).await;
    assert_eq!(round_trip(&address, b"hello").await, b"hello");

    let id = manager.servers()[0].id;
    assert!(manager.stop_server(id));
    serving.await.expect("join").expect("serve");
    assert!(manager.servers().is_empty());
    assert!(!manager.is_shut_down());
}

#[tokio::test]
async fn test_listen_error_is_terminal() {
    init_tracing();
    let manager = ConnectionManager::from_config(&RpcConfig::local("127.0.0.1:0"));
    let implementer = MockImplementer::new(Offer::Fail);

    let err = manager.serve(implementer.clone()).await.expect_err("fails");
    assert!(matches!(err, RpcError::Listen { ref protocol, .. } if protocol == TCP));
    assert_eq!(*implementer.asked.lock(), vec![TCP]);
}

#[tokio::test]
async fn test_serve_without_listener() {
    init_tracing();
    let mut registry = ProtocolRegistry::empty();
    for name in DEFAULT_PRIORITY {
        registry.register(ProtocolBundle::placeholder(name));
    }
    let manager = ConnectionManager::new(registry);
    let implementer = MockImplementer::new(Offer::Defer);

    assert!(matches!(
        manager.serve(implementer.clone()).await,
        Err(RpcError::NoListener)
    ));
    assert_eq!(*implementer.asked.lock(), DEFAULT_PRIORITY.to_vec());
}

#[tokio::test]
async fn test_serve_without_service() {
    init_tracing();
    let manager = ConnectionManager::from_config(&RpcConfig::local("127.0.0.1:0"));
    let implementer = Arc::new(MockImplementer {
        offer: Offer::Defer,
        bind_service: false,
        asked: Mutex::new(Vec::new()),
    });

    assert!(matches!(
        manager.serve(implementer).await,
        Err(RpcError::NoService { .. })
    ));
    assert!(manager.servers().is_empty());
}

#[tokio::test]
async fn test_make_listener() {
    init_tracing();
    let manager = ConnectionManager::from_config(&RpcConfig::local("127.0.0.1:0"));

    let listener = manager.make_listener(TCP).await.expect("tcp listener");
    assert_eq!(listener.protocol(), TCP);
    assert!(listener.local_addr().is_ok());

    assert!(matches!(
        manager.make_listener(QUIC).await,
        Err(RpcError::UnsupportedProtocol { protocol }) if protocol == QUIC
    ));
}

#[tokio::test]
async fn test_shutdown_stops_connect() {
    init_tracing();
    let listener = TcpAcceptor::bind("127.0.0.1:0").await.expect("bind");
    let address = listener.local_addr().expect("addr");
    let manager = ConnectionManager::from_config(&RpcConfig::default());

    manager.shutdown();
    let inventory = MockInventory::dialing(&address);
    assert!(matches!(
        manager.connect(inventory.clone()).await,
        Err(RpcError::Shutdown)
    ));
    assert!(inventory.tried().is_empty());
}
