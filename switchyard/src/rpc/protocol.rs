//! Protocol bundles and their priority-ordered registry.

use std::fmt;
use std::sync::Arc;

use super::{Dialer, ListenFactory, RpcError, TcpTransport};
use crate::config::RpcConfig;

/// TCP, the only protocol with a built-in strategy.
pub const TCP: &str = "tcp";
/// Reserved: local IPC sockets.
pub const IPC: &str = "ipc";
/// Reserved: TIPC.
pub const TIPC: &str = "tipc";
/// Reserved: SCTP.
pub const SCTP: &str = "sctp";
/// Reserved: QUIC.
pub const QUIC: &str = "quic";

/// Order in which the default registry tries protocols.
pub const DEFAULT_PRIORITY: [&str; 5] = [TCP, IPC, TIPC, SCTP, QUIC];

/// A named transport strategy: how to dial and how to listen.
///
/// Either half may be missing. A bundle with neither is a placeholder that
/// reserves the name and fails every use with
/// [`RpcError::UnsupportedProtocol`].
#[derive(Clone)]
pub struct ProtocolBundle {
    name: String,
    dialer: Option<Arc<dyn Dialer>>,
    listen_factory: Option<Arc<dyn ListenFactory>>,
}

impl ProtocolBundle {
    /// A bundle with no strategy.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dialer: None,
            listen_factory: None,
        }
    }

    /// The TCP bundle.
    pub fn tcp(transport: TcpTransport) -> Self {
        let transport = Arc::new(transport);
        Self {
            name: TCP.to_string(),
            dialer: Some(transport.clone()),
            listen_factory: Some(transport),
        }
    }

    /// Set the client strategy.
    pub fn with_dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.dialer = Some(Arc::new(dialer));
        self
    }

    /// Set the server strategy.
    pub fn with_listen_factory(mut self, factory: impl ListenFactory + 'static) -> Self {
        self.listen_factory = Some(Arc::new(factory));
        self
    }

    /// Protocol name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Client strategy.
    pub fn dialer(&self) -> Result<&Arc<dyn Dialer>, RpcError> {
        self.dialer.as_ref().ok_or_else(|| self.unsupported())
    }

    /// Server strategy.
    pub fn listen_factory(&self) -> Result<&Arc<dyn ListenFactory>, RpcError> {
        self.listen_factory.as_ref().ok_or_else(|| self.unsupported())
    }

    /// Whether the bundle can do anything at all.
    pub fn is_functional(&self) -> bool {
        self.dialer.is_some() || self.listen_factory.is_some()
    }

    fn unsupported(&self) -> RpcError {
        RpcError::UnsupportedProtocol {
            protocol: self.name.clone(),
        }
    }
}

impl fmt::Debug for ProtocolBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolBundle")
            .field("name", &self.name)
            .field("dialer", &self.dialer.is_some())
            .field("listen_factory", &self.listen_factory.is_some())
            .finish()
    }
}

/// Protocol bundles in the order `connect` and `serve` try them.
///
/// Order is explicit and deterministic; it never depends on hashing.
#[derive(Debug, Clone, Default)]
pub struct ProtocolRegistry {
    bundles: Vec<ProtocolBundle>,
}

impl ProtocolRegistry {
    /// A registry with no protocols.
    pub fn empty() -> Self {
        Self::default()
    }

    /// TCP plus the reserved placeholders, ordered by `config.priority`.
    pub fn with_defaults(config: &RpcConfig) -> Self {
        let mut registry = Self::empty();
        registry.register(ProtocolBundle::tcp(TcpTransport::new(&config.tcp)));
        for name in [IPC, TIPC, SCTP, QUIC] {
            registry.register(ProtocolBundle::placeholder(name));
        }
        registry.set_priority(&config.priority);
        registry
    }

    /// Add `bundle` at the lowest priority, or replace the bundle of the
    /// same name in place.
    pub fn register(&mut self, bundle: ProtocolBundle) -> &mut Self {
        match self.bundles.iter_mut().find(|b| b.name == bundle.name) {
            Some(existing) => *existing = bundle,
            None => self.bundles.push(bundle),
        }
        self
    }

    /// Reorder so that `names` come first, in that order.
    ///
    /// Unknown names are ignored; unlisted protocols keep their relative
    /// order after the listed ones.
    pub fn set_priority<S: AsRef<str>>(&mut self, names: &[S]) -> &mut Self {
        let rank = |bundle: &ProtocolBundle| {
            names
                .iter()
                .position(|n| n.as_ref() == bundle.name)
                .unwrap_or(names.len())
        };
        // Stable sort keeps registration order among equal ranks.
        self.bundles.sort_by_key(rank);
        self
    }

    /// Bundle registered under `name`.
    pub fn get(&self, name: &str) -> Option<&ProtocolBundle> {
        self.bundles.iter().find(|b| b.name == name)
    }

    /// Bundles in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &ProtocolBundle> {
        self.bundles.iter()
    }

    /// Protocol names in priority order.
    pub fn names(&self) -> Vec<&str> {
        self.bundles.iter().map(ProtocolBundle::name).collect()
    }

    /// Number of registered protocols.
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// Whether no protocol is registered.
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}
