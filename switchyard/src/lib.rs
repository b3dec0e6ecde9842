//! # Switchyard
//!
//! Service front-end toolkit.
//!
//! This crate provides:
//! - **API**: versioned endpoints, version-agnostic aliases and access gating,
//!   dispatched by an immutable [`Router`] and served over HTTP/1
//! - **Envelope**: the uniform `{"code": N, "data": X}` response body
//! - **RPC**: a connection manager that dials and serves over a
//!   priority-ordered set of protocol bundles

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Modules
// =============================================================================

/// Versioned HTTP API routing.
pub mod api;

/// Configuration loading.
pub mod config;

/// Response envelope encoding.
pub mod envelope;

/// Connection lifecycle over pluggable protocols.
pub mod rpc;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use api::{
    AccessLevel, AccessPolicy, ApiBuilder, ApiServer, BuildError, EndpointRef, Handler, Method,
    Reply, RequestContext, Router,
};
pub use config::{ApiConfig, Config, ConfigError, RpcConfig, TcpConfig};
pub use rpc::{
    Channel, ConnectionManager, Implementer, Inventory, ProtocolBundle, ProtocolRegistry,
    RpcError, Server, Service, SlotId,
};
