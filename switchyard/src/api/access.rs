//! Access levels and the policy that evaluates them.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::RequestContext;

/// Who may reach an endpoint.
///
/// The level belongs to the endpoint, so every path resolving to it, direct
/// or aliased, is gated the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AccessLevel {
    /// Anyone.
    #[default]
    Public = 0,
    /// Only callers the policy considers local.
    Private = 1,
    /// Only callers the policy considers internal.
    Protected = 2,
}

impl AccessLevel {
    /// Numeric value exposed to API builders.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`as_u8`](Self::as_u8).
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AccessLevel::Public),
            1 => Some(AccessLevel::Private),
            2 => Some(AccessLevel::Protected),
            _ => None,
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::Public => f.write_str("public"),
            AccessLevel::Private => f.write_str("private"),
            AccessLevel::Protected => f.write_str("protected"),
        }
    }
}

/// Predicates deciding where a request comes from.
pub trait AccessPolicy: Send + Sync + 'static {
    /// Whether the caller is on this host.
    fn is_local(&self, request: &RequestContext) -> bool;

    /// Whether the caller is inside the deployment's network.
    fn is_internal(&self, request: &RequestContext) -> bool;

    /// Whether a handler at `level` may run for `request`.
    fn permits(&self, level: AccessLevel, request: &RequestContext) -> bool {
        match level {
            AccessLevel::Public => true,
            AccessLevel::Private => self.is_local(request),
            AccessLevel::Protected => self.is_internal(request),
        }
    }
}

/// Treats nobody as local or internal; only public endpoints are reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicOnly;

impl AccessPolicy for PublicOnly {
    fn is_local(&self, _request: &RequestContext) -> bool {
        false
    }

    fn is_internal(&self, _request: &RequestContext) -> bool {
        false
    }
}

/// Classifies callers by their remote address.
///
/// Loopback peers are local. Loopback, private (RFC 1918), link-local and
/// IPv6 unique-local peers are internal. Requests without a known peer are
/// neither.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteAddrPolicy;

impl AccessPolicy for RemoteAddrPolicy {
    fn is_local(&self, request: &RequestContext) -> bool {
        request
            .remote_addr
            .is_some_and(|addr| addr.ip().is_loopback())
    }

    fn is_internal(&self, request: &RequestContext) -> bool {
        request.remote_addr.is_some_and(|addr| match addr.ip() {
            IpAddr::V4(ip) => ip.is_loopback() || ip.is_private() || ip.is_link_local(),
            IpAddr::V6(ip) => {
                ip.is_loopback()
                    || (ip.segments()[0] & 0xfe00) == 0xfc00
                    || (ip.segments()[0] & 0xffc0) == 0xfe80
            }
        })
    }
}
