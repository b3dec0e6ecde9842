//! Frozen routing table and request dispatch.
//!
//! # Resolution
//!
//! ```text
//! path ──► alias table ──hit──► snapshot[method] ──► endpoint ─┐
//!   │                                                          │
//!   └─miss─► direct table ──hit──► (version, name) ──► endpoint┤
//!                                                              ▼
//!                                     enabled? level permitted? handler
//! ```
//!
//! Any miss along the way, and any refusal by the access policy, produces the
//! same [`Reply::not_found`]. A caller can never tell a forbidden endpoint from
//! a missing one.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use super::{
    AccessLevel, AccessPolicy, Alias, AliasTable, Endpoint, EndpointRef, Method, Reply,
    RequestContext, SharedHandler, Version,
};

/// Immutable, shareable routing table produced by
/// [`ApiBuilder::freeze`](super::ApiBuilder::freeze).
///
/// Lookups take no locks. Enabled flags and access levels can still be
/// toggled at run time.
pub struct Router {
    versions: HashMap<String, Version>,
    aliases: AliasTable,
    direct: HashMap<String, EndpointRef>,
    policy: Arc<dyn AccessPolicy>,
}

/// Why a request did not reach a handler. Only ever logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Miss {
    NoRoute,
    AliasDisabled,
    MethodNotBound,
    EndpointGone,
    Disabled,
    Denied(AccessLevel),
}

impl Router {
    pub(crate) fn new(
        versions: HashMap<String, Version>,
        aliases: AliasTable,
        direct: HashMap<String, EndpointRef>,
        policy: Arc<dyn AccessPolicy>,
    ) -> Self {
        Self {
            versions,
            aliases,
            direct,
            policy,
        }
    }

    /// Answer `request`.
    ///
    /// Resolves `request.path` and `request.method`, checks access and runs
    /// the handler, or returns the uniform not-found reply.
    pub async fn dispatch(&self, request: RequestContext) -> Reply {
        match self.resolve(&request) {
            Ok(handler) => handler.call(request).await,
            Err(miss) => {
                debug!(
                    method = %request.method,
                    path = %request.path,
                    reason = ?miss,
                    "request not routed"
                );
                Reply::not_found()
            }
        }
    }

    /// Handler that would answer `request`, if any.
    pub fn lookup(&self, request: &RequestContext) -> Option<SharedHandler> {
        self.resolve(request).ok()
    }

    fn resolve(&self, request: &RequestContext) -> Result<SharedHandler, Miss> {
        let method = request.method;
        let endpoint = match self.aliases.get(&request.path) {
            Some(alias) => {
                if !alias.is_enabled() {
                    return Err(Miss::AliasDisabled);
                }
                let target = alias.target(method).ok_or(Miss::MethodNotBound)?;
                trace!(path = %request.path, %target, "resolved through alias");
                self.endpoint(target).ok_or(Miss::EndpointGone)?
            }
            None => {
                let target = self.direct.get(&request.path).ok_or(Miss::NoRoute)?;
                trace!(path = %request.path, %target, "resolved through version");
                self.endpoint(target).ok_or(Miss::EndpointGone)?
            }
        };

        let handler = endpoint.handler(method).ok_or(Miss::MethodNotBound)?;
        self.check_access(endpoint, request)?;
        Ok(Arc::clone(handler))
    }

    fn check_access(&self, endpoint: &Endpoint, request: &RequestContext) -> Result<(), Miss> {
        if !endpoint.is_enabled() {
            return Err(Miss::Disabled);
        }
        let level = endpoint.access_level();
        if self.policy.permits(level, request) {
            Ok(())
        } else {
            Err(Miss::Denied(level))
        }
    }

    /// Look up an endpoint.
    pub fn endpoint(&self, endpoint: &EndpointRef) -> Option<&Endpoint> {
        self.versions
            .get(endpoint.version())
            .and_then(|v| v.endpoint(endpoint.name()))
    }

    /// Look up the alias bound at `path`.
    pub fn alias(&self, path: &str) -> Option<&Alias> {
        self.aliases.get(path)
    }

    /// Enable or disable an endpoint. Returns `false` if it does not exist.
    pub fn set_enabled(&self, endpoint: &EndpointRef, enabled: bool) -> bool {
        self.endpoint(endpoint)
            .map(|e| e.set_enabled(enabled))
            .is_some()
    }

    /// Change an endpoint's access level. Returns `false` if it does not
    /// exist.
    pub fn set_access_level(&self, endpoint: &EndpointRef, level: AccessLevel) -> bool {
        self.endpoint(endpoint)
            .map(|e| e.set_access_level(level))
            .is_some()
    }

    /// Enable or disable the alias at `path`. Returns `false` if there is
    /// none.
    pub fn set_alias_enabled(&self, path: &str, enabled: bool) -> bool {
        self.aliases
            .get(path)
            .map(|a| a.set_enabled(enabled))
            .is_some()
    }

    /// Every routable path, sorted.
    pub fn routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self
            .aliases
            .paths()
            .map(str::to_string)
            .chain(self.direct.keys().cloned())
            .collect();
        routes.sort();
        routes.dedup();
        routes
    }

    /// Whether `method` on `path` reaches a handler for an anonymous
    /// caller.
    pub fn is_routable(&self, method: Method, path: &str) -> bool {
        self.lookup(&RequestContext::new(method, path)).is_some()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("versions", &self.versions.len())
            .field("aliases", &self.aliases.len())
            .field("direct", &self.direct.len())
            .finish()
    }
}
