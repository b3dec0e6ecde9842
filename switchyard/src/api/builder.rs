//! Build-phase API: versions, endpoints, handlers and paths.
//!
//! ```
//! use switchyard::api::{ApiBuilder, Method, Reply, RequestContext};
//!
//! let mut api = ApiBuilder::new();
//! api.version("v1")
//!     .endpoint("echo")?
//!     .handle(Method::Get, |_req: RequestContext| async { Reply::ok("hello") })
//!     .mount("/echo")?;
//! let router = api.build();
//! assert!(router.routes().contains(&"/v1/echo".to_string()));
//! # Ok::<(), switchyard::api::BuildError>(())
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::{
    AccessLevel, AccessPolicy, AliasTable, BuildError, Endpoint, EndpointRef, Handler, Method,
    RemoteAddrPolicy, Router, Version,
};
use crate::config::ApiConfig;

/// Mutable registry used while the API is being assembled.
///
/// Call [`freeze`](Self::freeze) (or [`build`](Self::build)) once every
/// route is declared to obtain the shareable [`Router`].
#[derive(Debug, Default)]
pub struct ApiBuilder {
    versions: HashMap<String, Version>,
    aliases: AliasTable,
    direct: HashMap<String, EndpointRef>,
    base: Option<String>,
    current_version: Option<String>,
}

impl ApiBuilder {
    /// Create an empty builder with no base prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder using the configured base prefix.
    pub fn from_config(config: &ApiConfig) -> Self {
        let mut builder = Self::new();
        if let Some(base) = &config.base {
            builder.set_base(base);
        }
        builder
    }

    /// Prefix version-agnostic paths created by [`mount`](Self::mount).
    pub fn with_base(mut self, base: impl AsRef<str>) -> Self {
        self.set_base(base);
        self
    }

    fn set_base(&mut self, base: impl AsRef<str>) {
        let trimmed = base.as_ref().trim_matches('/');
        self.base = (!trimmed.is_empty()).then(|| trimmed.to_string());
    }

    /// Configured base prefix, without slashes.
    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    /// Open (creating if needed) the version `code`.
    ///
    /// Endpoints created afterwards belong to it. An empty code leaves no
    /// version open.
    pub fn version(&mut self, code: &str) -> &mut Self {
        if code.is_empty() {
            self.current_version = None;
            return self;
        }
        self.versions
            .entry(code.to_string())
            .or_insert_with(|| Version::new(code));
        self.current_version = Some(code.to_string());
        self
    }

    /// Get or create the endpoint `name` in the open version.
    ///
    /// # Errors
    ///
    /// [`BuildError::NoOpenVersion`] if no version is open.
    pub fn endpoint(&mut self, name: &str) -> Result<EndpointBuilder<'_>, BuildError> {
        if name.is_empty() {
            return Err(BuildError::EmptyEndpointName);
        }
        let code = self
            .current_version
            .clone()
            .ok_or(BuildError::NoOpenVersion)?;
        let version = self
            .versions
            .entry(code.clone())
            .or_insert_with(|| Version::new(&code));
        let endpoint = version.ensure_endpoint(name).to_ref();
        Ok(EndpointBuilder { api: self, endpoint })
    }

    /// Bind `handler` to `(endpoint, method)`, replacing any previous one.
    pub fn bind_handler(
        &mut self,
        endpoint: &EndpointRef,
        method: Method,
        handler: impl Handler,
    ) -> Result<&mut Self, BuildError> {
        self.endpoint_mut(endpoint)?.bind(method, Arc::new(handler));
        Ok(self)
    }

    /// Set the access level of `endpoint`.
    pub fn set_access_level(
        &mut self,
        endpoint: &EndpointRef,
        level: AccessLevel,
    ) -> Result<&mut Self, BuildError> {
        self.endpoint_mut(endpoint)?.set_access_level(level);
        Ok(self)
    }

    /// Let `endpoint` accept requests.
    pub fn enable(&mut self, endpoint: &EndpointRef) -> Result<&mut Self, BuildError> {
        self.endpoint_mut(endpoint)?.set_enabled(true);
        Ok(self)
    }

    /// Make every path resolving to `endpoint` answer not-found.
    pub fn disable(&mut self, endpoint: &EndpointRef) -> Result<&mut Self, BuildError> {
        self.endpoint_mut(endpoint)?.set_enabled(false);
        Ok(self)
    }

    /// Bind `path` to a snapshot of the methods `endpoint` has right now.
    ///
    /// Rebinding an alias path replaces it.
    ///
    /// # Errors
    ///
    /// [`BuildError::UnknownEndpoint`], or [`BuildError::RouteCollision`] if
    /// `path` is a versioned route.
    pub fn alias(&mut self, endpoint: &EndpointRef, path: &str) -> Result<&mut Self, BuildError> {
        let methods: Vec<Method> = self.endpoint_ref(endpoint)?.methods().collect();
        let path = join_path(&[path]);
        self.claim_alias(&path)?;
        self.bind_alias(endpoint, &path, methods);
        Ok(self)
    }

    /// Expose `endpoint` at `/<version>/<path>` and at `/<base>/<path>`.
    ///
    /// The first binding always reaches the live endpoint; the second is an
    /// [`alias`](Self::alias) and so sees only the methods bound so far.
    /// Nothing is bound unless both paths are free.
    ///
    /// # Errors
    ///
    /// [`BuildError::UnknownEndpoint`], or [`BuildError::RouteCollision`]
    /// when the two paths coincide (a base equal to the version code), the
    /// versioned path is an alias or another endpoint's route, or the alias
    /// path is a versioned route.
    pub fn mount(&mut self, endpoint: &EndpointRef, path: &str) -> Result<&mut Self, BuildError> {
        let methods: Vec<Method> = self.endpoint_ref(endpoint)?.methods().collect();

        let direct = join_path(&[endpoint.version(), path]);
        let alias = match &self.base {
            Some(base) => join_path(&[base.as_str(), path]),
            None => join_path(&[path]),
        };
        if direct == alias {
            return Err(BuildError::RouteCollision(direct));
        }
        self.claim_direct(endpoint, &direct)?;
        self.claim_alias(&alias)?;

        debug!(%endpoint, path = %direct, "direct route bound");
        self.direct.insert(direct, endpoint.clone());
        self.bind_alias(endpoint, &alias, methods);
        Ok(self)
    }

    /// Disable the alias at `path`, if one exists.
    pub fn disable_alias(&mut self, path: &str) -> &mut Self {
        if let Some(alias) = self.aliases.get(&join_path(&[path])) {
            alias.set_enabled(false);
        }
        self
    }

    /// Look up a version.
    pub fn get_version(&self, code: &str) -> Option<&Version> {
        self.versions.get(code)
    }

    /// End the build phase, gating restricted endpoints with `policy`.
    pub fn freeze(self, policy: impl AccessPolicy) -> Router {
        Router::new(self.versions, self.aliases, self.direct, Arc::new(policy))
    }

    /// End the build phase with the default [`RemoteAddrPolicy`].
    pub fn build(self) -> Router {
        self.freeze(RemoteAddrPolicy)
    }

    fn endpoint_ref(&self, endpoint: &EndpointRef) -> Result<&Endpoint, BuildError> {
        self.versions
            .get(endpoint.version())
            .and_then(|v| v.endpoint(endpoint.name()))
            .ok_or_else(|| BuildError::UnknownEndpoint(endpoint.clone()))
    }

    fn endpoint_mut(&mut self, endpoint: &EndpointRef) -> Result<&mut Endpoint, BuildError> {
        self.versions
            .get_mut(endpoint.version())
            .and_then(|v| v.endpoint_mut(endpoint.name()))
            .ok_or_else(|| BuildError::UnknownEndpoint(endpoint.clone()))
    }

    /// Get or create `endpoint`; used by [`EndpointBuilder`], whose
    /// endpoint always exists.
    fn live_endpoint(&mut self, endpoint: &EndpointRef) -> &mut Endpoint {
        self.versions
            .entry(endpoint.version().to_string())
            .or_insert_with(|| Version::new(endpoint.version()))
            .ensure_endpoint(endpoint.name())
    }

    fn bind_alias(&mut self, endpoint: &EndpointRef, path: &str, methods: Vec<Method>) {
        debug!(%endpoint, %path, ?methods, "alias bound");
        self.aliases.bind(path, endpoint, methods);
    }

    fn claim_direct(&self, endpoint: &EndpointRef, path: &str) -> Result<(), BuildError> {
        let taken = self.aliases.get(path).is_some()
            || self.direct.get(path).is_some_and(|bound| bound != endpoint);
        if taken {
            return Err(BuildError::RouteCollision(path.to_string()));
        }
        Ok(())
    }

    fn claim_alias(&self, path: &str) -> Result<(), BuildError> {
        if self.direct.contains_key(path) {
            return Err(BuildError::RouteCollision(path.to_string()));
        }
        Ok(())
    }
}

/// Fluent handle on one endpoint, borrowed from its [`ApiBuilder`].
///
/// Every method consumes and returns the handle so calls chain; the
/// endpoint is guaranteed to exist for the handle's lifetime.
#[derive(Debug)]
pub struct EndpointBuilder<'a> {
    api: &'a mut ApiBuilder,
    endpoint: EndpointRef,
}

impl<'a> EndpointBuilder<'a> {
    /// The endpoint being configured.
    pub fn endpoint_ref(&self) -> &EndpointRef {
        &self.endpoint
    }

    /// Bind `handler` to `method`; the last binding per method wins.
    pub fn handle(self, method: Method, handler: impl Handler) -> Self {
        self.api
            .live_endpoint(&self.endpoint)
            .bind(method, Arc::new(handler));
        self
    }

    /// Set the access level.
    pub fn access(self, level: AccessLevel) -> Self {
        self.api.live_endpoint(&self.endpoint).set_access_level(level);
        self
    }

    /// Accept requests.
    pub fn enable(self) -> Self {
        self.api.live_endpoint(&self.endpoint).set_enabled(true);
        self
    }

    /// Stop accepting requests.
    pub fn disable(self) -> Self {
        self.api.live_endpoint(&self.endpoint).set_enabled(false);
        self
    }

    /// See [`ApiBuilder::alias`].
    pub fn alias(self, path: &str) -> Result<Self, BuildError> {
        self.api.alias(&self.endpoint, path)?;
        Ok(self)
    }

    /// See [`ApiBuilder::mount`].
    pub fn mount(self, path: &str) -> Result<Self, BuildError> {
        self.api.mount(&self.endpoint, path)?;
        Ok(self)
    }

    /// Move on to another endpoint of the open version.
    pub fn endpoint(self, name: &str) -> Result<EndpointBuilder<'a>, BuildError> {
        self.api.endpoint(name)
    }

    /// Open another version.
    pub fn version(self, code: &str) -> &'a mut ApiBuilder {
        self.api.version(code)
    }

    /// Finish with this endpoint, keeping its handle.
    pub fn done(self) -> EndpointRef {
        self.endpoint
    }
}

/// Join path fragments into `/a/b/c`, ignoring stray and doubled slashes.
pub(crate) fn join_path(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .flat_map(|part| part.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{joined}")
}
