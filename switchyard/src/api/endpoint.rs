//! Versions, endpoints and the handles that name them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use super::{AccessLevel, Method, SharedHandler};

/// Names one endpoint: `(version code, endpoint name)`.
///
/// Passed explicitly wherever an operation needs to reach an endpoint, so the
/// endpoint itself holds no pointer back to its registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointRef {
    version: String,
    name: String,
}

impl EndpointRef {
    /// Create a reference to `name` inside version `version`.
    pub fn new(version: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            name: name.into(),
        }
    }

    /// Version code.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.version, self.name)
    }
}

/// A named resource within a version, holding one handler per method.
///
/// `enabled` and the access level are atomics so they can still be flipped
/// after the router has been frozen and shared.
pub struct Endpoint {
    name: String,
    version: String,
    level: AtomicU8,
    enabled: AtomicBool,
    methods: BTreeMap<Method, SharedHandler>,
}

impl Endpoint {
    pub(crate) fn new(version: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            level: AtomicU8::new(AccessLevel::Public.as_u8()),
            enabled: AtomicBool::new(true),
            methods: BTreeMap::new(),
        }
    }

    /// Endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Code of the owning version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Handle naming this endpoint.
    pub fn to_ref(&self) -> EndpointRef {
        EndpointRef::new(&self.version, &self.name)
    }

    /// Current access level.
    pub fn access_level(&self) -> AccessLevel {
        AccessLevel::from_u8(self.level.load(Ordering::Acquire)).unwrap_or(AccessLevel::Protected)
    }

    pub(crate) fn set_access_level(&self, level: AccessLevel) {
        self.level.store(level.as_u8(), Ordering::Release);
    }

    /// Whether the endpoint currently accepts requests.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Handler bound to `method`, if any.
    pub fn handler(&self, method: Method) -> Option<&SharedHandler> {
        self.methods.get(&method)
    }

    /// Methods with a bound handler, in a stable order.
    pub fn methods(&self) -> impl Iterator<Item = Method> + '_ {
        self.methods.keys().copied()
    }

    pub(crate) fn bind(&mut self, method: Method, handler: SharedHandler) {
        self.methods.insert(method, handler);
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("version", &self.version)
            .field("name", &self.name)
            .field("level", &self.access_level())
            .field("enabled", &self.is_enabled())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One API revision: a named group of endpoints.
#[derive(Debug)]
pub struct Version {
    code: String,
    endpoints: HashMap<String, Endpoint>,
}

impl Version {
    pub(crate) fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            endpoints: HashMap::new(),
        }
    }

    /// Version code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Endpoint named `name`.
    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.get(name)
    }

    pub(crate) fn endpoint_mut(&mut self, name: &str) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(name)
    }

    /// Get or create the endpoint named `name`.
    pub(crate) fn ensure_endpoint(&mut self, name: &str) -> &mut Endpoint {
        let code = &self.code;
        self.endpoints
            .entry(name.to_string())
            .or_insert_with(|| Endpoint::new(code, name))
    }

    /// Number of endpoints in this version.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Whether this version has no endpoints.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
