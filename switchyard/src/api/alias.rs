//! Alias paths bound to a frozen snapshot of an endpoint's methods.
//!
//! An alias records, at the moment it is created, which methods the endpoint
//! answers. Methods bound to the endpoint later are not reachable through the
//! alias until it is created again, which replaces the whole snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use super::{EndpointRef, Method};

/// A path pointing at a snapshot of one endpoint's method set.
#[derive(Debug)]
pub struct Alias {
    path: String,
    enabled: AtomicBool,
    bound: BTreeMap<Method, EndpointRef>,
}

impl Alias {
    /// Path this alias answers on.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the alias currently resolves.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Endpoint captured for `method`, if the snapshot has one.
    pub fn target(&self, method: Method) -> Option<&EndpointRef> {
        self.bound.get(&method)
    }

    /// Methods captured by the snapshot.
    pub fn methods(&self) -> impl Iterator<Item = Method> + '_ {
        self.bound.keys().copied()
    }
}

/// Every alias, keyed by path. Last write per path wins.
#[derive(Debug, Default)]
pub struct AliasTable {
    aliases: HashMap<String, Alias>,
}

impl AliasTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `path` at `endpoint` for exactly `methods`.
    ///
    /// An existing alias at `path` keeps its enabled flag but loses its old
    /// snapshot.
    pub fn bind(
        &mut self,
        path: &str,
        endpoint: &EndpointRef,
        methods: impl IntoIterator<Item = Method>,
    ) {
        let bound: BTreeMap<Method, EndpointRef> = methods
            .into_iter()
            .map(|method| (method, endpoint.clone()))
            .collect();

        match self.aliases.get_mut(path) {
            Some(alias) => alias.bound = bound,
            None => {
                self.aliases.insert(
                    path.to_string(),
                    Alias {
                        path: path.to_string(),
                        enabled: AtomicBool::new(true),
                        bound,
                    },
                );
            }
        }
    }

    /// Alias registered at `path`.
    pub fn get(&self, path: &str) -> Option<&Alias> {
        self.aliases.get(path)
    }

    /// Registered alias paths.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.aliases.keys().map(String::as_str)
    }

    /// Number of aliases.
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// Whether no alias is registered.
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_snapshots_methods() {
        let mut table = AliasTable::new();
        let echo = EndpointRef::new("v1", "echo");

        table.bind("/echo", &echo, [Method::Get]);

        let alias = table.get("/echo").expect("alias exists");
        assert!(alias.is_enabled());
        assert_eq!(alias.target(Method::Get), Some(&echo));
        assert_eq!(alias.target(Method::Post), None);
    }

    #[test]
    fn test_rebind_replaces_snapshot_wholesale() {
        let mut table = AliasTable::new();
        let v1 = EndpointRef::new("v1", "echo");
        let v2 = EndpointRef::new("v2", "echo");

        table.bind("/echo", &v1, [Method::Get, Method::Delete]);
        table.bind("/echo", &v2, [Method::Post]);

        let alias = table.get("/echo").expect("alias exists");
        assert_eq!(alias.methods().collect::<Vec<_>>(), vec![Method::Post]);
        assert_eq!(alias.target(Method::Post), Some(&v2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_rebind_keeps_enabled_flag() {
        let mut table = AliasTable::new();
        let echo = EndpointRef::new("v1", "echo");

        table.bind("/echo", &echo, [Method::Get]);
        table.get("/echo").expect("alias").set_enabled(false);
        table.bind("/echo", &echo, [Method::Get]);

        assert!(!table.get("/echo").expect("alias").is_enabled());
    }
}
