//! Authorization seam for file-system sessions.
//!
//! Token resolution is an external concern; the core only needs to ask
//! "does this token allow this capability in this namespace". A
//! resolver answering `None` means ACLs are disabled on the node and
//! every request is allowed.

use std::collections::{HashMap, HashSet};

use crate::error::Result;

/// Namespace capabilities the file-system endpoints check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Read files of an allocation directory.
    ReadFs,
    /// Read task logs.
    ReadLogs,
}

/// The capability set resolved from one token.
#[derive(Debug, Clone, Default)]
pub struct AclSnapshot {
    management: bool,
    namespaces: HashMap<String, HashSet<Capability>>,
}

impl AclSnapshot {
    /// An empty snapshot that allows nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A management snapshot that allows everything.
    #[must_use]
    pub fn management() -> Self {
        Self {
            management: true,
            namespaces: HashMap::new(),
        }
    }

    /// Grants `capability` in `namespace`.
    #[must_use]
    pub fn allow(mut self, namespace: impl Into<String>, capability: Capability) -> Self {
        self.namespaces
            .entry(namespace.into())
            .or_default()
            .insert(capability);
        self
    }

    /// Returns true when the snapshot grants `capability` in
    /// `namespace`.
    #[must_use]
    pub fn allows(&self, namespace: &str, capability: Capability) -> bool {
        if self.management {
            return true;
        }
        self.namespaces
            .get(namespace)
            .is_some_and(|caps| caps.contains(&capability))
    }
}

/// Resolves auth tokens into capability snapshots.
pub trait TokenResolver: Send + Sync {
    /// Resolves `token`. `Ok(None)` means ACLs are disabled and the
    /// request is allowed.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be resolved.
    fn resolve_token(&self, token: &str) -> Result<Option<AclSnapshot>>;
}

/// Resolver for nodes running without ACLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct AclDisabled;

impl TokenResolver for AclDisabled {
    fn resolve_token(&self, _token: &str) -> Result<Option<AclSnapshot>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_denies() {
        let acl = AclSnapshot::new();
        assert!(!acl.allows("default", Capability::ReadFs));
        assert!(!acl.allows("default", Capability::ReadLogs));
    }

    #[test]
    fn management_snapshot_allows_everything() {
        let acl = AclSnapshot::management();
        assert!(acl.allows("default", Capability::ReadFs));
        assert!(acl.allows("other", Capability::ReadLogs));
    }

    #[test]
    fn grants_are_scoped_to_namespace_and_capability() {
        let acl = AclSnapshot::new().allow("default", Capability::ReadFs);
        assert!(acl.allows("default", Capability::ReadFs));
        assert!(!acl.allows("default", Capability::ReadLogs));
        assert!(!acl.allows("other", Capability::ReadFs));
    }

    #[test]
    fn disabled_resolver_returns_none() {
        let resolved = AclDisabled.resolve_token("anything").unwrap();
        assert!(resolved.is_none());
    }
}
