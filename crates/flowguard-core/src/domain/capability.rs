//! Capability tags for collaborators
//!
//! Collaborators declare which contracts they fulfil through [`Capable`]. The
//! [`CapabilityResolver`] expands those declarations into the full transitive
//! set and memoizes the result per concrete type, so a decorator can report
//! exactly what the object it wraps offers.

use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::trace;

/// A contract a collaborator can fulfil
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// Look up executions by key
    ExecutionLookup,
    /// Store and remove executions
    ExecutionStore,
    /// Full execution repository, including key parsing
    ExecutionRepository,
    /// Issue continuation keys
    KeyFactory,
    /// Maintain execution snapshots
    SnapshotMaintenance,
}

impl Capability {
    /// Capabilities directly implied by this one
    pub fn implied(self) -> &'static [Capability] {
        match self {
            Capability::ExecutionRepository => {
                &[Capability::ExecutionLookup, Capability::ExecutionStore]
            }
            Capability::KeyFactory => &[Capability::SnapshotMaintenance],
            Capability::ExecutionLookup
            | Capability::ExecutionStore
            | Capability::SnapshotMaintenance => &[],
        }
    }
}

/// Resolved, transitive capability set
pub type CapabilitySet = BTreeSet<Capability>;

/// Implemented by every collaborator that can be wrapped or registered
pub trait Capable {
    /// Capabilities this type declares itself
    fn declared_capabilities(&self) -> &'static [Capability];
}

static SHARED_RESOLVER: Lazy<CapabilityResolver> = Lazy::new(CapabilityResolver::new);

/// Computes and memoizes transitive capability sets per concrete type
#[derive(Debug, Default)]
pub struct CapabilityResolver {
    cache: DashMap<TypeId, Arc<CapabilitySet>>,
}

impl CapabilityResolver {
    /// Create an empty resolver
    pub fn new() -> Self {
        Self {
            cache: DashMap::with_capacity(8),
        }
    }

    /// Process-wide resolver
    pub fn shared() -> &'static CapabilityResolver {
        &SHARED_RESOLVER
    }

    /// Full capability set of `target`, computed once per concrete type
    pub fn resolve<T: Capable + 'static>(&self, target: &T) -> Arc<CapabilitySet> {
        let type_id = TypeId::of::<T>();
        if let Some(found) = self.cache.get(&type_id) {
            return found.clone();
        }

        let resolved = Arc::new(Self::expand(target.declared_capabilities()));
        trace!(
            type_name = std::any::type_name::<T>(),
            capabilities = ?resolved,
            "Resolved capability set"
        );

        self.cache.entry(type_id).or_insert(resolved).clone()
    }

    /// Number of memoized types
    pub fn cached_types(&self) -> usize {
        self.cache.len()
    }

    fn expand(declared: &[Capability]) -> CapabilitySet {
        let mut found = CapabilitySet::new();
        let mut pending: Vec<Capability> = declared.to_vec();

        while let Some(capability) = pending.pop() {
            // visited set doubles as the result
            if found.insert(capability) {
                pending.extend_from_slice(capability.implied());
            }
        }

        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Repo;
    impl Capable for Repo {
        fn declared_capabilities(&self) -> &'static [Capability] {
            &[Capability::ExecutionRepository, Capability::KeyFactory]
        }
    }

    struct Lookup;
    impl Capable for Lookup {
        fn declared_capabilities(&self) -> &'static [Capability] {
            &[Capability::ExecutionLookup]
        }
    }

    #[test]
    fn test_transitive_closure() {
        let resolver = CapabilityResolver::new();
        let set = resolver.resolve(&Repo);

        let expected: CapabilitySet = [
            Capability::ExecutionLookup,
            Capability::ExecutionStore,
            Capability::ExecutionRepository,
            Capability::KeyFactory,
            Capability::SnapshotMaintenance,
        ]
        .into_iter()
        .collect();
        assert_eq!(*set, expected);
    }

    #[test]
    fn test_memoized_per_type() {
        let resolver = CapabilityResolver::new();
        let first = resolver.resolve(&Repo);
        let second = resolver.resolve(&Repo);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.cached_types(), 1);

        let lookup = resolver.resolve(&Lookup);
        assert_eq!(lookup.len(), 1);
        assert_eq!(resolver.cached_types(), 2);
    }

    #[test]
    fn test_shared_resolver() {
        let set = CapabilityResolver::shared().resolve(&Lookup);
        assert!(set.contains(&Capability::ExecutionLookup));
    }
}
