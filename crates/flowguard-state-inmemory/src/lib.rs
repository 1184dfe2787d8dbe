//! In-memory backend for FlowGuard
//!
//! This crate provides in-memory implementations of the collaborator
//! interfaces defined in the flowguard-core crate: an execution repository
//! that is also the key factory, and a handle factory producing buffered
//! sessions over a shared store. It is primarily useful for development,
//! testing, and single-process deployments.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub mod repositories;
pub use repositories::{InMemoryFlowExecutionRepository, KeyParts};

pub mod sessions;
pub use sessions::{MemorySession, MemorySessionFactory, MemoryStore};

use flowguard_core::{
    should_intercept, CapabilityResolver, FlowExecution, FlowExecutionKeyFactory,
    FlowExecutionRepository, KeyConsistencyProxy,
};

/// Default identifier of the in-memory handle factory
pub const DEFAULT_FACTORY_ID: &str = "memory";

/// Collaborators wired by [`InMemoryPersistenceProvider`]
#[derive(Clone)]
pub struct Collaborators {
    /// Execution repository
    pub repository: Arc<dyn FlowExecutionRepository>,

    /// Continuation key factory
    pub key_factory: Arc<dyn FlowExecutionKeyFactory>,

    /// Persistence handle factory
    pub handle_factory: Arc<MemorySessionFactory>,
}

/// Provider for the in-memory backend
pub struct InMemoryPersistenceProvider {
    // Shared storage for execution snapshots
    snapshots: Arc<RwLock<HashMap<String, FlowExecution>>>,

    // Shared entity store behind every handle
    store: Arc<MemoryStore>,

    factory_id: String,
}

impl InMemoryPersistenceProvider {
    /// Create a new in-memory provider
    pub fn new() -> Self {
        Self::with_factory_id(DEFAULT_FACTORY_ID)
    }

    /// Create a provider whose handle factory uses `factory_id`
    pub fn with_factory_id(factory_id: impl Into<String>) -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            store: Arc::new(MemoryStore::new()),
            factory_id: factory_id.into(),
        }
    }

    /// The entity store shared by all handles
    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    /// Wire the collaborators, wrapping key-issuing ones for consistency
    pub fn create_collaborators(&self) -> Collaborators {
        let repository = InMemoryFlowExecutionRepository::new(self.snapshots.clone());
        let handle_factory = Arc::new(MemorySessionFactory::new(
            self.factory_id.clone(),
            self.store.clone(),
        ));

        let capabilities = CapabilityResolver::shared().resolve(&repository);
        let (repository, key_factory) = if should_intercept(&capabilities) {
            let proxy = KeyConsistencyProxy::shared(repository);
            let as_repository: Arc<dyn FlowExecutionRepository> = proxy.clone();
            let as_key_factory: Arc<dyn FlowExecutionKeyFactory> = proxy;
            (as_repository, as_key_factory)
        } else {
            let plain = Arc::new(repository);
            let as_repository: Arc<dyn FlowExecutionRepository> = plain.clone();
            let as_key_factory: Arc<dyn FlowExecutionKeyFactory> = plain;
            (as_repository, as_key_factory)
        };
        debug!(capabilities = ?capabilities, "Wired in-memory execution repository");

        Collaborators {
            repository,
            key_factory,
            handle_factory,
        }
    }
}

impl Default for InMemoryPersistenceProvider {
    fn default() -> Self {
        Self::new()
    }
}
