//! Persistence handle abstractions
//!
//! A persistence handle is a database session / unit of work. Handles are
//! produced by exactly one [`HandleFactory`] backend selected at startup, and a
//! request may register at most one live handle per factory at a time (see
//! `HandleRegistry`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::sync::Arc;

use crate::CoreError;

/// Value object: identifies a handle factory (the registry key)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactoryId(pub String);

impl fmt::Display for FactoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value object: identifies a single opened handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(pub String);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// When pending writes reach the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlushMode {
    /// Only on explicit flush or transaction commit
    #[default]
    Manual,
    /// After every write
    Auto,
}

/// Hook invoked by backends whenever a handle flushes
pub trait EntityInterceptor: Send + Sync {
    /// Called after `entities` pending writes were flushed by `handle`
    fn on_flush(&self, handle: &HandleId, entities: usize);
}

/// Options applied when a handle is opened
#[derive(Clone, Default)]
pub struct HandleOptions {
    /// Flush mode of the new handle
    pub flush_mode: FlushMode,

    /// Optional entity interceptor
    pub interceptor: Option<Arc<dyn EntityInterceptor>>,
}

impl Debug for HandleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleOptions")
            .field("flush_mode", &self.flush_mode)
            .field("interceptor", &self.interceptor.is_some())
            .finish()
    }
}

/// A live database session
#[async_trait]
pub trait PersistenceHandle: Send + Sync + Debug {
    /// Handle identifier
    fn id(&self) -> &HandleId;

    /// Factory that produced this handle
    fn factory_id(&self) -> &FactoryId;

    /// False once the handle has been closed
    fn is_open(&self) -> bool;

    /// False while the handle is disconnected between requests
    fn is_connected(&self) -> bool;

    /// Whether a transaction is in progress
    fn in_transaction(&self) -> bool;

    /// Begin a transaction
    async fn begin(&self) -> Result<(), CoreError>;

    /// Commit the current transaction, flushing pending writes
    async fn commit(&self) -> Result<(), CoreError>;

    /// Roll back the current transaction, discarding pending writes
    async fn rollback(&self) -> Result<(), CoreError>;

    /// Push pending writes to the store
    async fn flush(&self) -> Result<(), CoreError>;

    /// Release the underlying connection, keeping the transaction and pending writes
    async fn disconnect(&self) -> Result<(), CoreError>;

    /// Reacquire a connection after `disconnect`
    async fn reconnect(&self) -> Result<(), CoreError>;

    /// Close the handle; closing twice is a no-op
    async fn close(&self) -> Result<(), CoreError>;
}

/// Shared reference to a handle, stored in frame scopes and the registry
pub type SharedHandle = Arc<dyn PersistenceHandle>;

/// Opens persistence handles for one backend
#[async_trait]
pub trait HandleFactory: Send + Sync {
    /// Identifier used as the registry key
    fn factory_id(&self) -> FactoryId;

    /// Open a new handle
    async fn open_handle(&self, options: &HandleOptions) -> Result<SharedHandle, CoreError>;
}
