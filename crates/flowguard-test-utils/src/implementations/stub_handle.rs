//! Counting persistence handle for tests that do not need a backing store.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use flowguard_core::{CoreError, FactoryId, HandleId, PersistenceHandle};

/// Persistence handle that only counts calls
#[derive(Debug)]
pub struct StubHandle {
    id: HandleId,
    factory_id: FactoryId,
    open: AtomicBool,
    connected: AtomicBool,
    in_transaction: AtomicBool,
    fail_begin: bool,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    flushes: AtomicUsize,
    closes: AtomicUsize,
}

impl StubHandle {
    /// Open, connected handle
    pub fn new(id: impl Into<String>, factory_id: impl Into<String>) -> Self {
        Self {
            id: HandleId(id.into()),
            factory_id: FactoryId(factory_id.into()),
            open: AtomicBool::new(true),
            connected: AtomicBool::new(true),
            in_transaction: AtomicBool::new(false),
            fail_begin: false,
            commits: AtomicUsize::new(0),
            rollbacks: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Make `begin` fail
    pub fn failing_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    /// Number of commits
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of rollbacks
    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Number of explicit flushes
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Number of close calls, repeated ones included
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceHandle for StubHandle {
    fn id(&self) -> &HandleId {
        &self.id
    }

    fn factory_id(&self) -> &FactoryId {
        &self.factory_id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.is_open() && self.connected.load(Ordering::SeqCst)
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    async fn begin(&self) -> Result<(), CoreError> {
        if self.fail_begin {
            return Err(CoreError::Transaction(format!("begin refused by {}", self.id)));
        }
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<(), CoreError> {
        self.in_transaction.store(false, Ordering::SeqCst);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), CoreError> {
        self.in_transaction.store(false, Ordering::SeqCst);
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&self) -> Result<(), CoreError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CoreError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), CoreError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), CoreError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }
}
