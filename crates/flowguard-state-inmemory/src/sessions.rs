//! In-memory persistence handles
//!
//! A [`MemorySession`] buffers writes and only applies them to the shared
//! [`MemoryStore`] when flushed, which in [`FlushMode::Manual`] happens on
//! commit or an explicit flush.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use flowguard_core::{
    CoreError, EntityInterceptor, FactoryId, FlushMode, HandleFactory, HandleId, HandleOptions,
    PersistenceHandle, SharedHandle,
};

/// Committed entity state shared by all sessions of one factory
#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed value of an entity
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.entities.read().await.get(key).cloned()
    }

    /// Number of committed entities
    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    /// Whether nothing was committed yet
    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }

    async fn apply(&self, writes: Vec<(String, Option<Value>)>) {
        let mut entities = self.entities.write().await;
        for (key, value) in writes {
            match value {
                Some(value) => {
                    entities.insert(key, value);
                }
                None => {
                    entities.remove(&key);
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    closed: bool,
    connected: bool,
    in_transaction: bool,
    pending: Vec<(String, Option<Value>)>,
}

/// A persistence handle over a [`MemoryStore`]
pub struct MemorySession {
    id: HandleId,
    factory_id: FactoryId,
    store: Arc<MemoryStore>,
    flush_mode: FlushMode,
    interceptor: Option<Arc<dyn EntityInterceptor>>,
    state: Mutex<SessionState>,
}

impl fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySession")
            .field("id", &self.id)
            .field("factory_id", &self.factory_id)
            .field("flush_mode", &self.flush_mode)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl MemorySession {
    fn new(
        id: HandleId,
        factory_id: FactoryId,
        store: Arc<MemoryStore>,
        options: &HandleOptions,
    ) -> Self {
        Self {
            id,
            factory_id,
            store,
            flush_mode: options.flush_mode,
            interceptor: options.interceptor.clone(),
            state: Mutex::new(SessionState {
                connected: true,
                ..SessionState::default()
            }),
        }
    }

    /// Flush mode the session was opened with
    pub fn flush_mode(&self) -> FlushMode {
        self.flush_mode
    }

    /// Number of buffered, unflushed writes
    pub fn pending_writes(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Buffer a write of `value` under `key`
    pub async fn save(&self, key: impl Into<String>, value: Value) -> Result<(), CoreError> {
        self.write(key.into(), Some(value)).await
    }

    /// Buffer a delete of `key`
    pub async fn delete(&self, key: impl Into<String>) -> Result<(), CoreError> {
        self.write(key.into(), None).await
    }

    /// Value of `key` as seen by this session, pending writes included
    pub async fn load(&self, key: &str) -> Result<Option<Value>, CoreError> {
        let pending = {
            let state = self.state.lock();
            self.ensure_usable(&state)?;
            state
                .pending
                .iter()
                .rev()
                .find(|(pending_key, _)| pending_key == key)
                .map(|(_, value)| value.clone())
        };

        match pending {
            Some(value) => Ok(value),
            None => Ok(self.store.get(key).await),
        }
    }

    async fn write(&self, key: String, value: Option<Value>) -> Result<(), CoreError> {
        {
            let mut state = self.state.lock();
            self.ensure_usable(&state)?;
            state.pending.push((key, value));
        }

        if self.flush_mode == FlushMode::Auto {
            self.flush().await?;
        }
        Ok(())
    }

    fn ensure_usable(&self, state: &SessionState) -> Result<(), CoreError> {
        if state.closed {
            return Err(CoreError::HandleClosed(self.id.to_string()));
        }
        if !state.connected {
            return Err(CoreError::Repository(format!(
                "Persistence handle disconnected: {}",
                self.id
            )));
        }
        Ok(())
    }

    fn take_pending(&self) -> Result<Vec<(String, Option<Value>)>, CoreError> {
        let mut state = self.state.lock();
        self.ensure_usable(&state)?;
        Ok(std::mem::take(&mut state.pending))
    }

    async fn push_pending(&self, writes: Vec<(String, Option<Value>)>) {
        let count = writes.len();
        if count == 0 {
            return;
        }

        self.store.apply(writes).await;
        trace!(handle = %self.id, entities = count, "Flushed pending writes");

        if let Some(interceptor) = &self.interceptor {
            interceptor.on_flush(&self.id, count);
        }
    }
}

#[async_trait]
impl PersistenceHandle for MemorySession {
    fn id(&self) -> &HandleId {
        &self.id
    }

    fn factory_id(&self) -> &FactoryId {
        &self.factory_id
    }

    fn is_open(&self) -> bool {
        !self.state.lock().closed
    }

    fn is_connected(&self) -> bool {
        let state = self.state.lock();
        !state.closed && state.connected
    }

    fn in_transaction(&self) -> bool {
        self.state.lock().in_transaction
    }

    async fn begin(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        self.ensure_usable(&state)?;
        if state.in_transaction {
            return Err(CoreError::Transaction(format!(
                "Transaction already active on {}",
                self.id
            )));
        }
        state.in_transaction = true;
        Ok(())
    }

    async fn commit(&self) -> Result<(), CoreError> {
        let writes = {
            let mut state = self.state.lock();
            self.ensure_usable(&state)?;
            if !state.in_transaction {
                return Err(CoreError::Transaction(format!(
                    "No active transaction on {}",
                    self.id
                )));
            }
            state.in_transaction = false;
            std::mem::take(&mut state.pending)
        };

        self.push_pending(writes).await;
        debug!(handle = %self.id, "Committed transaction");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(CoreError::HandleClosed(self.id.to_string()));
        }
        let discarded = state.pending.len();
        state.pending.clear();
        state.in_transaction = false;
        debug!(handle = %self.id, discarded, "Rolled back transaction");
        Ok(())
    }

    async fn flush(&self) -> Result<(), CoreError> {
        let writes = self.take_pending()?;
        self.push_pending(writes).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(CoreError::HandleClosed(self.id.to_string()));
        }
        state.connected = false;
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(CoreError::HandleClosed(self.id.to_string()));
        }
        state.connected = true;
        Ok(())
    }

    async fn close(&self) -> Result<(), CoreError> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        if !state.pending.is_empty() {
            warn!(
                handle = %self.id,
                discarded = state.pending.len(),
                "Closing handle with unflushed writes"
            );
            state.pending.clear();
        }
        state.closed = true;
        state.in_transaction = false;
        debug!(handle = %self.id, "Closed persistence handle");
        Ok(())
    }
}

/// Handle factory producing [`MemorySession`]s over one [`MemoryStore`]
pub struct MemorySessionFactory {
    id: FactoryId,
    store: Arc<MemoryStore>,
    sequence: AtomicUsize,
    sessions: Mutex<Vec<Arc<MemorySession>>>,
}

impl MemorySessionFactory {
    /// Create a factory over `store`
    pub fn new(id: impl Into<String>, store: Arc<MemoryStore>) -> Self {
        Self {
            id: FactoryId(id.into()),
            store,
            sequence: AtomicUsize::new(0),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// The backing store
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Number of handles opened so far
    pub fn opened_count(&self) -> usize {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Number of opened handles not yet closed
    pub fn open_count(&self) -> usize {
        self.sessions
            .lock()
            .iter()
            .filter(|session| session.is_open())
            .count()
    }

    /// A handle opened by this factory
    pub fn session(&self, id: &HandleId) -> Option<Arc<MemorySession>> {
        self.sessions
            .lock()
            .iter()
            .find(|session| &session.id == id)
            .cloned()
    }

    /// Every handle opened by this factory, oldest first
    pub fn sessions(&self) -> Vec<Arc<MemorySession>> {
        self.sessions.lock().clone()
    }
}

#[async_trait]
impl HandleFactory for MemorySessionFactory {
    fn factory_id(&self) -> FactoryId {
        self.id.clone()
    }

    async fn open_handle(&self, options: &HandleOptions) -> Result<SharedHandle, CoreError> {
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(MemorySession::new(
            HandleId(format!("{}-{}", self.id, n)),
            self.id.clone(),
            self.store.clone(),
            options,
        ));

        debug!(
            factory = %self.id,
            handle = %session.id,
            flush_mode = ?options.flush_mode,
            "Opened persistence handle"
        );
        self.sessions.lock().push(session.clone());
        Ok(session)
    }
}
