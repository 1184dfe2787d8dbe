use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use flowguard_core::{
    Capability, Capable, ContinuationKey, CoreError, FlowExecution, FlowExecutionId,
    FlowExecutionKeyFactory, FlowExecutionRepository, RequestContext,
};

/// Execution and snapshot numbers encoded in a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyParts {
    /// Execution sequence number
    pub execution: u64,
    /// Snapshot number within the execution
    pub snapshot: u64,
}

impl KeyParts {
    /// Render as `e<execution>s<snapshot>`
    pub fn to_key(self) -> ContinuationKey {
        ContinuationKey::new(format!("e{}s{}", self.execution, self.snapshot))
    }

    /// Parse `e<execution>s<snapshot>`
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let invalid = || CoreError::InvalidKey(raw.to_string());

        let body = raw.trim().strip_prefix('e').ok_or_else(invalid)?;
        let (execution, snapshot) = body.split_once('s').ok_or_else(invalid)?;

        Ok(Self {
            execution: execution.parse().map_err(|_| invalid())?,
            snapshot: snapshot.parse().map_err(|_| invalid())?,
        })
    }
}

/// In-memory implementation of the execution repository and key factory
///
/// Every generated key names a new snapshot of its execution. Snapshots are
/// stored by `put` / `update_snapshot` under the execution's current key.
pub struct InMemoryFlowExecutionRepository {
    snapshots: Arc<RwLock<HashMap<String, FlowExecution>>>,
    sequences: Arc<RwLock<HashMap<FlowExecutionId, KeyParts>>>,
    next_execution: AtomicU64,
    generated: AtomicUsize,
}

impl InMemoryFlowExecutionRepository {
    /// Create a new in-memory repository over shared snapshot storage
    pub fn new(snapshots: Arc<RwLock<HashMap<String, FlowExecution>>>) -> Self {
        Self {
            snapshots,
            sequences: Arc::new(RwLock::new(HashMap::new())),
            next_execution: AtomicU64::new(1),
            generated: AtomicUsize::new(0),
        }
    }

    /// Number of `generate_key` calls served
    pub fn generated_keys(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    /// Number of stored snapshots
    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }

    async fn store(&self, execution: &FlowExecution) -> Result<(), CoreError> {
        let key = execution.key().ok_or_else(|| {
            CoreError::InvalidKey(format!("execution {} has no key", execution.id))
        })?;

        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(key.as_str().to_string(), execution.clone());
        trace!(execution_id = %execution.id, key = %key, "Stored execution snapshot");
        Ok(())
    }

    async fn drop_snapshots(&self, execution: &FlowExecution) -> usize {
        let parts = self.sequences.read().await.get(&execution.id).copied();
        let Some(parts) = parts else {
            return 0;
        };

        let mut snapshots = self.snapshots.write().await;
        let before = snapshots.len();
        snapshots.retain(|key, _| {
            KeyParts::parse(key)
                .map(|stored| stored.execution != parts.execution)
                .unwrap_or(true)
        });
        before - snapshots.len()
    }
}

impl Default for InMemoryFlowExecutionRepository {
    fn default() -> Self {
        Self::new(Arc::new(RwLock::new(HashMap::new())))
    }
}

impl Capable for InMemoryFlowExecutionRepository {
    fn declared_capabilities(&self) -> &'static [Capability] {
        &[Capability::ExecutionRepository, Capability::KeyFactory]
    }
}

#[async_trait]
impl FlowExecutionRepository for InMemoryFlowExecutionRepository {
    async fn parse_key(
        &self,
        _cx: &mut RequestContext,
        raw: &str,
    ) -> Result<ContinuationKey, CoreError> {
        KeyParts::parse(raw).map(KeyParts::to_key)
    }

    async fn lookup(
        &self,
        _cx: &mut RequestContext,
        key: &ContinuationKey,
    ) -> Result<FlowExecution, CoreError> {
        let snapshots = self.snapshots.read().await;
        snapshots
            .get(key.as_str())
            .cloned()
            .ok_or_else(|| CoreError::ExecutionNotFound(key.to_string()))
    }

    async fn put(
        &self,
        _cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<(), CoreError> {
        self.store(execution).await
    }

    async fn remove(
        &self,
        _cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<(), CoreError> {
        let dropped = self.drop_snapshots(execution).await;
        self.sequences.write().await.remove(&execution.id);
        debug!(execution_id = %execution.id, snapshots = dropped, "Removed flow execution");
        Ok(())
    }
}

#[async_trait]
impl FlowExecutionKeyFactory for InMemoryFlowExecutionRepository {
    async fn generate_key(
        &self,
        _cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<ContinuationKey, CoreError> {
        self.generated.fetch_add(1, Ordering::SeqCst);

        let mut sequences = self.sequences.write().await;
        let parts = sequences
            .entry(execution.id.clone())
            .and_modify(|parts| parts.snapshot += 1)
            .or_insert_with(|| KeyParts {
                execution: self.next_execution.fetch_add(1, Ordering::SeqCst),
                snapshot: 1,
            });

        let key = parts.to_key();
        debug!(execution_id = %execution.id, key = %key, "Generated continuation key");
        Ok(key)
    }

    async fn update_snapshot(
        &self,
        _cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<(), CoreError> {
        self.store(execution).await
    }

    async fn remove_snapshots(
        &self,
        _cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<(), CoreError> {
        let dropped = self.drop_snapshots(execution).await;
        debug!(execution_id = %execution.id, snapshots = dropped, "Removed execution snapshots");
        Ok(())
    }
}
