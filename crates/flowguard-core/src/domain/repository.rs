//! Repository traits for flow executions
//!
//! These are the collaborator contracts the host engine uses to store paused
//! executions and to issue continuation keys for them. External crates
//! implement them to provide different storage mechanisms; every method
//! receives the current [`RequestContext`] so decorators can keep
//! request-bound state without thread-locals.

use async_trait::async_trait;

use super::capability::Capable;
use super::flow_execution::{ContinuationKey, FlowExecution};
use super::request_context::RequestContext;
use crate::CoreError;

/// Repository for flow executions
#[async_trait]
pub trait FlowExecutionRepository: Capable + Send + Sync {
    /// Parse the external form of a continuation key
    async fn parse_key(
        &self,
        cx: &mut RequestContext,
        raw: &str,
    ) -> Result<ContinuationKey, CoreError>;

    /// Load the execution stored under `key`
    async fn lookup(
        &self,
        cx: &mut RequestContext,
        key: &ContinuationKey,
    ) -> Result<FlowExecution, CoreError>;

    /// Store an execution under its current key
    async fn put(&self, cx: &mut RequestContext, execution: &FlowExecution)
        -> Result<(), CoreError>;

    /// Remove an execution and everything stored for it
    async fn remove(
        &self,
        cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<(), CoreError>;
}

/// Issues continuation keys and maintains execution snapshots
#[async_trait]
pub trait FlowExecutionKeyFactory: Capable + Send + Sync {
    /// Issue the key identifying the next snapshot of `execution`
    async fn generate_key(
        &self,
        cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<ContinuationKey, CoreError>;

    /// Overwrite the snapshot stored under the execution's current key
    async fn update_snapshot(
        &self,
        cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<(), CoreError>;

    /// Drop every snapshot of `execution`
    async fn remove_snapshots(
        &self,
        cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<(), CoreError>;
}
