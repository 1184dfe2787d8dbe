//! Continuation key consistency proxy
//!
//! During one interactive request several code paths may ask the key factory
//! for the key of the same execution. [`KeyConsistencyProxy`] wraps the
//! repository / key factory and makes all of them observe the same key:
//!
//! * `parse_key` clears the request key cache before delegating, whatever the
//!   delegate returns;
//! * `generate_key` on an interactive request returns the cached key when one
//!   exists, otherwise delegates and caches a valid result.
//!
//! Every other call passes straight through.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::{
    domain::capability::{Capability, CapabilityResolver, CapabilitySet, Capable},
    domain::flow_execution::{ContinuationKey, FlowExecution},
    domain::repository::{FlowExecutionKeyFactory, FlowExecutionRepository},
    domain::request_context::RequestContext,
    CoreError,
};

/// Decorator keeping continuation keys consistent within one request
#[derive(Debug)]
pub struct KeyConsistencyProxy<T> {
    inner: T,
}

impl<T: Capable + 'static> KeyConsistencyProxy<T> {
    /// Wrap a repository and/or key factory
    pub fn wrap(inner: T) -> Self {
        Self { inner }
    }

    /// Wrap into a shared handle usable as either collaborator trait object
    pub fn shared(inner: T) -> Arc<Self> {
        Arc::new(Self::wrap(inner))
    }

    /// Full capability set of the wrapped object
    pub fn capabilities(&self) -> Arc<CapabilitySet> {
        CapabilityResolver::shared().resolve(&self.inner)
    }

    /// The wrapped object
    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Unwrap the decorator
    pub fn into_inner(self) -> T {
        self.inner
    }
}

/// Whether an object exposing `capabilities` must be wrapped at wiring time
pub fn should_intercept(capabilities: &CapabilitySet) -> bool {
    capabilities.contains(&Capability::ExecutionRepository)
        || capabilities.contains(&Capability::KeyFactory)
}

impl<T: Capable> Capable for KeyConsistencyProxy<T> {
    fn declared_capabilities(&self) -> &'static [Capability] {
        self.inner.declared_capabilities()
    }
}

#[async_trait]
impl<T> FlowExecutionRepository for KeyConsistencyProxy<T>
where
    T: FlowExecutionRepository,
{
    async fn parse_key(
        &self,
        cx: &mut RequestContext,
        raw: &str,
    ) -> Result<ContinuationKey, CoreError> {
        if let Some(stale) = cx.key_cache_mut().clear() {
            debug!(request_id = %cx.id(), key = %stale, "Cleared cached continuation key");
        }
        self.inner.parse_key(cx, raw).await
    }

    async fn lookup(
        &self,
        cx: &mut RequestContext,
        key: &ContinuationKey,
    ) -> Result<FlowExecution, CoreError> {
        self.inner.lookup(cx, key).await
    }

    async fn put(
        &self,
        cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<(), CoreError> {
        self.inner.put(cx, execution).await
    }

    async fn remove(
        &self,
        cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<(), CoreError> {
        self.inner.remove(cx, execution).await
    }
}

#[async_trait]
impl<T> FlowExecutionKeyFactory for KeyConsistencyProxy<T>
where
    T: FlowExecutionKeyFactory,
{
    async fn generate_key(
        &self,
        cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<ContinuationKey, CoreError> {
        if !cx.is_interactive() {
            return self.inner.generate_key(cx, execution).await;
        }

        if let Some(cached) = cx.key_cache().get() {
            trace!(
                request_id = %cx.id(),
                execution_id = %execution.id,
                key = %cached,
                "Returning cached continuation key"
            );
            return Ok(cached.clone());
        }

        let key = self.inner.generate_key(cx, execution).await?;
        if key.is_valid() {
            debug!(
                request_id = %cx.id(),
                execution_id = %execution.id,
                key = %key,
                "Caching continuation key for request"
            );
            cx.key_cache_mut().store(key.clone());
        }
        Ok(key)
    }

    async fn update_snapshot(
        &self,
        cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<(), CoreError> {
        self.inner.update_snapshot(cx, execution).await
    }

    async fn remove_snapshots(
        &self,
        cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<(), CoreError> {
        self.inner.remove_snapshots(cx, execution).await
    }
}
