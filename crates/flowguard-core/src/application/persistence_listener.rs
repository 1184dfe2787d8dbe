//! Persistence lifecycle listener
//!
//! Decides at every lifecycle callback whether the active frame binds, reuses,
//! commits or releases a persistence handle. Two modes exist, chosen by the
//! root flow of the execution and inherited by every subflow:
//!
//! * [`PersistenceMode::HoldAcrossPauses`]: a persistence-context frame opens
//!   one handle with a long-running transaction, disconnects it on pause and
//!   reconnects it on resume. The root frame commits when it ends.
//! * [`PersistenceMode::CommitAndClear`]: every pause cycle gets a transient
//!   handle that is committed and closed when the frame pauses or ends.
//!
//! A handle already registered on the request for this listener's factory is
//! always reused instead of opening a second one.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use crate::{
    application::commit_and_clear::{
        BoundHandleTransactionRunner, CommitAndClear, TransactionRunner,
    },
    application::listener::FlowExecutionListener,
    domain::flow_definition::FlowDefinition,
    domain::flow_execution::{BoundHandle, FlowExecution, FlowSession, HandleOrigin, SessionOutcome},
    domain::persistence::{
        EntityInterceptor, FactoryId, FlushMode, HandleFactory, HandleOptions, SharedHandle,
    },
    domain::request_context::RequestContext,
    CoreError,
};

/// How handles live across pauses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    /// Keep one handle and transaction across pauses
    HoldAcrossPauses,
    /// Commit and close on every pause
    CommitAndClear,
}

impl PersistenceMode {
    /// Mode declared by a root flow definition
    pub fn of_root(root: &FlowDefinition) -> Self {
        if root.declares_commit_and_clear() {
            PersistenceMode::CommitAndClear
        } else {
            PersistenceMode::HoldAcrossPauses
        }
    }

    /// Mode of an execution, read from its root frame
    pub fn of_execution(execution: &FlowExecution) -> Result<Self, CoreError> {
        execution
            .root_session()
            .map(|root| Self::of_root(root.definition()))
            .ok_or_else(|| CoreError::NoActiveSession(execution.id.to_string()))
    }

    fn after_end(execution: &FlowExecution, ended: &FlowSession) -> Self {
        // once the root is popped the ended frame was the root
        let root = execution
            .root_session()
            .map(|root| root.definition())
            .unwrap_or_else(|| ended.definition());
        Self::of_root(root)
    }

    /// Whether this is commit-and-clear mode
    #[inline]
    pub fn is_commit_and_clear(self) -> bool {
        self == PersistenceMode::CommitAndClear
    }
}

/// Listener binding persistence handles to flow frames
pub struct PersistenceLifecycleListener {
    factory: Arc<dyn HandleFactory>,
    factory_id: FactoryId,
    options: HandleOptions,
    commit_and_clear: CommitAndClear,
    owns_runner: bool,
}

impl PersistenceLifecycleListener {
    /// Create a listener for `factory`, committing through a
    /// [`BoundHandleTransactionRunner`]
    pub fn new(factory: Arc<dyn HandleFactory>) -> Self {
        let runner = Self::default_runner(&factory, Self::handle_options());
        let mut listener = Self::with_transaction_runner(factory, runner);
        listener.owns_runner = true;
        listener
    }

    /// Create a listener committing through `runner`
    pub fn with_transaction_runner(
        factory: Arc<dyn HandleFactory>,
        runner: Arc<dyn TransactionRunner>,
    ) -> Self {
        let options = Self::handle_options();
        Self {
            factory_id: factory.factory_id(),
            commit_and_clear: CommitAndClear::new(factory.clone(), runner, options.clone()),
            factory,
            options,
            owns_runner: false,
        }
    }

    /// Pass `interceptor` to every handle this listener opens
    ///
    /// A runner supplied through [`Self::with_transaction_runner`] keeps its
    /// own options.
    pub fn with_entity_interceptor(mut self, interceptor: Arc<dyn EntityInterceptor>) -> Self {
        self.options.interceptor = Some(interceptor);
        self.commit_and_clear.set_options(self.options.clone());
        if self.owns_runner {
            let runner = Self::default_runner(&self.factory, self.options.clone());
            self.commit_and_clear.set_runner(runner);
        }
        self
    }

    fn handle_options() -> HandleOptions {
        HandleOptions {
            flush_mode: FlushMode::Manual,
            interceptor: None,
        }
    }

    fn default_runner(
        factory: &Arc<dyn HandleFactory>,
        options: HandleOptions,
    ) -> Arc<dyn TransactionRunner> {
        Arc::new(BoundHandleTransactionRunner::new(factory.clone()).with_options(options))
    }

    /// Factory whose registry slot this listener manages
    pub fn factory_id(&self) -> &FactoryId {
        &self.factory_id
    }

    fn registered(&self, cx: &RequestContext) -> Option<SharedHandle> {
        cx.handles().current(&self.factory_id).cloned()
    }

    /// Attach the already registered handle to the active frame
    fn reuse_registered(
        &self,
        cx: &RequestContext,
        execution: &mut FlowExecution,
        handle: SharedHandle,
        event: &'static str,
    ) -> Result<(), CoreError> {
        let execution_id = execution.id.clone();
        let frame = execution.require_active_session_mut()?;

        if frame.bound_handle().is_some() {
            trace!(
                request_id = %cx.id(),
                execution_id = %execution_id,
                frame = %frame.definition().id,
                event,
                "Frame scope already holds a handle"
            );
            return Ok(());
        }

        debug!(
            request_id = %cx.id(),
            execution_id = %execution_id,
            frame = %frame.definition().id,
            handle = %handle.id(),
            event,
            "Reusing registered persistence handle"
        );
        frame
            .scope_mut()
            .put_handle(BoundHandle::new(handle, HandleOrigin::Reused));
        Ok(())
    }

    /// Open a handle with a running transaction and bind it to the active frame
    async fn bind_new(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        let handle = self.factory.open_handle(&self.options).await?;
        if let Err(err) = handle.begin().await {
            warn!(
                request_id = %cx.id(),
                handle = %handle.id(),
                error = %err,
                "Begin failed on new persistence handle, closing it"
            );
            if let Err(close_err) = handle.close().await {
                error!(handle = %handle.id(), error = %close_err, "Close failed");
            }
            return Err(err);
        }

        let execution_id = execution.id.clone();
        let frame = execution.require_active_session_mut()?;
        debug!(
            request_id = %cx.id(),
            execution_id = %execution_id,
            frame = %frame.definition().id,
            handle = %handle.id(),
            "Binding new persistence handle to frame"
        );
        frame
            .scope_mut()
            .put_handle(BoundHandle::new(handle.clone(), HandleOrigin::Opened));

        cx.handles_mut().bind(self.factory_id.clone(), handle)
    }

    /// Unregister and disconnect without closing or ending the transaction
    async fn suspend(
        &self,
        cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<(), CoreError> {
        let unbound = cx.handles_mut().unbind(&self.factory_id);
        let attached = execution
            .active_session()
            .and_then(|frame| frame.bound_handle())
            .map(|bound| bound.handle.clone());

        match attached.or(unbound) {
            Some(handle) if handle.is_open() && handle.is_connected() => {
                debug!(
                    request_id = %cx.id(),
                    execution_id = %execution.id,
                    handle = %handle.id(),
                    "Disconnecting persistence handle"
                );
                handle.disconnect().await
            }
            _ => Ok(()),
        }
    }

    /// Reconnect and register the handle suspended in the active frame
    async fn restore(
        &self,
        cx: &mut RequestContext,
        execution: &FlowExecution,
    ) -> Result<(), CoreError> {
        let suspended = execution
            .active_session()
            .and_then(|frame| frame.bound_handle())
            .map(|bound| bound.handle.clone())
            .filter(|handle| handle.is_open());

        let Some(handle) = suspended else {
            trace!(
                request_id = %cx.id(),
                execution_id = %execution.id,
                "No suspended handle to restore"
            );
            return Ok(());
        };

        if !handle.is_connected() {
            handle.reconnect().await?;
        }
        debug!(
            request_id = %cx.id(),
            execution_id = %execution.id,
            handle = %handle.id(),
            "Restored suspended persistence handle"
        );
        cx.handles_mut().bind(self.factory_id.clone(), handle)
    }

    /// Commit (or roll back) the root frame's work and unregister its handle
    async fn finish_root(
        &self,
        cx: &mut RequestContext,
        execution: &FlowExecution,
        handle: &SharedHandle,
        outcome: &SessionOutcome,
    ) -> Result<(), CoreError> {
        if outcome.commit {
            if handle.in_transaction() {
                handle.commit().await?;
            } else {
                handle.flush().await?;
            }
        } else if handle.in_transaction() {
            handle.rollback().await?;
        }

        info!(
            request_id = %cx.id(),
            execution_id = %execution.id,
            handle = %handle.id(),
            outcome = %outcome.id,
            committed = outcome.commit,
            "Root flow ended, persistence work finished"
        );
        cx.handles_mut().unbind(&self.factory_id);
        Ok(())
    }

    /// Close the ended frame's handle and give the slot back to the parent
    async fn teardown(
        &self,
        cx: &mut RequestContext,
        execution: &FlowExecution,
        ended: &mut FlowSession,
    ) -> Result<(), CoreError> {
        if let Some(bound) = ended.scope_mut().take_handle() {
            if bound.handle.is_open() {
                debug!(
                    request_id = %cx.id(),
                    execution_id = %execution.id,
                    frame = %ended.definition().id,
                    handle = %bound.handle.id(),
                    "Closing persistence handle of ended frame"
                );
                bound.handle.close().await?;
            }
        }

        let parent_handle = execution
            .active_session()
            .and_then(|parent| parent.bound_handle())
            .map(|bound| bound.handle.clone())
            .filter(|handle| handle.is_open());

        if let Some(handle) = parent_handle {
            if !cx.handles().is_bound(&self.factory_id) {
                debug!(
                    request_id = %cx.id(),
                    execution_id = %execution.id,
                    handle = %handle.id(),
                    "Rebinding parent frame's persistence handle"
                );
                cx.handles_mut().bind(self.factory_id.clone(), handle)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FlowExecutionListener for PersistenceLifecycleListener {
    fn name(&self) -> &str {
        "persistence-lifecycle"
    }

    async fn session_starting(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        if let Some(handle) = self.registered(cx) {
            return self.reuse_registered(cx, execution, handle, "session_starting");
        }

        if PersistenceMode::of_execution(execution)?.is_commit_and_clear() {
            debug!(
                request_id = %cx.id(),
                execution_id = %execution.id,
                "session_starting: commit-and-clear pre"
            );
            return self.commit_and_clear.pre(cx, execution).await;
        }

        let persistent = execution
            .require_active_session()?
            .definition()
            .is_persistence_context();
        if persistent {
            self.bind_new(cx, execution).await
        } else {
            trace!(
                request_id = %cx.id(),
                execution_id = %execution.id,
                "session_starting: not a persistence context"
            );
            Ok(())
        }
    }

    async fn resuming(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        if let Some(handle) = self.registered(cx) {
            return self.reuse_registered(cx, execution, handle, "resuming");
        }

        if PersistenceMode::of_execution(execution)?.is_commit_and_clear() {
            debug!(
                request_id = %cx.id(),
                execution_id = %execution.id,
                "resuming: commit-and-clear pre"
            );
            self.commit_and_clear.pre(cx, execution).await
        } else {
            self.restore(cx, execution).await
        }
    }

    async fn paused(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        let persistent = execution
            .require_active_session()?
            .definition()
            .is_persistence_context();

        if persistent && PersistenceMode::of_execution(execution)?.is_commit_and_clear() {
            debug!(
                request_id = %cx.id(),
                execution_id = %execution.id,
                "paused: commit-and-clear post"
            );
            self.commit_and_clear.post(cx, execution).await
        } else {
            self.suspend(cx, execution).await
        }
    }

    async fn session_ending(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        outcome: &SessionOutcome,
    ) -> Result<(), CoreError> {
        let frame = execution.require_active_session()?;
        let Some(handle) = frame.bound_handle().map(|bound| bound.handle.clone()) else {
            return Ok(());
        };
        let is_root = frame.is_root();
        let mode = PersistenceMode::of_execution(execution)?;

        if mode.is_commit_and_clear() {
            debug!(
                request_id = %cx.id(),
                execution_id = %execution.id,
                "session_ending: commit-and-clear post"
            );
            return self.commit_and_clear.post(cx, execution).await;
        }

        if !is_root {
            // the handle belongs to an ancestor frame
            trace!(
                request_id = %cx.id(),
                execution_id = %execution.id,
                "session_ending: non-root frame, handle left to its owner"
            );
            return Ok(());
        }

        self.finish_root(cx, execution, &handle, outcome).await
    }

    async fn session_ended(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        ended: &mut FlowSession,
        _outcome: &SessionOutcome,
    ) -> Result<(), CoreError> {
        if !ended.definition().is_persistence_context() {
            return Ok(());
        }

        let still_registered = cx.handles().is_bound(&self.factory_id);
        let mode = PersistenceMode::after_end(execution, ended);
        if still_registered && !mode.is_commit_and_clear() {
            trace!(
                request_id = %cx.id(),
                execution_id = %execution.id,
                frame = %ended.definition().id,
                "session_ended: an ancestor still owns the registered handle"
            );
            return Ok(());
        }

        self.teardown(cx, execution, ended).await
    }
}
