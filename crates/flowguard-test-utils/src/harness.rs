//! Drives flow executions through their lifecycle the way a host engine does.
//!
//! Each method corresponds to one engine step and notifies the listeners the
//! loader returns for the execution's root flow, in the order the engine
//! would. A failing listener is reported through `exception_thrown` before
//! the error is returned.

use std::sync::Arc;
use tracing::{debug, warn};

use flowguard_core::{
    ContinuationKey, CoreError, FlowDefinition, FlowExecution, FlowExecutionKeyFactory,
    FlowExecutionListener, FlowExecutionRepository, FlowSession, ListenerChain, ListenerLoader,
    RequestContext, SessionOutcome, StaticListenerLoader, TransitionDefinition,
};
use flowguard_state_inmemory::Collaborators;

/// Lifecycle driver over a listener loader and the key collaborators
pub struct FlowHarness {
    loader: Arc<dyn ListenerLoader>,
    repository: Arc<dyn FlowExecutionRepository>,
    key_factory: Arc<dyn FlowExecutionKeyFactory>,
}

impl FlowHarness {
    /// Create a harness
    pub fn new(
        loader: Arc<dyn ListenerLoader>,
        repository: Arc<dyn FlowExecutionRepository>,
        key_factory: Arc<dyn FlowExecutionKeyFactory>,
    ) -> Self {
        Self {
            loader,
            repository,
            key_factory,
        }
    }

    /// Harness over in-memory collaborators with a fixed listener list
    pub fn with_listeners(
        listeners: Vec<Arc<dyn FlowExecutionListener>>,
        collaborators: &Collaborators,
    ) -> Self {
        Self::new(
            Arc::new(StaticListenerLoader::new(listeners)),
            collaborators.repository.clone(),
            collaborators.key_factory.clone(),
        )
    }

    /// The execution repository
    pub fn repository(&self) -> &Arc<dyn FlowExecutionRepository> {
        &self.repository
    }

    /// The key factory
    pub fn key_factory(&self) -> &Arc<dyn FlowExecutionKeyFactory> {
        &self.key_factory
    }

    fn chain_for(&self, execution: &FlowExecution) -> ListenerChain {
        match execution.root_session() {
            Some(root) => self.loader.chain(root.definition()),
            None => ListenerChain::default(),
        }
    }

    async fn report(
        chain: &ListenerChain,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        err: CoreError,
    ) -> CoreError {
        if let Err(secondary) = chain.exception_thrown(cx, execution, &err).await {
            warn!(error = %secondary, "Listener failed while handling an exception");
        }
        err
    }

    /// Create an execution and start its root session
    pub async fn start(
        &self,
        cx: &mut RequestContext,
        definition: FlowDefinition,
    ) -> Result<FlowExecution, CoreError> {
        let mut execution = FlowExecution::new();
        execution.start(Arc::new(definition))?;
        let chain = self.chain_for(&execution);
        debug!(
            request_id = %cx.id(),
            execution_id = %execution.id,
            listeners = chain.len(),
            "Starting execution"
        );

        let result = async {
            chain.request_submitted(cx, &mut execution).await?;
            chain.session_starting(cx, &mut execution).await?;
            chain.session_started(cx, &mut execution).await
        }
        .await;

        match result {
            Ok(()) => Ok(execution),
            Err(err) => Err(Self::report(&chain, cx, &mut execution, err).await),
        }
    }

    /// Push and start a subflow session
    pub async fn spawn_subflow(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        definition: FlowDefinition,
    ) -> Result<(), CoreError> {
        execution.spawn_subflow(Arc::new(definition))?;
        let chain = self.chain_for(execution);

        let result = async {
            chain.session_starting(cx, execution).await?;
            chain.session_started(cx, execution).await
        }
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(err) => Err(Self::report(&chain, cx, execution, err).await),
        }
    }

    /// Execute a transition from `from` into the transition's target state
    pub async fn transition(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        from: &str,
        transition: &TransitionDefinition,
    ) -> Result<(), CoreError> {
        let chain = self.chain_for(execution);

        let result = async {
            chain.transition_executing(cx, execution, transition).await?;
            chain
                .state_entered(cx, execution, Some(from), &transition.to)
                .await
        }
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(err) => Err(Self::report(&chain, cx, execution, err).await),
        }
    }

    /// Pause the execution and store a snapshot under a fresh key
    pub async fn pause(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<ContinuationKey, CoreError> {
        let chain = self.chain_for(execution);

        if let Err(err) = chain.paused(cx, execution).await {
            return Err(Self::report(&chain, cx, execution, err).await);
        }
        execution.pause()?;

        let key = self.key_factory.generate_key(cx, execution).await?;
        execution.assign_key(key.clone());
        self.repository.put(cx, execution).await?;

        debug!(request_id = %cx.id(), execution_id = %execution.id, key = %key, "Execution paused");
        Ok(key)
    }

    /// Restore the execution stored under `raw_key` and resume it
    pub async fn resume(
        &self,
        cx: &mut RequestContext,
        raw_key: &str,
    ) -> Result<FlowExecution, CoreError> {
        let key = self.repository.parse_key(cx, raw_key).await?;
        let mut execution = self.repository.lookup(cx, &key).await?;
        execution.resume()?;
        let chain = self.chain_for(&execution);

        let result = async {
            chain.request_submitted(cx, &mut execution).await?;
            chain.resuming(cx, &mut execution).await
        }
        .await;

        match result {
            Ok(()) => Ok(execution),
            Err(err) => Err(Self::report(&chain, cx, &mut execution, err).await),
        }
    }

    /// End the active session; removes the execution once its root ended
    pub async fn end_active(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        outcome: SessionOutcome,
    ) -> Result<FlowSession, CoreError> {
        // resolved before the root can be popped
        let chain = self.chain_for(execution);

        if let Err(err) = chain.session_ending(cx, execution, &outcome).await {
            return Err(Self::report(&chain, cx, execution, err).await);
        }

        let mut ended = execution.end_active_session()?;
        if let Err(err) = chain
            .session_ended(cx, execution, &mut ended, &outcome)
            .await
        {
            return Err(Self::report(&chain, cx, execution, err).await);
        }

        if !execution.is_active() && execution.key().is_some() {
            self.repository.remove(cx, execution).await?;
        }
        Ok(ended)
    }

    /// Signal the end of request processing
    pub async fn finish_request(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        let chain = self.chain_for(execution);
        chain.request_processed(cx, execution).await
    }
}
