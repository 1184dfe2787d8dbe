//! Flow execution listener contract
//!
//! The host engine notifies listeners at every lifecycle point of a flow
//! execution. Listeners are resolved per flow definition through a
//! [`ListenerLoader`] and invoked through a [`ListenerChain`].

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

use crate::{
    domain::flow_definition::{FlowDefinition, TransitionDefinition},
    domain::flow_execution::{FlowExecution, FlowSession, SessionOutcome},
    domain::request_context::RequestContext,
    CoreError,
};

/// Callbacks invoked by the host engine during a flow execution
///
/// Every callback defaults to a no-op. `session_starting` runs after the new
/// session was pushed, so the active session is the one starting.
/// `session_ending` runs while the ending session is still active;
/// `session_ended` runs after it was popped and receives it by reference.
#[async_trait]
pub trait FlowExecutionListener: Send + Sync {
    /// Name used in log fields
    fn name(&self) -> &str;

    /// A request entered the execution
    async fn request_submitted(
        &self,
        _cx: &mut RequestContext,
        _execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    /// A request finished processing
    async fn request_processed(
        &self,
        _cx: &mut RequestContext,
        _execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    /// A session was pushed and is about to start
    async fn session_starting(
        &self,
        _cx: &mut RequestContext,
        _execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    /// A session started
    async fn session_started(
        &self,
        _cx: &mut RequestContext,
        _execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    /// A transition is about to execute
    async fn transition_executing(
        &self,
        _cx: &mut RequestContext,
        _execution: &mut FlowExecution,
        _transition: &TransitionDefinition,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    /// A state was entered
    async fn state_entered(
        &self,
        _cx: &mut RequestContext,
        _execution: &mut FlowExecution,
        _previous: Option<&str>,
        _state: &str,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    /// The execution is pausing until the next request
    async fn paused(
        &self,
        _cx: &mut RequestContext,
        _execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    /// A paused execution is resuming
    async fn resuming(
        &self,
        _cx: &mut RequestContext,
        _execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    /// The active session is about to end
    async fn session_ending(
        &self,
        _cx: &mut RequestContext,
        _execution: &mut FlowExecution,
        _outcome: &SessionOutcome,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    /// A session ended and was popped
    async fn session_ended(
        &self,
        _cx: &mut RequestContext,
        _execution: &mut FlowExecution,
        _ended: &mut FlowSession,
        _outcome: &SessionOutcome,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    /// An error escaped the execution
    async fn exception_thrown(
        &self,
        _cx: &mut RequestContext,
        _execution: &mut FlowExecution,
        _error: &CoreError,
    ) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Resolves the listeners attached to executions of a flow
pub trait ListenerLoader: Send + Sync {
    /// Listeners for executions of `definition`, in invocation order
    fn listeners(&self, definition: &FlowDefinition) -> Vec<Arc<dyn FlowExecutionListener>>;

    /// Chain over the listeners for `definition`
    fn chain(&self, definition: &FlowDefinition) -> ListenerChain {
        ListenerChain::new(self.listeners(definition))
    }
}

/// Returns the same listeners for every flow definition
#[derive(Clone, Default)]
pub struct StaticListenerLoader {
    listeners: Vec<Arc<dyn FlowExecutionListener>>,
}

impl StaticListenerLoader {
    /// Loader returning `listeners` in the given order
    pub fn new(listeners: Vec<Arc<dyn FlowExecutionListener>>) -> Self {
        Self { listeners }
    }

    /// Loader returning a single listener
    pub fn single(listener: Arc<dyn FlowExecutionListener>) -> Self {
        Self::new(vec![listener])
    }

    /// Loader returning no listeners
    pub fn empty() -> Self {
        Self::default()
    }
}

impl ListenerLoader for StaticListenerLoader {
    fn listeners(&self, _definition: &FlowDefinition) -> Vec<Arc<dyn FlowExecutionListener>> {
        self.listeners.clone()
    }
}

/// Fans each callback out to its listeners in registration order
///
/// The first error stops the fan-out and is returned unchanged.
#[derive(Clone, Default)]
pub struct ListenerChain {
    listeners: Vec<Arc<dyn FlowExecutionListener>>,
}

macro_rules! fan_out {
    ($self:ident, $event:literal, $listener:ident => $call:expr) => {{
        for $listener in &$self.listeners {
            debug!(listener = $listener.name(), event = $event, "Notifying listener");
            if let Err(err) = $call.await {
                error!(
                    listener = $listener.name(),
                    event = $event,
                    error = %err,
                    "Listener failed"
                );
                return Err(err);
            }
        }
        Ok(())
    }};
}

impl ListenerChain {
    /// Chain over `listeners`
    pub fn new(listeners: Vec<Arc<dyn FlowExecutionListener>>) -> Self {
        Self { listeners }
    }

    /// Number of listeners
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether the chain has no listeners
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

#[async_trait]
impl FlowExecutionListener for ListenerChain {
    fn name(&self) -> &str {
        "listener-chain"
    }

    async fn request_submitted(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        fan_out!(self, "request_submitted", l => l.request_submitted(cx, execution))
    }

    async fn request_processed(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        fan_out!(self, "request_processed", l => l.request_processed(cx, execution))
    }

    async fn session_starting(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        fan_out!(self, "session_starting", l => l.session_starting(cx, execution))
    }

    async fn session_started(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        fan_out!(self, "session_started", l => l.session_started(cx, execution))
    }

    async fn transition_executing(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        transition: &TransitionDefinition,
    ) -> Result<(), CoreError> {
        fan_out!(self, "transition_executing", l => {
            l.transition_executing(cx, execution, transition)
        })
    }

    async fn state_entered(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        previous: Option<&str>,
        state: &str,
    ) -> Result<(), CoreError> {
        fan_out!(self, "state_entered", l => l.state_entered(cx, execution, previous, state))
    }

    async fn paused(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        fan_out!(self, "paused", l => l.paused(cx, execution))
    }

    async fn resuming(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        fan_out!(self, "resuming", l => l.resuming(cx, execution))
    }

    async fn session_ending(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        outcome: &SessionOutcome,
    ) -> Result<(), CoreError> {
        fan_out!(self, "session_ending", l => l.session_ending(cx, execution, outcome))
    }

    async fn session_ended(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        ended: &mut FlowSession,
        outcome: &SessionOutcome,
    ) -> Result<(), CoreError> {
        fan_out!(self, "session_ended", l => l.session_ended(cx, execution, ended, outcome))
    }

    async fn exception_thrown(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        error: &CoreError,
    ) -> Result<(), CoreError> {
        fan_out!(self, "exception_thrown", l => l.exception_thrown(cx, execution, error))
    }
}
