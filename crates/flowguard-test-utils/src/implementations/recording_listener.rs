//! Listener recording what every callback observed.

use async_trait::async_trait;
use parking_lot::Mutex;

use flowguard_core::{
    CoreError, FlowExecution, FlowExecutionListener, FlowSession, FrameState, RequestContext,
    SessionOutcome, TransitionDefinition,
};

/// Snapshot taken when a callback fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Callback name
    pub event: &'static str,
    /// Depth of the active frame, if any
    pub depth: Option<usize>,
    /// Persistence state of the active frame, if any
    pub frame_state: Option<FrameState>,
    /// Handles registered on the request at that moment
    pub registered: usize,
    /// Key cached for the request at that moment
    pub cached_key: Option<String>,
}

/// Records every callback; register it after the listeners under test
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingListener {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Recorded callback names, oldest first
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|event| event.event).collect()
    }

    /// Largest number of handles ever seen registered at once
    pub fn max_registered(&self) -> usize {
        self.events
            .lock()
            .iter()
            .map(|event| event.registered)
            .max()
            .unwrap_or(0)
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn record(&self, event: &'static str, cx: &RequestContext, execution: &FlowExecution) {
        let active = execution.active_session();
        self.events.lock().push(RecordedEvent {
            event,
            depth: active.map(FlowSession::depth),
            frame_state: active.map(FlowSession::frame_state),
            registered: cx.handles().len(),
            cached_key: cx.key_cache().get().map(|key| key.to_string()),
        });
    }
}

#[async_trait]
impl FlowExecutionListener for RecordingListener {
    fn name(&self) -> &str {
        "recording"
    }

    async fn request_submitted(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        self.record("request_submitted", cx, execution);
        Ok(())
    }

    async fn request_processed(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        self.record("request_processed", cx, execution);
        Ok(())
    }

    async fn session_starting(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        self.record("session_starting", cx, execution);
        Ok(())
    }

    async fn session_started(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        self.record("session_started", cx, execution);
        Ok(())
    }

    async fn transition_executing(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        _transition: &TransitionDefinition,
    ) -> Result<(), CoreError> {
        self.record("transition_executing", cx, execution);
        Ok(())
    }

    async fn state_entered(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        _previous: Option<&str>,
        _state: &str,
    ) -> Result<(), CoreError> {
        self.record("state_entered", cx, execution);
        Ok(())
    }

    async fn paused(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        self.record("paused", cx, execution);
        Ok(())
    }

    async fn resuming(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
    ) -> Result<(), CoreError> {
        self.record("resuming", cx, execution);
        Ok(())
    }

    async fn session_ending(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        _outcome: &SessionOutcome,
    ) -> Result<(), CoreError> {
        self.record("session_ending", cx, execution);
        Ok(())
    }

    async fn session_ended(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        _ended: &mut FlowSession,
        _outcome: &SessionOutcome,
    ) -> Result<(), CoreError> {
        self.record("session_ended", cx, execution);
        Ok(())
    }

    async fn exception_thrown(
        &self,
        cx: &mut RequestContext,
        execution: &mut FlowExecution,
        _error: &CoreError,
    ) -> Result<(), CoreError> {
        self.record("exception_thrown", cx, execution);
        Ok(())
    }
}
