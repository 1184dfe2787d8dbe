use crate::{
    domain::flow_definition::{FlowDefinition, PERSISTENCE_CONTEXT_ATTRIBUTE},
    domain::persistence::SharedHandle,
    CoreError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Value object: Flow Execution ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowExecutionId(pub String);

impl FlowExecutionId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }
}

impl fmt::Display for FlowExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token correlating a follow-up request with a flow execution.
///
/// The textual form is owned by the repository that issued it; this type
/// never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContinuationKey(String);

impl ContinuationKey {
    /// Wrap an already-formatted key
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The external string form
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key carries a usable value
    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Display for ContinuationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a frame came to hold its handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleOrigin {
    /// Opened by this frame, transaction begun
    Opened,
    /// Reused from the handle already registered by an ancestor
    Reused,
    /// Opened for a single pause cycle in commit-and-clear mode
    Transient,
}

/// A handle attached to a frame scope
#[derive(Debug, Clone)]
pub struct BoundHandle {
    /// The handle itself
    pub handle: SharedHandle,

    /// How the frame obtained it
    pub origin: HandleOrigin,
}

impl BoundHandle {
    /// Attach a handle with the given origin
    pub fn new(handle: SharedHandle, origin: HandleOrigin) -> Self {
        Self { handle, origin }
    }
}

/// Per-frame persistence state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// No handle in the frame scope
    Unbound,
    /// Handle held across pauses; `shared` when it belongs to an ancestor
    Bound {
        /// Handle was reused from an ancestor frame
        shared: bool,
    },
    /// Commit-and-clear handle living for one pause cycle
    CommitPending,
}

/// A value stored in a frame scope
#[derive(Debug, Clone)]
pub enum ScopeValue {
    /// Plain flow data
    Data(serde_json::Value),
    /// An attached persistence handle
    Handle(BoundHandle),
}

/// Mutable string-keyed map owned by a frame
#[derive(Debug, Clone, Default)]
pub struct Scope {
    values: HashMap<String, ScopeValue>,
}

impl Scope {
    /// Create an empty scope
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<&ScopeValue> {
        self.values.get(key)
    }

    /// Store a value, returning the previous one
    pub fn put(&mut self, key: impl Into<String>, value: ScopeValue) -> Option<ScopeValue> {
        self.values.insert(key.into(), value)
    }

    /// Remove a value
    pub fn remove(&mut self, key: &str) -> Option<ScopeValue> {
        self.values.remove(key)
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the scope is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a data value by key
    pub fn data(&self, key: &str) -> Option<&serde_json::Value> {
        match self.values.get(key) {
            Some(ScopeValue::Data(value)) => Some(value),
            _ => None,
        }
    }

    /// Store a data value
    pub fn put_data(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), ScopeValue::Data(value));
    }

    /// The persistence handle attached to this scope, if any
    pub fn handle(&self) -> Option<&BoundHandle> {
        match self.values.get(PERSISTENCE_CONTEXT_ATTRIBUTE) {
            Some(ScopeValue::Handle(bound)) => Some(bound),
            _ => None,
        }
    }

    /// Attach a persistence handle
    pub fn put_handle(&mut self, bound: BoundHandle) {
        self.values
            .insert(PERSISTENCE_CONTEXT_ATTRIBUTE.to_string(), ScopeValue::Handle(bound));
    }

    /// Detach the persistence handle
    pub fn take_handle(&mut self) -> Option<BoundHandle> {
        match self.values.remove(PERSISTENCE_CONTEXT_ATTRIBUTE) {
            Some(ScopeValue::Handle(bound)) => Some(bound),
            Some(other) => {
                // not a handle, put it back untouched
                self.values.insert(PERSISTENCE_CONTEXT_ATTRIBUTE.to_string(), other);
                None
            }
            None => None,
        }
    }
}

/// One level of an executing flow
#[derive(Debug, Clone)]
pub struct FlowSession {
    definition: Arc<FlowDefinition>,
    scope: Scope,
    parent: Option<usize>,
    depth: usize,
}

impl FlowSession {
    fn new(definition: Arc<FlowDefinition>, parent: Option<usize>, depth: usize) -> Self {
        Self {
            definition,
            scope: Scope::new(),
            parent,
            depth,
        }
    }

    /// Definition of the flow running in this frame
    #[inline]
    pub fn definition(&self) -> &Arc<FlowDefinition> {
        &self.definition
    }

    /// Frame scope
    #[inline]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Mutable frame scope
    #[inline]
    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    /// Stack index of the parent frame
    #[inline]
    pub fn parent_index(&self) -> Option<usize> {
        self.parent
    }

    /// True iff this frame has no parent
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Stack depth, root is 0
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The handle attached to this frame, if any
    pub fn bound_handle(&self) -> Option<&BoundHandle> {
        self.scope.handle()
    }

    /// Derived persistence state of this frame
    pub fn frame_state(&self) -> FrameState {
        match self.scope.handle().map(|bound| bound.origin) {
            None => FrameState::Unbound,
            Some(HandleOrigin::Opened) => FrameState::Bound { shared: false },
            Some(HandleOrigin::Reused) => FrameState::Bound { shared: true },
            Some(HandleOrigin::Transient) => FrameState::CommitPending,
        }
    }
}

/// Flow execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Created, root session not yet started
    NotStarted,
    /// Processing a request
    Active,
    /// Waiting for the next request
    Paused,
    /// Root session ended
    Ended,
}

/// Result of an ending flow session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOutcome {
    /// End state id
    pub id: String,

    /// Whether work done in the session should be committed
    pub commit: bool,
}

impl SessionOutcome {
    /// Outcome that commits
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            commit: true,
        }
    }

    /// Outcome that discards pending work
    pub fn discard(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            commit: false,
        }
    }
}

/// One running instance of a flow
///
/// Owns the stack of flow sessions, root first. Every frame except the root
/// records the stack index of its parent.
#[derive(Debug, Clone)]
pub struct FlowExecution {
    /// Unique identifier
    pub id: FlowExecutionId,

    key: Option<ContinuationKey>,
    sessions: Vec<FlowSession>,
    status: ExecutionStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Default for FlowExecution {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowExecution {
    /// Create a new, not yet started execution
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: FlowExecutionId::generate(),
            key: None,
            sessions: Vec::with_capacity(4),
            status: ExecutionStatus::NotStarted,
            created_at: now,
            updated_at: now,
        }
    }

    /// Current continuation key, if one was assigned
    #[inline]
    pub fn key(&self) -> Option<&ContinuationKey> {
        self.key.as_ref()
    }

    /// Record the key most recently issued for this execution
    pub fn assign_key(&mut self, key: ContinuationKey) {
        self.key = Some(key);
        self.update_timestamp();
    }

    /// Current status
    #[inline]
    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// Whether the root session is still on the stack
    pub fn is_active(&self) -> bool {
        !self.sessions.is_empty()
    }

    /// All sessions, root first
    #[inline]
    pub fn sessions(&self) -> &[FlowSession] {
        &self.sessions
    }

    /// Session at a stack index
    pub fn session(&self, index: usize) -> Option<&FlowSession> {
        self.sessions.get(index)
    }

    /// Mutable session at a stack index
    pub fn session_mut(&mut self, index: usize) -> Option<&mut FlowSession> {
        self.sessions.get_mut(index)
    }

    /// The innermost session
    pub fn active_session(&self) -> Option<&FlowSession> {
        self.sessions.last()
    }

    /// The innermost session, mutably
    pub fn active_session_mut(&mut self) -> Option<&mut FlowSession> {
        self.sessions.last_mut()
    }

    /// The innermost session or a `NoActiveSession` error
    pub fn require_active_session(&self) -> Result<&FlowSession, CoreError> {
        self.active_session()
            .ok_or_else(|| CoreError::NoActiveSession(self.id.0.clone()))
    }

    /// The innermost session mutably, or a `NoActiveSession` error
    pub fn require_active_session_mut(&mut self) -> Result<&mut FlowSession, CoreError> {
        let id = self.id.0.clone();
        self.active_session_mut()
            .ok_or(CoreError::NoActiveSession(id))
    }

    /// Parent frame of a session
    pub fn parent_of(&self, session: &FlowSession) -> Option<&FlowSession> {
        session.parent_index().and_then(|index| self.sessions.get(index))
    }

    /// Walk parent links from the active session up to the root frame
    pub fn root_session(&self) -> Option<&FlowSession> {
        let mut current = self.active_session()?;
        while let Some(parent) = self.parent_of(current) {
            current = parent;
        }
        Some(current)
    }

    /// Push the root session
    pub fn start(&mut self, definition: Arc<FlowDefinition>) -> Result<(), CoreError> {
        if self.status != ExecutionStatus::NotStarted {
            return Err(CoreError::ExecutionState(format!(
                "Cannot start execution in state: {:?}",
                self.status
            )));
        }

        definition.validate()?;
        self.sessions.push(FlowSession::new(definition, None, 0));
        self.status = ExecutionStatus::Active;
        self.update_timestamp();
        Ok(())
    }

    /// Push a subflow session on top of the active one
    pub fn spawn_subflow(&mut self, definition: Arc<FlowDefinition>) -> Result<(), CoreError> {
        if self.status != ExecutionStatus::Active {
            return Err(CoreError::ExecutionState(format!(
                "Cannot spawn subflow in state: {:?}",
                self.status
            )));
        }

        definition.validate()?;
        let parent = self.sessions.len() - 1;
        self.sessions
            .push(FlowSession::new(definition, Some(parent), parent + 1));
        self.update_timestamp();
        Ok(())
    }

    /// Pop the active session; the execution ends with its root
    pub fn end_active_session(&mut self) -> Result<FlowSession, CoreError> {
        if self.status != ExecutionStatus::Active {
            return Err(CoreError::ExecutionState(format!(
                "Cannot end session in state: {:?}",
                self.status
            )));
        }

        let ended = self
            .sessions
            .pop()
            .ok_or_else(|| CoreError::NoActiveSession(self.id.0.clone()))?;

        if self.sessions.is_empty() {
            self.status = ExecutionStatus::Ended;
        }
        self.update_timestamp();
        Ok(ended)
    }

    /// Suspend until the next request
    pub fn pause(&mut self) -> Result<(), CoreError> {
        if self.status != ExecutionStatus::Active {
            return Err(CoreError::ExecutionState(format!(
                "Cannot pause execution in state: {:?}",
                self.status
            )));
        }
        self.status = ExecutionStatus::Paused;
        self.update_timestamp();
        Ok(())
    }

    /// Continue a paused execution
    pub fn resume(&mut self) -> Result<(), CoreError> {
        if self.status != ExecutionStatus::Paused {
            return Err(CoreError::ExecutionState(format!(
                "Cannot resume execution in state: {:?}",
                self.status
            )));
        }
        self.status = ExecutionStatus::Active;
        self.update_timestamp();
        Ok(())
    }

    /// Update the timestamp
    #[inline]
    pub fn update_timestamp(&mut self) {
        self.updated_at = Utc::now();
    }
}
