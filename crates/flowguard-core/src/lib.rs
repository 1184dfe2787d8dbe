//!
//! FlowGuard Core - persistence lifecycle and key consistency for flow executions
//!
//! This crate defines the domain model of pausable, nested flow executions and
//! the listeners a host engine attaches to them:
//!
//! * [`PersistenceLifecycleListener`] binds, reuses, commits and releases
//!   persistence handles as frames start, pause, resume and end;
//! * [`KeyConsistencyProxy`] makes every code path of one interactive request
//!   observe the same continuation key;
//! * [`KeyMaterializer`] forces a key to exist before a transition of an
//!   interactive request executes.
//!
//! All request-bound state lives in an explicit [`RequestContext`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - executions, frames, handles and collaborator traits
pub mod domain;

/// Application services - listeners and decorators
pub mod application;

/// Configuration
pub mod config;

/// Error types
pub mod error;

// Re-export key types
pub use config::FlowGuardConfig;
pub use error::CoreError;

pub use domain::capability::{Capability, CapabilityResolver, CapabilitySet, Capable};
pub use domain::flow_definition::{
    FlowDefinition, FlowId, TransitionDefinition, COMMIT_AND_CLEAR_ATTRIBUTE,
    PERSISTENCE_CONTEXT_ATTRIBUTE,
};
pub use domain::flow_execution::{
    BoundHandle, ContinuationKey, ExecutionStatus, FlowExecution, FlowExecutionId, FlowSession,
    FrameState, HandleOrigin, Scope, ScopeValue, SessionOutcome,
};
pub use domain::persistence::{
    EntityInterceptor, FactoryId, FlushMode, HandleFactory, HandleId, HandleOptions,
    PersistenceHandle, SharedHandle,
};
pub use domain::repository::{FlowExecutionKeyFactory, FlowExecutionRepository};
pub use domain::request_context::{HandleRegistry, RequestContext, RequestKeyCache};

pub use application::commit_and_clear::{
    BoundHandleTransactionRunner, CommitAndClear, TransactionRunner, UnitOfWork,
};
pub use application::key_materializer::KeyMaterializer;
pub use application::key_proxy::{should_intercept, KeyConsistencyProxy};
pub use application::listener::{
    FlowExecutionListener, ListenerChain, ListenerLoader, StaticListenerLoader,
};
pub use application::persistence_listener::{PersistenceLifecycleListener, PersistenceMode};
