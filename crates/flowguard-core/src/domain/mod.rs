/// Capability tags and resolver
pub mod capability;

/// Flow definition domain models
pub mod flow_definition;

/// Flow execution, session stack and frame scopes
pub mod flow_execution;

/// Persistence handle abstractions
pub mod persistence;

/// Per-request state
pub mod request_context;

/// Repository interfaces
pub mod repository;
