use thiserror::Error;

/// Core error type for flow persistence and key handling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Flow execution not found
    #[error("Flow execution not found: {0}")]
    ExecutionNotFound(String),

    /// An inbound continuation key could not be parsed
    #[error("Invalid continuation key: {0}")]
    InvalidKey(String),

    /// Operation not allowed in the execution's current state
    #[error("Invalid execution state: {0}")]
    ExecutionState(String),

    /// The execution has no active flow session
    #[error("No active flow session: {0}")]
    NoActiveSession(String),

    /// A persistence handle could not be opened or configured
    #[error("Unable to open persistence handle: {0}")]
    HandleSetup(String),

    /// A handle is already registered for the factory on this request
    #[error("Persistence handle already bound for factory: {0}")]
    HandleAlreadyBound(String),

    /// The handle was used after it was closed
    #[error("Persistence handle closed: {0}")]
    HandleClosed(String),

    /// Transaction begin, commit or rollback failed
    #[error("Transaction failure: {0}")]
    Transaction(String),

    /// Repository or key factory failure
    #[error("Repository error: {0}")]
    Repository(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<String> for CoreError {
    fn from(err: String) -> Self {
        CoreError::Other(err)
    }
}

impl From<&str> for CoreError {
    fn from(err: &str) -> Self {
        CoreError::Other(err.to_string())
    }
}
