use flowguard_core::CoreError;
use thiserror::Error;

/// Error types for the test utilities
#[derive(Debug, Error)]
pub enum TestError {
    /// A collaborator or listener failed
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An assertion helper found an unexpected state
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// Test setup failed
    #[error("Test setup failed: {0}")]
    TestSetupFailed(String),
}

/// Result alias used by assertion helpers
pub type TestResult<T = ()> = Result<T, TestError>;
