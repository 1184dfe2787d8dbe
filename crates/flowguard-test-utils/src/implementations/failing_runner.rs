use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use flowguard_core::{CoreError, RequestContext, TransactionRunner, UnitOfWork};

/// Transaction runner whose commit always fails
#[derive(Debug, Default)]
pub struct FailingTransactionRunner {
    attempts: AtomicUsize,
}

impl FailingTransactionRunner {
    /// Create the runner
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `run` calls
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransactionRunner for FailingTransactionRunner {
    async fn run(&self, _cx: &mut RequestContext, _work: &UnitOfWork) -> Result<(), CoreError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        Err(CoreError::Transaction(format!("commit attempt {attempt} rejected")))
    }
}
