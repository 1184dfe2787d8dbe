//! Testing utilities for FlowGuard.
//!
//! This crate provides a lifecycle harness that drives listeners the way a
//! host engine would, mocks and recording fakes of the collaborator traits,
//! and assertion helpers for frame and registry state.

pub mod assertions;
pub mod error;
pub mod harness;
pub mod implementations;
pub mod mocks;
pub mod util;

/// Re-export commonly used types for convenience
pub use mockall;

pub use error::{TestError, TestResult};
pub use harness::FlowHarness;
pub use util::{commit_and_clear_flow, init_test_tracing, persistent_flow, plain_flow};
