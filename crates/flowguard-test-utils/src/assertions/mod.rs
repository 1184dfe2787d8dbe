//! Assertion utilities for testing FlowGuard.

pub mod frame_state;

pub use frame_state::{assert_frame_state, assert_no_leaks, assert_registered};
