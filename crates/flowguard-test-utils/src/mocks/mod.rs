//! Mock implementations of FlowGuard collaborator traits.

pub mod handle_factory;

pub use handle_factory::{failing_handle_factory, scripted_handle_factory, MockHandleFactory};
