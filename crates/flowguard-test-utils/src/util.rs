//! Flow definitions and setup helpers shared by tests.

use flowguard_core::FlowDefinition;

pub use flowguard_monitoring::init_test_tracing;

/// Flow that neither holds nor declares persistence
pub fn plain_flow(id: &str) -> FlowDefinition {
    FlowDefinition::new(id)
}

/// Persistence-context flow in default mode
pub fn persistent_flow(id: &str) -> FlowDefinition {
    FlowDefinition::new(id).persistence_context()
}

/// Persistence-context flow committing and clearing on every pause
pub fn commit_and_clear_flow(id: &str) -> FlowDefinition {
    FlowDefinition::new(id)
        .persistence_context()
        .commit_and_clear_on_pause()
}
