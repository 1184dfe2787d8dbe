use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Attribute marking a flow whose sessions own a persistence handle
pub const PERSISTENCE_CONTEXT_ATTRIBUTE: &str = "persistenceContext";

/// Attribute switching a root flow (and all its subflows) to commit-and-clear mode
pub const COMMIT_AND_CLEAR_ATTRIBUTE: &str = "commitAndClearOnPause";

/// Value object: Flow ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub String);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable definition of an interactive flow
///
/// Definitions are loaded once and shared between executions behind an `Arc`.
/// Only the declared attributes matter to this crate; states and transitions
/// belong to the host engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// ID of the flow
    pub id: FlowId,

    /// Human-readable name of the flow
    pub name: String,

    /// Declared flow attributes
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

/// A transition about to be executed by the host engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionDefinition {
    /// Event id that triggers the transition
    pub on: String,

    /// Target state id
    pub to: String,
}

impl TransitionDefinition {
    /// Create a new transition definition
    pub fn new(on: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            on: on.into(),
            to: to.into(),
        }
    }
}

impl FlowDefinition {
    /// Create a definition without attributes
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id: FlowId(id),
            attributes: HashMap::new(),
        }
    }

    /// Declare an attribute
    pub fn with_attribute(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Mark this flow as a persistence context
    pub fn persistence_context(self) -> Self {
        self.with_attribute(PERSISTENCE_CONTEXT_ATTRIBUTE, serde_json::Value::Bool(true))
    }

    /// Mark this flow as committing and clearing its handle on every pause
    pub fn commit_and_clear_on_pause(self) -> Self {
        self.with_attribute(COMMIT_AND_CLEAR_ATTRIBUTE, serde_json::Value::Bool(true))
    }

    /// Whether an attribute is declared and not explicitly disabled.
    ///
    /// A declared attribute counts unless its value is `false` or `null`.
    pub fn has_attribute(&self, name: &str) -> bool {
        match self.attributes.get(name) {
            None => false,
            Some(serde_json::Value::Bool(enabled)) => *enabled,
            Some(serde_json::Value::Null) => false,
            Some(_) => true,
        }
    }

    /// Whether sessions of this flow own a persistence handle
    #[inline]
    pub fn is_persistence_context(&self) -> bool {
        self.has_attribute(PERSISTENCE_CONTEXT_ATTRIBUTE)
    }

    /// Whether this flow declares commit-and-clear on pause
    #[inline]
    pub fn declares_commit_and_clear(&self) -> bool {
        self.has_attribute(COMMIT_AND_CLEAR_ATTRIBUTE)
    }

    /// Validate the flow definition
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.0.trim().is_empty() {
            return Err(CoreError::ConfigurationError(
                "Flow definition must have a non-empty id".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_attributes() {
        let flow = FlowDefinition::new("checkout")
            .persistence_context()
            .commit_and_clear_on_pause();

        assert_eq!(flow.id, FlowId("checkout".to_string()));
        assert!(flow.is_persistence_context());
        assert!(flow.declares_commit_and_clear());
    }

    #[test]
    fn test_attribute_values() {
        let flow = FlowDefinition::new("f")
            .with_attribute(PERSISTENCE_CONTEXT_ATTRIBUTE, json!("yes"))
            .with_attribute(COMMIT_AND_CLEAR_ATTRIBUTE, json!(false));

        assert!(flow.is_persistence_context());
        assert!(!flow.declares_commit_and_clear());

        let flow =
            FlowDefinition::new("g").with_attribute(PERSISTENCE_CONTEXT_ATTRIBUTE, json!(null));
        assert!(!flow.is_persistence_context());
    }

    #[test]
    fn test_validate() {
        assert!(FlowDefinition::new("ok").validate().is_ok());
        assert!(matches!(
            FlowDefinition::new("  ").validate(),
            Err(CoreError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_deserialize_without_attributes() {
        let flow: FlowDefinition =
            serde_json::from_value(json!({"id": "plain", "name": "Plain"})).unwrap();
        assert!(flow.attributes.is_empty());
        assert!(!flow.is_persistence_context());
    }
}
