//! Configuration for flowguard
//!
//! Defaults are applied through serde, and [`FlowGuardConfig::load`] overlays
//! `FLOWGUARD_*` environment variables on top of them.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::{info, warn};

use crate::CoreError;

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowGuardConfig {
    /// Force key generation before transitions on interactive requests
    #[serde(default = "default_materialize_keys")]
    pub materialize_keys: bool,

    /// Form parameter the materialized key is published under
    #[serde(default = "default_execution_param")]
    pub execution_param: String,

    /// Request attribute the materialized key is published under
    #[serde(default = "default_execution_key_attribute")]
    pub execution_key_attribute: String,

    /// Log filter directive
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_materialize_keys() -> bool {
    true
}

fn default_execution_param() -> String {
    "execution".to_string()
}

fn default_execution_key_attribute() -> String {
    "flowExecutionKey".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for FlowGuardConfig {
    fn default() -> Self {
        Self {
            materialize_keys: default_materialize_keys(),
            execution_param: default_execution_param(),
            execution_key_attribute: default_execution_key_attribute(),
            log_filter: default_log_filter(),
        }
    }
}

impl FlowGuardConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self, CoreError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(enabled) = lookup("FLOWGUARD_MATERIALIZE_KEYS") {
            match enabled.to_lowercase().as_str() {
                "true" | "1" | "yes" => config.materialize_keys = true,
                "false" | "0" | "no" => config.materialize_keys = false,
                _ => warn!("Invalid FLOWGUARD_MATERIALIZE_KEYS value: {}", enabled),
            }
        }

        if let Some(param) = lookup("FLOWGUARD_EXECUTION_PARAM") {
            config.execution_param = param;
        }

        if let Some(attribute) = lookup("FLOWGUARD_EXECUTION_KEY_ATTRIBUTE") {
            config.execution_key_attribute = attribute;
        }

        if let Some(filter) = lookup("FLOWGUARD_LOG") {
            config.log_filter = filter;
        }

        config.validate()?;

        info!(
            materialize_keys = config.materialize_keys,
            execution_param = %config.execution_param,
            execution_key_attribute = %config.execution_key_attribute,
            "Loaded flowguard configuration"
        );
        Ok(config)
    }

    /// Reject unusable values
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.execution_param.trim().is_empty() {
            return Err(CoreError::ConfigurationError(
                "execution_param must not be empty".to_string(),
            ));
        }
        if self.execution_key_attribute.trim().is_empty() {
            return Err(CoreError::ConfigurationError(
                "execution_key_attribute must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
