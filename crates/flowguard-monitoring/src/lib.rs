//! Logging setup for FlowGuard.
//!
//! Installs a global `tracing` subscriber whose filter comes from `RUST_LOG`
//! when set and from [`MonitoringConfig::log_filter`] otherwise.

use serde::{Deserialize, Serialize};
use tracing::info;

use flowguard_core::FlowGuardConfig;

pub mod logging;
pub use logging::{build_filter, init_logging, init_test_tracing, LogExt};

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line human readable output
    #[default]
    Pretty,
    /// Single-line human readable output
    Compact,
    /// One JSON object per event, for log aggregation
    Json,
}

impl LogFormat {
    /// Parse a format name, case-insensitively
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Configuration for initializing logging
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Service name attached to the startup event
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Filter directive used when `RUST_LOG` is unset (e.g. "info,flowguard_core=debug")
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

fn default_service_name() -> String {
    "flowguard".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

impl MonitoringConfig {
    /// Take the log filter from the runtime configuration
    pub fn from_core(config: &FlowGuardConfig) -> Self {
        Self {
            log_filter: config.log_filter.clone(),
            ..Self::default()
        }
    }

    /// Override the output format
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Initialize logging
///
/// Fails if the filter does not parse or a global subscriber is already set.
pub fn init(config: MonitoringConfig) -> anyhow::Result<()> {
    init_logging(&config)?;
    info!(
        service_name = %config.service_name,
        log_format = ?config.format,
        "Logging initialized"
    );
    Ok(())
}
