//! Router Configuration Module
//!
//! Loads receptor settings from an optional TOML file with `RECEPTOR_`
//! environment overrides layered on top.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ReceptorConfig {
    /// Dispatch behavior
    pub router: RouterSettings,

    /// Queued carrier bounds
    pub queue: QueueSettings,

    /// Log output
    pub logging: LoggingSettings,
}

/// Dispatch settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RouterSettings {
    /// Reserved protocol for internal signaling; bypasses the emit check and
    /// is never decomposed
    pub system_protocol: String,

    /// Protocol used to report handler failures, if declared in the registry
    pub exception_protocol: Option<String>,

    /// Receptor names allowed to emit any protocol
    pub privileged_senders: Vec<String>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            system_protocol: "SystemMessage".to_string(),
            exception_protocol: Some("ExceptionMessage".to_string()),
            privileged_senders: vec!["DropReceptor".to_string()],
        }
    }
}

/// What happens when the carrier queue is full
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued carrier to make room
    #[default]
    DropOldest,
    /// Discard the carrier being queued
    RejectNewest,
}

/// Queued carrier bounds
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct QueueSettings {
    /// Maximum carriers waiting for a receiver, per router
    pub max_queued: usize,

    /// Carriers older than this are discarded while draining
    pub ttl_ms: Option<u64>,

    pub overflow: OverflowPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_queued: 1024,
            ttl_ms: None,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl QueueSettings {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

/// Log output settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ReceptorConfig {
    /// Load configuration from an optional file with environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!("Loading receptor config: {:?}", path);
            builder = builder.add_source(File::from(path).required(true));
        }

        // Override with environment variables (RECEPTOR_ prefix)
        builder = builder.add_source(
            Environment::with_prefix("RECEPTOR")
                .separator("__")
                .try_parsing(true),
        );

        let config: ReceptorConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        debug!(?config, "Receptor config loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: ReceptorConfig =
            toml::from_str(toml_str).context("Failed to parse receptor config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the router cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_queued == 0 {
            bail!("queue.max_queued must be at least 1");
        }
        if self.router.system_protocol.trim().is_empty() {
            bail!("router.system_protocol must not be empty");
        }
        if let Some(exception) = &self.router.exception_protocol {
            if exception.trim().is_empty() {
                bail!("router.exception_protocol must not be empty when set");
            }
        }
        if self.router.privileged_senders.iter().any(|s| s.trim().is_empty()) {
            bail!("router.privileged_senders must not contain empty names");
        }
        Ok(())
    }

    /// True when `name` bypasses the emit check
    pub fn is_privileged_sender(&self, name: &str) -> bool {
        self.router.privileged_senders.iter().any(|s| s == name)
    }
}
