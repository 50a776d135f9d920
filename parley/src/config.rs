use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::Context;
use parley_common::audit::AuditConfig;
use parley_delivery::DispatcherConfig;
use parley_queue::QueueConfig;
use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "PARLEY_CONFIG";

/// Service configuration, read from RON:
///
/// ```ron
/// Parley (
///     queue: File(path: "/var/spool/parley"),
///     dispatcher: (
///         batch_size: 32,
///         retry: (max_attempts: 10),
///     ),
///     submission: (
///         notify_sender_on_reject: false,
///     ),
/// )
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename = "Parley")]
pub struct ParleyConfig {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub submission: SubmissionConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubmissionConfig {
    /// How long a resolved list context is reused (in seconds)
    #[serde(default = "default_context_ttl")]
    pub context_ttl_secs: u64,

    /// Send the author a notice when their post is rejected
    #[serde(default = "default_true")]
    pub notify_sender_on_reject: bool,

    /// Read commands from the first body line of mail sent to the list
    /// address or its `+request` address
    #[serde(default = "default_true")]
    pub body_commands: bool,

    /// How long posts to a paused list wait before distribution (in seconds)
    #[serde(default = "default_defer_delay")]
    pub defer_delay_secs: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            context_ttl_secs: default_context_ttl(),
            notify_sender_on_reject: default_true(),
            body_commands: default_true(),
            defer_delay_secs: default_defer_delay(),
        }
    }
}

const fn default_context_ttl() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

const fn default_defer_delay() -> u64 {
    3600
}

impl FromStr for ParleyConfig {
    type Err = anyhow::Error;

    fn from_str(config: &str) -> anyhow::Result<Self> {
        let config: Self = ron::from_str(config)?;
        config.dispatcher.validate()?;
        Ok(config)
    }
}

impl ParleyConfig {
    /// # Errors
    /// The file cannot be read or is not a valid configuration.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        content
            .parse::<Self>()
            .with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Find the configuration file using the following precedence:
    /// 1. `PARLEY_CONFIG` environment variable
    /// 2. ./parley.config.ron (current working directory)
    /// 3. /etc/parley/parley.config.ron (system-wide config)
    ///
    /// # Errors
    /// `PARLEY_CONFIG` names a missing file, or none of the defaults exist.
    pub fn find() -> anyhow::Result<PathBuf> {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(env_path);
            if path.exists() {
                return Ok(path);
            }
            anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
        }

        let default_paths = [
            PathBuf::from("./parley.config.ron"),
            PathBuf::from("/etc/parley/parley.config.ron"),
        ];

        if let Some(path) = default_paths.iter().find(|path| path.exists()) {
            return Ok(path.clone());
        }

        let paths_tried = default_paths
            .iter()
            .map(|p| format!("  - {}", p.display()))
            .collect::<Vec<_>>()
            .join("\n");

        anyhow::bail!(
            "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
        )
    }
}
