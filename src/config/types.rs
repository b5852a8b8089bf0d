//! Core configuration types
//!
//! This module defines the data structures that represent a stagehand.yml configuration file.

use crate::runner::ExecutorOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Default lock timeout in seconds
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 600;

/// Top-level configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Application name (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Global interpreter to use for commands (e.g., ["sh", "-c"])
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<Vec<String>>,

    /// Lock settings
    #[serde(default)]
    pub lock: LockSettings,

    /// Executor settings
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Projects defined in the configuration
    #[serde(default)]
    pub projects: BTreeMap<String, Project>,
}

/// How long deployments wait for a busy project
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockSettings {
    /// Seconds to wait for a project lock
    #[serde(default = "default_lock_timeout")]
    pub timeout: u64,

    /// Milliseconds between acquisition attempts
    #[serde(rename = "poll-interval-ms", default = "default_lock_poll_ms")]
    pub poll_interval_ms: u64,
}

impl LockSettings {
    /// Lock timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        LockSettings {
            timeout: default_lock_timeout(),
            poll_interval_ms: default_lock_poll_ms(),
        }
    }
}

/// Cancellation tuning for the executor
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorSettings {
    /// Milliseconds between cancellation checks
    #[serde(rename = "poll-interval-ms", default = "default_executor_poll_ms")]
    pub poll_interval_ms: u64,

    /// Milliseconds a stopped command gets before it is killed
    #[serde(rename = "grace-period-ms", default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

impl ExecutorSettings {
    /// Executor options for these settings
    pub fn options(&self) -> ExecutorOptions {
        ExecutorOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            grace_period: Duration::from_millis(self.grace_period_ms),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        ExecutorSettings {
            poll_interval_ms: default_executor_poll_ms(),
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

/// A deployable project
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Project {
    /// Working directory, relative to the config file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,

    /// Extra environment for every command of this project
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    /// Stages of this project
    #[serde(default)]
    pub stages: BTreeMap<String, Stage>,
}

/// A deployment stage (e.g., staging, production)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Stage {
    /// Commands to execute, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,

    /// Newline-separated commands, appended after `commands`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Description shown by `list`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<String>,
}

impl Stage {
    /// The full command sequence, one entry per command
    pub fn command_list(&self) -> Vec<String> {
        let script = self.command.as_deref().unwrap_or_default();
        self.commands
            .iter()
            .map(|c| c.trim().to_string())
            .chain(script.lines().map(|line| line.trim().to_string()))
            .filter(|c| !c.is_empty())
            .collect()
    }
}

fn default_lock_timeout() -> u64 {
    DEFAULT_LOCK_TIMEOUT_SECS
}

fn default_lock_poll_ms() -> u64 {
    100
}

fn default_executor_poll_ms() -> u64 {
    50
}

fn default_grace_period_ms() -> u64 {
    2000
}
