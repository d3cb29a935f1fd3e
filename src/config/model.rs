// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::types::{PackageManager, RunStatus};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// services_directory = "./services"
/// git_interval = "60s"
///
/// [generic_task.lint]
/// cmd = "%{npmCommand} run lint"
///
/// [[service]]
/// name = "API_GATEWAY"
/// git_url = "gitlab.example.com/org/api-gateway"
/// port = 3000
/// generic_tasks = ["lint"]
/// ```
///
/// This is the unvalidated form; use [`ConfigFile`] everywhere else.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    /// Global engine settings from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Cross-service tasks from `[generic_task.<name>]`, opted into per
    /// service via `generic_tasks = [...]`.
    #[serde(default)]
    pub generic_task: BTreeMap<String, TaskConfig>,

    /// Services in declaration order from `[[service]]`.
    #[serde(default)]
    pub service: Vec<ServiceConfig>,
}

/// `[config]` section. Durations use the compact `"250ms"` / `"3s"` format.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Root under which every service checkout lives.
    #[serde(default = "default_services_directory")]
    pub services_directory: PathBuf,

    /// Cadence of branch discovery, dirty-check and resource sampling.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Per-service ahead/behind refresh; `"0s"` disables it.
    #[serde(default = "default_git_interval")]
    pub git_interval: String,

    #[serde(default = "default_readiness_timeout")]
    pub readiness_timeout: String,

    #[serde(default = "default_readiness_poll")]
    pub readiness_poll: String,

    /// Timer on which buffered log entries are broadcast as one batch.
    #[serde(default = "default_log_flush_interval")]
    pub log_flush_interval: String,

    /// Run the install command right after a successful `GIT_CLONE`.
    #[serde(default)]
    pub install_after_clone: bool,

    /// Package manager for services that do not override it.
    #[serde(default)]
    pub package_manager: PackageManager,
}

fn default_services_directory() -> PathBuf {
    PathBuf::from("./services")
}

fn default_poll_interval() -> String {
    "1s".to_string()
}

fn default_git_interval() -> String {
    "60s".to_string()
}

fn default_readiness_timeout() -> String {
    "120s".to_string()
}

fn default_readiness_poll() -> String {
    "250ms".to_string()
}

fn default_log_flush_interval() -> String {
    "1s".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            services_directory: default_services_directory(),
            poll_interval: default_poll_interval(),
            git_interval: default_git_interval(),
            readiness_timeout: default_readiness_timeout(),
            readiness_poll: default_readiness_poll(),
            log_flush_interval: default_log_flush_interval(),
            install_after_clone: false,
            package_manager: PackageManager::default(),
        }
    }
}

/// A configured (non built-in) task.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Command template; `%{rm}`, `%{npmCommand}` and `%{service}` are
    /// substituted at execution time.
    pub cmd: String,

    /// Only runnable while the service has no checkout.
    #[serde(default)]
    pub run_if_not_cloned: bool,

    /// Run statuses under which the task is runnable once cloned.
    ///
    /// `None` means any status.
    #[serde(default)]
    pub run_if_run_status_is: Option<Vec<RunStatus>>,
}

/// `[[service.task]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceTaskConfig {
    pub name: String,

    #[serde(flatten)]
    pub task: TaskConfig,
}

/// `[[service]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Unique key; also determines the checkout folder name.
    pub name: String,

    /// Remote without scheme, e.g. `gitlab.example.com/org/repo`.
    pub git_url: String,

    /// Port probed for readiness after `START_SERVICE`. Without a port the
    /// service is considered running as soon as the run command is spawned.
    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default = "default_ready_path")]
    pub ready_path: String,

    /// Long-lived run command template.
    #[serde(default = "default_run_command")]
    pub run_command: String,

    /// Branch used by `GIT_CHECKOUT` when no `branch` attribute is given.
    #[serde(default)]
    pub default_branch: Option<String>,

    #[serde(default)]
    pub package_manager: Option<PackageManager>,

    /// Names of `[generic_task.<name>]` entries this service opts into.
    #[serde(default)]
    pub generic_tasks: Vec<String>,

    /// Service-specific tasks.
    #[serde(default)]
    pub task: Vec<ServiceTaskConfig>,
}

fn default_ready_path() -> String {
    "/".to_string()
}

fn default_run_command() -> String {
    "%{npmCommand} run start".to_string()
}

/// Parsed `[config]` durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub poll_interval: Duration,
    /// `None` when the per-service refresh is disabled.
    pub git_interval: Option<Duration>,
    pub readiness_timeout: Duration,
    pub readiness_poll: Duration,
    pub log_flush_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            git_interval: Some(Duration::from_secs(60)),
            readiness_timeout: Duration::from_secs(120),
            readiness_poll: Duration::from_millis(250),
            log_flush_interval: Duration::from_secs(1),
        }
    }
}

/// Validated configuration.
///
/// Only constructed through `TryFrom<RawConfigFile>` (see `validate.rs`), so
/// service names are unique and every task reference resolves.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub generic_task: BTreeMap<String, TaskConfig>,
    pub service: Vec<ServiceConfig>,
    pub timings: Timings,
    base_dir: PathBuf,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile, timings: Timings) -> Self {
        Self {
            config: raw.config,
            generic_task: raw.generic_task,
            service: raw.service,
            timings,
            base_dir: PathBuf::from("."),
        }
    }

    /// Anchor relative paths (e.g. `services_directory`) at `dir`.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Absolute-or-anchored checkout root.
    pub fn services_directory(&self) -> PathBuf {
        let dir = &self.config.services_directory;
        if dir.is_absolute() {
            dir.clone()
        } else {
            self.base_dir.join(dir)
        }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.service.iter().find(|s| s.name == name)
    }

    pub fn package_manager_for(&self, service: &ServiceConfig) -> PackageManager {
        service.package_manager.unwrap_or(self.config.package_manager)
    }
}
