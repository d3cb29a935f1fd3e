// src/tasks/mod.rs

//! Task catalog and execution.
//!
//! - [`orchestrator`] executes a task against a service.
//! - [`template`] substitutes `%{...}` placeholders in command templates.
//! - [`guard`] clears the running-task marker on every exit path.
//! - [`readiness`] polls a started service over HTTP.

pub mod guard;
pub mod orchestrator;
pub mod readiness;
pub mod template;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::config::{ConfigFile, ServiceConfig, TaskConfig};
use crate::types::RunStatus;

pub use orchestrator::{OrchestratorSettings, TaskOrchestrator, TaskOutcome};

/// The fixed set of tasks every service supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTask {
    NpmInstall,
    GitClone,
    RemoveService,
    StartService,
    StopService,
    GitPull,
    GitReset,
    GitCheckout,
    GitBranch,
    GitCommit,
    GitPush,
}

impl BuiltinTask {
    pub const ALL: [BuiltinTask; 11] = [
        BuiltinTask::NpmInstall,
        BuiltinTask::GitClone,
        BuiltinTask::RemoveService,
        BuiltinTask::StartService,
        BuiltinTask::StopService,
        BuiltinTask::GitPull,
        BuiltinTask::GitReset,
        BuiltinTask::GitCheckout,
        BuiltinTask::GitBranch,
        BuiltinTask::GitCommit,
        BuiltinTask::GitPush,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BuiltinTask::NpmInstall => "NPM_INSTALL",
            BuiltinTask::GitClone => "GIT_CLONE",
            BuiltinTask::RemoveService => "REMOVE_SERVICE",
            BuiltinTask::StartService => "START_SERVICE",
            BuiltinTask::StopService => "STOP_SERVICE",
            BuiltinTask::GitPull => "GIT_PULL",
            BuiltinTask::GitReset => "GIT_RESET",
            BuiltinTask::GitCheckout => "GIT_CHECKOUT",
            BuiltinTask::GitBranch => "GIT_BRANCH",
            BuiltinTask::GitCommit => "GIT_COMMIT",
            BuiltinTask::GitPush => "GIT_PUSH",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Branch tasks check "has a branch" themselves instead of going
    /// through [`TaskDefinition::is_runnable`].
    pub fn is_branch_task(self) -> bool {
        matches!(
            self,
            BuiltinTask::GitPull
                | BuiltinTask::GitReset
                | BuiltinTask::GitCheckout
                | BuiltinTask::GitBranch
                | BuiltinTask::GitCommit
                | BuiltinTask::GitPush
        )
    }

    /// Eligibility of a service-level built-in; `None` for branch tasks.
    pub fn definition(self) -> Option<TaskDefinition> {
        let (run_if_not_cloned, statuses) = match self {
            BuiltinTask::NpmInstall | BuiltinTask::RemoveService | BuiltinTask::StartService => {
                (false, vec![RunStatus::Stopped])
            }
            BuiltinTask::GitClone => (true, Vec::new()),
            BuiltinTask::StopService => (false, vec![RunStatus::Running, RunStatus::Pending]),
            _ => return None,
        };
        Some(TaskDefinition {
            name: self.as_str().to_string(),
            command: String::new(),
            run_if_not_cloned,
            run_if_run_status_is: statuses,
        })
    }
}

impl fmt::Display for BuiltinTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task as listed to observers, with its eligibility rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub name: String,
    /// Command template; empty for built-ins.
    pub command: String,
    pub run_if_not_cloned: bool,
    /// Empty means any status.
    pub run_if_run_status_is: Vec<RunStatus>,
}

impl TaskDefinition {
    pub fn from_config(name: &str, cfg: &TaskConfig) -> Self {
        Self {
            name: name.to_string(),
            command: cfg.cmd.clone(),
            run_if_not_cloned: cfg.run_if_not_cloned,
            run_if_run_status_is: cfg.run_if_run_status_is.clone().unwrap_or_default(),
        }
    }

    pub fn is_runnable(&self, cloned: bool, status: RunStatus) -> bool {
        if self.run_if_not_cloned {
            return !cloned;
        }
        cloned
            && (self.run_if_run_status_is.is_empty() || self.run_if_run_status_is.contains(&status))
    }
}

/// What `execute` dispatches on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    Builtin(BuiltinTask),
    /// Generic or per-service task with its unsubstituted template.
    Custom(TaskDefinition),
}

/// Immutable catalog of built-in and generic tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    generic: BTreeMap<String, TaskDefinition>,
}

impl TaskCatalog {
    pub fn new(generic: &BTreeMap<String, TaskConfig>) -> Self {
        Self {
            generic: generic
                .iter()
                .map(|(name, cfg)| (name.clone(), TaskDefinition::from_config(name, cfg)))
                .collect(),
        }
    }

    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self::new(&cfg.generic_task)
    }

    /// Service-level built-ins with their eligibility.
    pub fn tasks(&self) -> Vec<TaskDefinition> {
        BuiltinTask::ALL
            .into_iter()
            .filter_map(BuiltinTask::definition)
            .collect()
    }

    pub fn branch_tasks(&self) -> Vec<BuiltinTask> {
        BuiltinTask::ALL
            .into_iter()
            .filter(|t| t.is_branch_task())
            .collect()
    }

    /// Generic tasks the service opted into, then its own tasks.
    pub fn tasks_for(&self, service: &ServiceConfig) -> Vec<TaskDefinition> {
        let generic = service
            .generic_tasks
            .iter()
            .filter_map(|name| self.generic.get(name).cloned());
        let own = service
            .task
            .iter()
            .map(|t| TaskDefinition::from_config(&t.name, &t.task));
        generic.chain(own).collect()
    }

    /// Built-in first, then opted-in generic, then per-service.
    pub fn resolve(&self, name: &str, service: &ServiceConfig) -> Option<TaskKind> {
        if let Some(builtin) = BuiltinTask::from_name(name) {
            return Some(TaskKind::Builtin(builtin));
        }
        if service.generic_tasks.iter().any(|g| g == name) {
            if let Some(def) = self.generic.get(name) {
                return Some(TaskKind::Custom(def.clone()));
            }
        }
        service
            .task
            .iter()
            .find(|t| t.name == name)
            .map(|t| TaskKind::Custom(TaskDefinition::from_config(&t.name, &t.task)))
    }
}
