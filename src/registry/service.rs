// src/registry/service.rs

//! Per-service runtime state and the read-only views handed out by the
//! registry.

use std::sync::Arc;

use serde::Serialize;

use crate::config::ServiceConfig;
use crate::types::RunStatus;

/// Aggregate resource usage of a service's run process tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStats {
    pub cpu_percent: f64,
    pub memory_mega_bytes: f64,
}

impl MonitorStats {
    pub const ZERO: MonitorStats = MonitorStats {
        cpu_percent: 0.0,
        memory_mega_bytes: 0.0,
    };
}

/// Git fields of the current checkout. Reset as one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchState {
    pub branch: Option<String>,
    pub has_changes: bool,
    pub ahead: u32,
    pub behind: u32,
}

/// Identity of the long-lived run process attached to a service.
///
/// `id` is unique per spawn, so a late detach from an old exit watcher can
/// never clear a newer process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachedProcess {
    pub id: u64,
    pub pid: u32,
}

#[derive(Debug, Default)]
pub(crate) struct ServiceState {
    pub(crate) run_status: RunStatus,
    pub(crate) running_tasks: Vec<String>,
    pub(crate) running_script: Option<String>,
    pub(crate) process: Option<AttachedProcess>,
    /// Handle id of the last process a STOP was issued against.
    pub(crate) stop_requested: Option<u64>,
    pub(crate) branch: BranchState,
    pub(crate) monitor: MonitorStats,
}

/// Point-in-time copy of one service record.
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    pub config: Arc<ServiceConfig>,
    pub run_status: RunStatus,
    pub running_tasks: Vec<String>,
    pub running_script: Option<String>,
    pub process: Option<AttachedProcess>,
    pub branch: BranchState,
    pub monitor: MonitorStats,
}

impl ServiceSnapshot {
    pub(crate) fn capture(config: &Arc<ServiceConfig>, state: &ServiceState) -> Self {
        Self {
            config: Arc::clone(config),
            run_status: state.run_status,
            running_tasks: state.running_tasks.clone(),
            running_script: state.running_script.clone(),
            process: state.process,
            branch: state.branch.clone(),
            monitor: state.monitor,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Aggregate status row served to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub name: String,
    pub run_status: RunStatus,
    pub cloned: bool,
    pub running_tasks: Vec<String>,
    pub running_script: Option<String>,
    pub current_git_branch: Option<String>,
    pub current_git_branch_has_changes: bool,
    pub current_git_branch_ahead: u32,
    pub current_git_branch_behind: u32,
}
