// src/registry/mod.rs

//! In-memory catalog of services and their runtime state.
//!
//! Every mutation goes through a narrow setter that takes the service's lock
//! once, so grouped fields (the branch fields, process handle + monitor
//! stats) are never observed half-updated.
//!
//! - [`service`] defines the state record and the views handed out.
//! - [`layout`] maps service names to checkout directories.

pub mod layout;
pub mod service;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{ConfigFile, ServiceConfig};
use crate::errors::{FleetError, Result};
use crate::types::RunStatus;

pub use layout::CheckoutLayout;
pub use service::{
    AttachedProcess, BranchState, MonitorStats, ServiceSnapshot, ServiceStatus,
};

use service::ServiceState;

#[derive(Debug)]
struct ServiceEntry {
    config: Arc<ServiceConfig>,
    state: RwLock<ServiceState>,
}

#[derive(Debug)]
struct RegistryInner {
    layout: CheckoutLayout,
    index: HashMap<String, usize>,
    entries: Vec<ServiceEntry>,
}

/// Shared handle to the service registry. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ServiceRegistry {
    inner: Arc<RegistryInner>,
}

impl ServiceRegistry {
    /// Build the registry from service definitions, all starting `STOPPED`
    /// with no branch information.
    pub fn new(services: Vec<ServiceConfig>, layout: CheckoutLayout) -> Self {
        let mut index = HashMap::with_capacity(services.len());
        let mut entries = Vec::with_capacity(services.len());
        for service in services {
            index.insert(service.name.clone(), entries.len());
            entries.push(ServiceEntry {
                config: Arc::new(service),
                state: RwLock::new(ServiceState::default()),
            });
        }

        Self {
            inner: Arc::new(RegistryInner {
                layout,
                index,
                entries,
            }),
        }
    }

    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self::new(
            cfg.service.clone(),
            CheckoutLayout::new(cfg.services_directory()),
        )
    }

    pub fn layout(&self) -> &CheckoutLayout {
        &self.inner.layout
    }

    pub fn services_root(&self) -> &Path {
        self.inner.layout.root()
    }

    pub fn checkout_path(&self, service: &str) -> PathBuf {
        self.inner.layout.checkout_path(service)
    }

    /// Service names in catalog order.
    pub fn names(&self) -> Vec<String> {
        self.inner
            .entries
            .iter()
            .map(|e| e.config.name.clone())
            .collect()
    }

    /// All services in catalog order.
    pub fn list(&self) -> Vec<ServiceSnapshot> {
        self.inner
            .entries
            .iter()
            .map(|e| ServiceSnapshot::capture(&e.config, &read(&e.state)))
            .collect()
    }

    pub fn find(&self, service: &str) -> Result<ServiceSnapshot> {
        let entry = self.entry(service)?;
        Ok(ServiceSnapshot::capture(&entry.config, &read(&entry.state)))
    }

    pub fn config(&self, service: &str) -> Result<Arc<ServiceConfig>> {
        Ok(Arc::clone(&self.entry(service)?.config))
    }

    pub fn is_cloned(&self, service: &str) -> bool {
        self.inner.layout.is_cloned(service)
    }

    /// Cloned and a branch has been discovered.
    pub fn has_branch(&self, service: &str) -> bool {
        let Ok(entry) = self.entry(service) else {
            return false;
        };
        read(&entry.state).branch.branch.is_some() && self.is_cloned(service)
    }

    pub fn run_status(&self, service: &str) -> Result<RunStatus> {
        Ok(read(&self.entry(service)?.state).run_status)
    }

    /// Returns whether the status changed.
    pub fn set_run_status(&self, service: &str, status: RunStatus) -> Result<bool> {
        let mut state = write(&self.entry(service)?.state);
        let changed = state.run_status != status;
        state.run_status = status;
        Ok(changed)
    }

    /// Set the status only if the current one is `expected`.
    pub fn transition_run_status(
        &self,
        service: &str,
        expected: RunStatus,
        next: RunStatus,
    ) -> Result<bool> {
        let mut state = write(&self.entry(service)?.state);
        if state.run_status != expected {
            return Ok(false);
        }
        state.run_status = next;
        Ok(true)
    }

    pub fn attach_process(&self, service: &str, process: AttachedProcess) -> Result<()> {
        let mut state = write(&self.entry(service)?.state);
        state.process = Some(process);
        Ok(())
    }

    /// Clear the attached process if it is still the one identified by `id`,
    /// zeroing monitor stats in the same mutation.
    ///
    /// Returns `false` when the handle was already cleared or replaced.
    pub fn detach_process(&self, service: &str, id: u64) -> Result<bool> {
        let mut state = write(&self.entry(service)?.state);
        match state.process {
            Some(p) if p.id == id => {
                state.process = None;
                state.monitor = MonitorStats::ZERO;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Record that the attached process is being stopped on request.
    ///
    /// Returns the process, or `None` when nothing is attached.
    pub fn request_stop(&self, service: &str) -> Result<Option<AttachedProcess>> {
        let mut state = write(&self.entry(service)?.state);
        let process = state.process;
        if let Some(p) = process {
            state.stop_requested = Some(p.id);
        }
        Ok(process)
    }

    /// Whether a STOP was issued against the process identified by `id`.
    pub fn stop_requested(&self, service: &str, id: u64) -> Result<bool> {
        Ok(read(&self.entry(service)?.state).stop_requested == Some(id))
    }

    pub fn attached_process(&self, service: &str) -> Result<Option<AttachedProcess>> {
        Ok(read(&self.entry(service)?.state).process)
    }

    /// Returns `false` if the task is already marked running.
    pub fn add_running_task(&self, service: &str, task: &str) -> Result<bool> {
        let mut state = write(&self.entry(service)?.state);
        if state.running_tasks.iter().any(|t| t == task) {
            return Ok(false);
        }
        state.running_tasks.push(task.to_string());
        Ok(true)
    }

    pub fn remove_running_task(&self, service: &str, task: &str) -> Result<bool> {
        let mut state = write(&self.entry(service)?.state);
        let before = state.running_tasks.len();
        state.running_tasks.retain(|t| t != task);
        Ok(state.running_tasks.len() != before)
    }

    pub fn running_tasks(&self, service: &str) -> Result<Vec<String>> {
        Ok(read(&self.entry(service)?.state).running_tasks.clone())
    }

    pub fn set_running_script(&self, service: &str, script: Option<String>) -> Result<()> {
        write(&self.entry(service)?.state).running_script = script;
        Ok(())
    }

    pub fn branch_state(&self, service: &str) -> Result<BranchState> {
        Ok(read(&self.entry(service)?.state).branch.clone())
    }

    /// Record a newly discovered branch name. Returns whether it changed.
    pub fn set_branch(&self, service: &str, branch: &str) -> Result<bool> {
        let mut state = write(&self.entry(service)?.state);
        if state.branch.branch.as_deref() == Some(branch) {
            return Ok(false);
        }
        state.branch.branch = Some(branch.to_string());
        Ok(true)
    }

    /// Update the dirty flag. Ignored once the branch fields were reset.
    pub fn set_has_changes(&self, service: &str, has_changes: bool) -> Result<bool> {
        let mut state = write(&self.entry(service)?.state);
        if state.branch.branch.is_none() || state.branch.has_changes == has_changes {
            return Ok(false);
        }
        state.branch.has_changes = has_changes;
        Ok(true)
    }

    /// Update ahead/behind counts. Ignored once the branch fields were reset.
    pub fn set_ahead_behind(&self, service: &str, ahead: u32, behind: u32) -> Result<bool> {
        let mut state = write(&self.entry(service)?.state);
        if state.branch.branch.is_none() {
            return Ok(false);
        }
        let changed = state.branch.ahead != ahead || state.branch.behind != behind;
        state.branch.ahead = ahead;
        state.branch.behind = behind;
        Ok(changed)
    }

    /// Replace the whole branch group at once.
    pub fn set_branch_fields(&self, service: &str, fields: BranchState) -> Result<bool> {
        let mut state = write(&self.entry(service)?.state);
        let changed = state.branch != fields;
        state.branch = fields;
        Ok(changed)
    }

    /// branch = none, dirty = false, ahead = behind = 0, as one mutation.
    pub fn reset_branch_fields(&self, service: &str) -> Result<bool> {
        self.set_branch_fields(service, BranchState::default())
    }

    pub fn monitor_stats(&self, service: &str) -> Result<MonitorStats> {
        Ok(read(&self.entry(service)?.state).monitor)
    }

    pub fn set_monitor_stats(&self, service: &str, stats: MonitorStats) -> Result<bool> {
        let mut state = write(&self.entry(service)?.state);
        let changed = state.monitor != stats;
        state.monitor = stats;
        Ok(changed)
    }

    /// Aggregate status of every service, probing the checkout directories.
    pub fn status(&self) -> Vec<ServiceStatus> {
        self.inner
            .entries
            .iter()
            .map(|entry| {
                let cloned = self.is_cloned(&entry.config.name);
                let state = read(&entry.state);
                ServiceStatus {
                    name: entry.config.name.clone(),
                    run_status: state.run_status,
                    cloned,
                    running_tasks: state.running_tasks.clone(),
                    running_script: state.running_script.clone(),
                    current_git_branch: state.branch.branch.clone(),
                    current_git_branch_has_changes: state.branch.has_changes,
                    current_git_branch_ahead: state.branch.ahead,
                    current_git_branch_behind: state.branch.behind,
                }
            })
            .collect()
    }

    fn entry(&self, service: &str) -> Result<&ServiceEntry> {
        self.inner
            .index
            .get(service)
            .map(|&i| &self.inner.entries[i])
            .ok_or_else(|| FleetError::ServiceNotFound(service.to_string()))
    }
}

// A panic while holding a service lock leaves plain data behind; keep serving it.
fn read(lock: &RwLock<ServiceState>) -> RwLockReadGuard<'_, ServiceState> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(lock: &RwLock<ServiceState>) -> RwLockWriteGuard<'_, ServiceState> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            git_url: format!("example.com/org/{}", name.to_lowercase()),
            port: None,
            ready_path: "/".to_string(),
            run_command: "%{npmCommand} run start".to_string(),
            default_branch: None,
            package_manager: None,
            generic_tasks: Vec::new(),
            task: Vec::new(),
        }
    }

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(
            vec![service("B_SVC"), service("A_SVC")],
            CheckoutLayout::new("/nonexistent"),
        )
    }

    #[test]
    fn list_keeps_catalog_order_and_find_fails_for_unknown() {
        let reg = registry();
        let names: Vec<_> = reg.list().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["B_SVC", "A_SVC"]);

        match reg.find("NOPE") {
            Err(FleetError::ServiceNotFound(name)) => assert_eq!(name, "NOPE"),
            other => panic!("expected ServiceNotFound, got {other:?}"),
        }
    }

    #[test]
    fn reset_branch_fields_clears_the_whole_group() {
        let reg = registry();
        reg.set_branch("A_SVC", "main").unwrap();
        reg.set_has_changes("A_SVC", true).unwrap();
        reg.set_ahead_behind("A_SVC", 3, 4).unwrap();

        assert!(reg.reset_branch_fields("A_SVC").unwrap());
        assert_eq!(reg.branch_state("A_SVC").unwrap(), BranchState::default());
        assert!(!reg.reset_branch_fields("A_SVC").unwrap());
    }

    #[test]
    fn branch_field_updates_are_dropped_after_reset() {
        let reg = registry();
        assert!(!reg.set_ahead_behind("A_SVC", 1, 2).unwrap());
        assert!(!reg.set_has_changes("A_SVC", true).unwrap());
        assert_eq!(reg.branch_state("A_SVC").unwrap(), BranchState::default());
    }

    #[test]
    fn detach_zeroes_monitor_stats_and_happens_once() {
        let reg = registry();
        reg.attach_process("A_SVC", AttachedProcess { id: 7, pid: 1234 })
            .unwrap();
        reg.set_monitor_stats(
            "A_SVC",
            MonitorStats {
                cpu_percent: 12.5,
                memory_mega_bytes: 80.0,
            },
        )
        .unwrap();

        assert!(!reg.detach_process("A_SVC", 8).unwrap(), "wrong id must not detach");
        assert!(reg.detach_process("A_SVC", 7).unwrap());
        assert!(!reg.detach_process("A_SVC", 7).unwrap());
        assert_eq!(reg.attached_process("A_SVC").unwrap(), None);
        assert_eq!(reg.monitor_stats("A_SVC").unwrap(), MonitorStats::ZERO);
    }

    #[test]
    fn stop_request_is_tied_to_one_handle() {
        let reg = registry();
        assert_eq!(reg.request_stop("A_SVC").unwrap(), None);

        reg.attach_process("A_SVC", AttachedProcess { id: 3, pid: 99 })
            .unwrap();
        assert!(!reg.stop_requested("A_SVC", 3).unwrap());
        assert_eq!(
            reg.request_stop("A_SVC").unwrap(),
            Some(AttachedProcess { id: 3, pid: 99 })
        );
        assert!(reg.stop_requested("A_SVC", 3).unwrap());
        assert!(!reg.stop_requested("A_SVC", 4).unwrap());
        assert!(!reg.stop_requested("B_SVC", 3).unwrap());
    }

    #[test]
    fn running_tasks_reject_overlapping_duplicates() {
        let reg = registry();
        assert!(reg.add_running_task("A_SVC", "GIT_PULL").unwrap());
        assert!(reg.add_running_task("A_SVC", "NPM_INSTALL").unwrap());
        assert!(!reg.add_running_task("A_SVC", "GIT_PULL").unwrap());
        assert!(reg.remove_running_task("A_SVC", "GIT_PULL").unwrap());
        assert_eq!(reg.running_tasks("A_SVC").unwrap(), vec!["NPM_INSTALL"]);
    }

    #[test]
    fn transition_only_applies_from_expected_status() {
        let reg = registry();
        assert!(!reg
            .transition_run_status("A_SVC", RunStatus::Pending, RunStatus::Running)
            .unwrap());
        reg.set_run_status("A_SVC", RunStatus::Pending).unwrap();
        assert!(reg
            .transition_run_status("A_SVC", RunStatus::Pending, RunStatus::Running)
            .unwrap());
        assert_eq!(reg.run_status("A_SVC").unwrap(), RunStatus::Running);
    }
}
