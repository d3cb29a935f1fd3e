// src/tasks/guard.rs

use tracing::{debug, warn};

use crate::broadcast::Notifier;
use crate::registry::ServiceRegistry;

/// Marks a task as running for a service until dropped.
///
/// Dropping removes the marker (and the running script, if this guard owns
/// one) and sends exactly one status pulse, whichever path the task took.
pub struct RunningTaskGuard {
    registry: ServiceRegistry,
    notifier: Notifier,
    service: String,
    task: String,
    owns_script: bool,
}

impl RunningTaskGuard {
    /// `None` if the task is already running for this service.
    pub fn acquire(
        registry: &ServiceRegistry,
        notifier: &Notifier,
        service: &str,
        task: &str,
    ) -> crate::errors::Result<Option<Self>> {
        if !registry.add_running_task(service, task)? {
            return Ok(None);
        }
        debug!(service, task, "task registered as running");
        notifier.status_changed();
        Ok(Some(Self {
            registry: registry.clone(),
            notifier: notifier.clone(),
            service: service.to_string(),
            task: task.to_string(),
            owns_script: false,
        }))
    }

    /// Also clear `runningScript` on drop.
    pub fn with_script(mut self, script: &str) -> crate::errors::Result<Self> {
        self.registry
            .set_running_script(&self.service, Some(script.to_string()))?;
        self.owns_script = true;
        Ok(self)
    }
}

impl Drop for RunningTaskGuard {
    fn drop(&mut self) {
        if let Err(e) = self.registry.remove_running_task(&self.service, &self.task) {
            warn!(service = %self.service, task = %self.task, error = %e, "failed to clear running task");
        }
        if self.owns_script {
            let _ = self.registry.set_running_script(&self.service, None);
        }
        debug!(service = %self.service, task = %self.task, "task finished");
        self.notifier.status_changed();
    }
}
