// src/tasks/orchestrator.rs

//! Task execution against a single service.
//!
//! `execute` registers the task as running, resolves it to a [`TaskKind`],
//! checks eligibility and dispatches with one `match`. The running marker is
//! held by a [`RunningTaskGuard`], so it is cleared (and observers pulsed)
//! on every exit path, errors and panics included.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::guard::RunningTaskGuard;
use super::readiness::{readiness_url, wait_until_ready};
use super::template::{RM_COMMAND, TemplateContext, render};
use super::{BuiltinTask, TaskCatalog, TaskDefinition, TaskKind};
use crate::broadcast::Notifier;
use crate::config::{ConfigFile, ServiceConfig};
use crate::errors::{FleetError, Result};
use crate::exec::{
    CommandLine, CommandOutput, ProcessHandle, ProcessRunner, ServiceCommands, kill_tree,
};
use crate::git::{GitOperations, GitOutcome};
use crate::registry::{AttachedProcess, CheckoutLayout, ServiceRegistry};
use crate::types::{CheckoutTransport, PackageManager, RunStatus};

/// Engine-wide knobs for task execution.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub readiness_timeout: Duration,
    pub readiness_poll: Duration,
    pub install_after_clone: bool,
    pub package_manager: PackageManager,
}

impl OrchestratorSettings {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self {
            readiness_timeout: cfg.timings.readiness_timeout,
            readiness_poll: cfg.timings.readiness_poll,
            install_after_clone: cfg.config.install_after_clone,
            package_manager: cfg.config.package_manager,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            readiness_timeout: Duration::from_secs(120),
            readiness_poll: Duration::from_millis(250),
            install_after_clone: false,
            package_manager: PackageManager::default(),
        }
    }
}

/// How a task ended. Configuration errors are returned as `Err` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "kebab-case")]
pub enum TaskOutcome {
    Succeeded,
    /// Nothing to do, or a concurrent change made the task moot.
    Skipped(String),
    /// A command failed; the registry keeps its last known good state.
    Failed(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded)
    }
}

impl From<GitOutcome> for TaskOutcome {
    fn from(outcome: GitOutcome) -> Self {
        match outcome {
            GitOutcome::Completed => TaskOutcome::Succeeded,
            GitOutcome::Aborted(reason) => TaskOutcome::Skipped(reason),
            GitOutcome::Failed(reason) => TaskOutcome::Failed(reason),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PackageJson {
    #[serde(default)]
    scripts: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone)]
pub struct TaskOrchestrator {
    registry: ServiceRegistry,
    commands: ServiceCommands,
    git: GitOperations,
    runner: ProcessRunner,
    catalog: Arc<TaskCatalog>,
    settings: OrchestratorSettings,
}

impl TaskOrchestrator {
    pub fn new(
        registry: ServiceRegistry,
        commands: ServiceCommands,
        catalog: TaskCatalog,
        settings: OrchestratorSettings,
    ) -> Self {
        let git = GitOperations::new(registry.clone(), commands.clone());
        Self {
            registry,
            commands,
            git,
            runner: ProcessRunner::new(),
            catalog: Arc::new(catalog),
            settings,
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    pub fn git(&self) -> &GitOperations {
        &self.git
    }

    fn notifier(&self) -> &Notifier {
        self.commands.notifier()
    }

    /// Execute `task` against `service` and wait for it to finish.
    ///
    /// For `START_SERVICE` this returns once the service is ready (or
    /// given up on); the run process keeps going in the background.
    pub async fn execute(
        &self,
        task: &str,
        service: &str,
        attributes: &HashMap<String, String>,
    ) -> Result<TaskOutcome> {
        let config = self.registry.config(service)?;
        let Some(_guard) = RunningTaskGuard::acquire(&self.registry, self.notifier(), service, task)?
        else {
            return Err(FleetError::TaskAlreadyRunning {
                task: task.to_string(),
                service: service.to_string(),
            });
        };

        let Some(kind) = self.catalog.resolve(task, &config) else {
            warn!(service, task, "unknown task");
            return Err(FleetError::UnknownTask(task.to_string()));
        };
        self.check_eligibility(task, &kind, &config)?;

        info!(service, task, "executing task");
        let outcome = match kind {
            TaskKind::Builtin(builtin) => self.run_builtin(builtin, &config, attributes).await?,
            TaskKind::Custom(definition) => self.run_custom(&definition, &config).await,
        };

        match &outcome {
            TaskOutcome::Succeeded => info!(service, task, "task succeeded"),
            TaskOutcome::Skipped(reason) => info!(service, task, reason = %reason, "task skipped"),
            TaskOutcome::Failed(reason) => warn!(service, task, reason = %reason, "task failed"),
        }
        Ok(outcome)
    }

    /// Run a `package.json` script, tracked as `SCRIPT:<name>`.
    pub async fn run_script(&self, service: &str, script: &str) -> Result<TaskOutcome> {
        let config = self.registry.config(service)?;
        let task = format!("SCRIPT:{script}");
        let Some(guard) = RunningTaskGuard::acquire(&self.registry, self.notifier(), service, &task)?
        else {
            return Err(FleetError::TaskAlreadyRunning {
                task,
                service: service.to_string(),
            });
        };
        let _guard = guard.with_script(script)?;

        if !self.registry.is_cloned(service) {
            return Err(not_runnable(&task, service, "service is not cloned"));
        }
        if !self.list_scripts(service).await?.iter().any(|s| s == script) {
            return Err(not_runnable(&task, service, "no such script in package.json"));
        }

        let command = CommandLine::shell(self.package_manager(&config).run_script_command(script));
        let cwd = self.registry.checkout_path(service);
        Ok(command_outcome(self.commands.streamed(service, command, &cwd).await))
    }

    /// Script names from the checkout's `package.json`. Empty when the file
    /// is missing or unreadable.
    pub async fn list_scripts(&self, service: &str) -> Result<Vec<String>> {
        let path = self.registry.checkout_path(service).join("package.json");
        self.registry.config(service)?;

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                debug!(service, path = %path.display(), error = %e, "no package.json");
                return Ok(Vec::new());
            }
        };
        match serde_json::from_str::<PackageJson>(&text) {
            Ok(pkg) => Ok(pkg.scripts.into_keys().collect()),
            Err(e) => {
                warn!(service, path = %path.display(), error = %e, "unreadable package.json");
                Ok(Vec::new())
            }
        }
    }

    /// Stop every service that still has a run process attached.
    pub async fn stop_all(&self) {
        for name in self.registry.names() {
            if matches!(self.registry.attached_process(&name), Ok(Some(_))) {
                if let Err(e) = self.stop(&name).await {
                    warn!(service = %name, error = %e, "failed to stop service");
                }
            }
        }
    }

    fn check_eligibility(&self, task: &str, kind: &TaskKind, config: &ServiceConfig) -> Result<()> {
        let definition = match kind {
            TaskKind::Builtin(builtin) => match builtin.definition() {
                Some(def) => def,
                None => return Ok(()),
            },
            TaskKind::Custom(def) => def.clone(),
        };

        let cloned = self.registry.is_cloned(&config.name);
        let status = self.registry.run_status(&config.name)?;
        if definition.is_runnable(cloned, status) {
            return Ok(());
        }
        let reason = if definition.run_if_not_cloned {
            "service is already cloned".to_string()
        } else if !cloned {
            "service is not cloned".to_string()
        } else {
            format!("run status is {status}")
        };
        Err(not_runnable(task, &config.name, &reason))
    }

    async fn run_builtin(
        &self,
        task: BuiltinTask,
        config: &ServiceConfig,
        attributes: &HashMap<String, String>,
    ) -> Result<TaskOutcome> {
        let name = config.name.as_str();
        let outcome = match task {
            BuiltinTask::NpmInstall => self.install(config).await,
            BuiltinTask::StartService => self.start(config).await?,
            BuiltinTask::StopService => self.stop(name).await?,
            BuiltinTask::GitClone => self.clone_checkout(config, attributes).await?,
            BuiltinTask::RemoveService => self.remove(name).await?,
            BuiltinTask::GitPull => self.git.pull(name).await?.into(),
            BuiltinTask::GitReset => self.git.reset(name).await?.into(),
            BuiltinTask::GitCheckout => self
                .git
                .checkout(name, attributes.get("branch").map(String::as_str))
                .await?
                .into(),
            BuiltinTask::GitBranch => {
                let branch = required(attributes, "branch", task, name)?;
                self.git.create_branch(name, branch).await?.into()
            }
            BuiltinTask::GitCommit => {
                let message = required(attributes, "message", task, name)?;
                let add_all = attributes.get("all").is_some_and(|v| v == "true");
                self.git.commit(name, message, add_all).await?.into()
            }
            BuiltinTask::GitPush => {
                let branch = required(attributes, "branch", task, name)?;
                let upstream = attributes.get("upstream").map(String::as_str);
                self.git.push(name, branch, upstream).await?.into()
            }
        };
        Ok(outcome)
    }

    async fn install(&self, config: &ServiceConfig) -> TaskOutcome {
        let command = CommandLine::shell(self.package_manager(config).install_command());
        let cwd = self.registry.checkout_path(&config.name);
        command_outcome(self.commands.streamed(&config.name, command, &cwd).await)
    }

    async fn start(&self, config: &ServiceConfig) -> Result<TaskOutcome> {
        let name = config.name.as_str();
        let cwd = self.registry.checkout_path(name);
        let command = CommandLine::shell(self.render(&config.run_command, config));

        self.registry.set_run_status(name, RunStatus::Pending)?;
        self.notifier().status_changed();
        self.commands.announce_start(name, &command, &cwd);

        let handle = match self
            .runner
            .spawn(&command, &cwd, self.commands.output_sink(name))
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(service = name, error = %e, "run command could not be started");
                self.notifier()
                    .info(name, format!("Command failed to start: {e:#}"));
                self.registry.set_run_status(name, RunStatus::Stopped)?;
                return Ok(TaskOutcome::Failed(format!("{e:#}")));
            }
        };
        self.registry.attach_process(
            name,
            AttachedProcess {
                id: handle.id(),
                pid: handle.pid(),
            },
        )?;
        info!(service = name, pid = handle.pid(), "run command started");
        self.watch_exit(name, command, handle.clone());

        let ready = match config.port {
            None => true,
            Some(port) => {
                let url = readiness_url(port, &config.ready_path);
                tokio::select! {
                    ready = wait_until_ready(
                        &url,
                        self.settings.readiness_timeout,
                        self.settings.readiness_poll,
                    ) => ready,
                    _ = handle.wait() => false,
                }
            }
        };

        if ready {
            if self
                .registry
                .transition_run_status(name, RunStatus::Pending, RunStatus::Running)?
            {
                info!(service = name, "service is ready");
                return Ok(TaskOutcome::Succeeded);
            }
            return Ok(TaskOutcome::Skipped(
                "service was stopped before it became ready".into(),
            ));
        }

        if self.registry.stop_requested(name, handle.id())? {
            return Ok(TaskOutcome::Skipped(
                "service was stopped before it became ready".into(),
            ));
        }
        if handle.is_finished() {
            return Ok(TaskOutcome::Failed(
                "run command exited before the service became ready".into(),
            ));
        }

        warn!(
            service = name,
            timeout = ?self.settings.readiness_timeout,
            "service did not become ready; stopping it"
        );
        self.notifier().info(
            name,
            format!(
                "Service did not become ready within {:?}; stopping it",
                self.settings.readiness_timeout
            ),
        );
        if let Err(e) = handle.kill() {
            // Still attached and alive; left PENDING so STOP remains possible.
            warn!(service = name, error = %e, "failed to kill unready service");
            return Ok(TaskOutcome::Failed(format!("readiness timeout; kill failed: {e:#}")));
        }
        self.registry.detach_process(name, handle.id())?;
        self.registry.set_run_status(name, RunStatus::Stopped)?;
        Ok(TaskOutcome::Failed("readiness timeout".into()))
    }

    /// Detach the handle and mark the service stopped once the run process
    /// exits, unless STOP already detached it.
    fn watch_exit(&self, service: &str, command: CommandLine, handle: ProcessHandle) {
        let registry = self.registry.clone();
        let commands = self.commands.clone();
        let service = service.to_string();
        tokio::spawn(async move {
            let output = handle.wait().await;
            commands.notifier().output_closed(&service);
            commands.announce_finish(&service, &command, &output);
            match registry.detach_process(&service, handle.id()) {
                Ok(true) => {
                    let _ = registry.set_run_status(&service, RunStatus::Stopped);
                    info!(service = %service, exit_code = ?output.exit_code, "run command exited");
                    commands.notifier().status_changed();
                }
                Ok(false) => debug!(service = %service, "run command exited after stop"),
                Err(e) => warn!(service = %service, error = %e, "failed to detach run command"),
            }
        });
    }

    async fn stop(&self, service: &str) -> Result<TaskOutcome> {
        let Some(process) = self.registry.request_stop(service)? else {
            self.registry.set_run_status(service, RunStatus::Stopped)?;
            self.notifier().info(service, "No running process to stop");
            return Ok(TaskOutcome::Skipped("no process attached".into()));
        };

        info!(service, pid = process.pid, "stopping service");
        self.notifier()
            .info(service, format!("Killing service (PID: {})", process.pid));

        let pid = process.pid;
        let killed = tokio::task::spawn_blocking(move || kill_tree(pid))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r);
        if let Err(e) = killed {
            warn!(service, pid, error = %e, "failed to kill process tree");
            return Ok(TaskOutcome::Failed(format!("{e:#}")));
        }

        self.registry.detach_process(service, process.id)?;
        self.registry.set_run_status(service, RunStatus::Stopped)?;
        Ok(TaskOutcome::Succeeded)
    }

    async fn clone_checkout(
        &self,
        config: &ServiceConfig,
        attributes: &HashMap<String, String>,
    ) -> Result<TaskOutcome> {
        let name = config.name.as_str();
        let transport: CheckoutTransport = attributes
            .get("gitCheckoutType")
            .ok_or_else(|| FleetError::UnknownCheckoutTransport("(missing)".to_string()))?
            .parse()?;
        let url = clone_url(
            &config.git_url,
            transport,
            attributes.get("basicAuth").map(String::as_str),
        )
        .ok_or_else(|| {
            not_runnable(BuiltinTask::GitClone.as_str(), name, "basicAuth attribute is required")
        })?;

        let root = self.registry.services_root().to_path_buf();
        if let Err(e) = tokio::fs::create_dir_all(&root).await {
            warn!(service = name, path = %root.display(), error = %e, "cannot create services directory");
            self.notifier()
                .info(name, format!("Cannot create directory \"{}\": {e}", root.display()));
            return Ok(TaskOutcome::Failed(e.to_string()));
        }

        let command = CommandLine::git(["clone".to_string(), url, CheckoutLayout::folder_name(name)]);
        let outcome = command_outcome(self.commands.streamed(name, command, &root).await);
        if outcome.is_success() && self.settings.install_after_clone {
            return Ok(self.install(config).await);
        }
        Ok(outcome)
    }

    async fn remove(&self, service: &str) -> Result<TaskOutcome> {
        let path = self.registry.checkout_path(service);
        self.notifier()
            .info(service, format!("Removing directory: \"{}\"", path.display()));

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(service, "checkout already gone");
            }
            Err(e) => {
                warn!(service, path = %path.display(), error = %e, "failed to remove checkout");
                self.notifier()
                    .info(service, format!("Failed to remove directory: {e}"));
                return Ok(TaskOutcome::Failed(e.to_string()));
            }
        }
        self.registry.reset_branch_fields(service)?;
        Ok(TaskOutcome::Succeeded)
    }

    async fn run_custom(&self, definition: &TaskDefinition, config: &ServiceConfig) -> TaskOutcome {
        let command = CommandLine::shell(self.render(&definition.command, config));
        let checkout = self.registry.checkout_path(&config.name);
        // Tasks meant for uncloned services run from the services root.
        let cwd: PathBuf = if checkout.is_dir() {
            checkout
        } else {
            let root = self.registry.services_root().to_path_buf();
            if let Err(e) = tokio::fs::create_dir_all(&root).await {
                return TaskOutcome::Failed(e.to_string());
            }
            root
        };
        command_outcome(self.commands.streamed(&config.name, command, &cwd).await)
    }

    fn render(&self, template: &str, config: &ServiceConfig) -> String {
        render(
            template,
            &TemplateContext {
                rm: RM_COMMAND,
                npm_command: self.package_manager(config).command(),
                service: &config.name,
            },
        )
    }

    fn package_manager(&self, config: &ServiceConfig) -> PackageManager {
        config
            .package_manager
            .unwrap_or(self.settings.package_manager)
    }
}

/// Remote URL for `git clone`. `None` when basic auth is requested without
/// credentials.
pub fn clone_url(
    git_url: &str,
    transport: CheckoutTransport,
    basic_auth: Option<&str>,
) -> Option<String> {
    match transport {
        CheckoutTransport::Ssh => Some(format!("git@{}.git", git_url.replacen('/', ":", 1))),
        CheckoutTransport::Https => Some(format!("https://{git_url}")),
        CheckoutTransport::HttpsBasicAuth => {
            basic_auth.map(|auth| format!("https://{auth}@{git_url}"))
        }
    }
}

fn command_outcome(result: anyhow::Result<CommandOutput>) -> TaskOutcome {
    match result {
        Ok(out) if out.success() => TaskOutcome::Succeeded,
        Ok(out) => match out.exit_code {
            Some(code) => TaskOutcome::Failed(format!("exited with code {code}")),
            None => TaskOutcome::Failed("terminated by signal".into()),
        },
        Err(e) => TaskOutcome::Failed(format!("{e:#}")),
    }
}

fn required<'a>(
    attributes: &'a HashMap<String, String>,
    key: &str,
    task: BuiltinTask,
    service: &str,
) -> Result<&'a str> {
    attributes
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| not_runnable(task.as_str(), service, &format!("missing attribute '{key}'")))
}

fn not_runnable(task: &str, service: &str, reason: &str) -> FleetError {
    FleetError::TaskNotRunnable {
        task: task.to_string(),
        service: service.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_urls_per_transport() {
        let url = "example.com/org/repo";
        assert_eq!(
            clone_url(url, CheckoutTransport::Ssh, None).as_deref(),
            Some("git@example.com:org/repo.git")
        );
        assert_eq!(
            clone_url(url, CheckoutTransport::Https, None).as_deref(),
            Some("https://example.com/org/repo")
        );
        assert_eq!(
            clone_url(url, CheckoutTransport::HttpsBasicAuth, Some("u:p")).as_deref(),
            Some("https://u:p@example.com/org/repo")
        );
        assert_eq!(clone_url(url, CheckoutTransport::HttpsBasicAuth, None), None);
    }

    #[test]
    fn outcome_from_exit_codes() {
        assert_eq!(command_outcome(Ok(CommandOutput::ok(""))), TaskOutcome::Succeeded);
        assert_eq!(
            command_outcome(Ok(CommandOutput::failed(2, "boom"))),
            TaskOutcome::Failed("exited with code 2".into())
        );
        assert!(matches!(
            command_outcome(Err(anyhow::anyhow!("no such dir"))),
            TaskOutcome::Failed(_)
        ));
    }
}
