#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use devfleet::config::{
    ConfigFile, ConfigSection, RawConfigFile, ServiceConfig, ServiceTaskConfig, TaskConfig,
};
use devfleet::errors::Result;
use devfleet::types::{PackageManager, RunStatus};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigBuilder {
    config: RawConfigFile,
    base_dir: Option<PathBuf>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                generic_task: BTreeMap::new(),
                service: Vec::new(),
            },
            base_dir: None,
        }
    }

    pub fn services_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.config.services_directory = dir.into();
        self
    }

    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn service(mut self, service: ServiceBuilder) -> Self {
        self.config.service.push(service.build());
        self
    }

    pub fn generic_task(mut self, name: &str, task: TaskBuilder) -> Self {
        self.config.generic_task.insert(name.to_string(), task.build());
        self
    }

    /// Tweak the `[config]` section directly.
    pub fn config(mut self, f: impl FnOnce(&mut ConfigSection)) -> Self {
        f(&mut self.config.config);
        self
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        let cfg = ConfigFile::try_from(self.config)?;
        Ok(match self.base_dir {
            Some(dir) => cfg.with_base_dir(dir),
            None => cfg,
        })
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a `[[service]]` entry.
pub struct ServiceBuilder {
    service: ServiceConfig,
}

impl ServiceBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            service: ServiceConfig {
                name: name.to_string(),
                git_url: format!("git.example.com/fleet/{}", name.to_lowercase()),
                port: None,
                ready_path: "/".to_string(),
                run_command: "%{npmCommand} run start".to_string(),
                default_branch: None,
                package_manager: None,
                generic_tasks: Vec::new(),
                task: Vec::new(),
            },
        }
    }

    pub fn git_url(mut self, url: &str) -> Self {
        self.service.git_url = url.to_string();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.service.port = Some(port);
        self
    }

    pub fn ready_path(mut self, path: &str) -> Self {
        self.service.ready_path = path.to_string();
        self
    }

    pub fn run_command(mut self, cmd: &str) -> Self {
        self.service.run_command = cmd.to_string();
        self
    }

    pub fn default_branch(mut self, branch: &str) -> Self {
        self.service.default_branch = Some(branch.to_string());
        self
    }

    pub fn package_manager(mut self, pm: PackageManager) -> Self {
        self.service.package_manager = Some(pm);
        self
    }

    pub fn generic_task(mut self, name: &str) -> Self {
        self.service.generic_tasks.push(name.to_string());
        self
    }

    pub fn task(mut self, name: &str, task: TaskBuilder) -> Self {
        self.service.task.push(ServiceTaskConfig {
            name: name.to_string(),
            task: task.build(),
        });
        self
    }

    pub fn build(self) -> ServiceConfig {
        self.service
    }
}

/// Builder for `TaskConfig`.
pub struct TaskBuilder {
    task: TaskConfig,
}

impl TaskBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            task: TaskConfig {
                cmd: cmd.to_string(),
                run_if_not_cloned: false,
                run_if_run_status_is: None,
            },
        }
    }

    pub fn if_not_cloned(mut self) -> Self {
        self.task.run_if_not_cloned = true;
        self
    }

    pub fn when_status(mut self, statuses: &[RunStatus]) -> Self {
        self.task.run_if_run_status_is = Some(statuses.to_vec());
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}
