#![allow(dead_code)]

//! A fleet engine over a temporary services directory and a scripted backend.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use devfleet::broadcast::Notifier;
use devfleet::config::ConfigFile;
use devfleet::engine::Engine;
use devfleet::errors::Result;
use devfleet::reconcile::{ProcessSampler, ReconciliationLoops};
use devfleet::registry::{MonitorStats, ServiceRegistry};
use devfleet::tasks::{TaskOrchestrator, TaskOutcome};

use crate::builders::ConfigBuilder;
use crate::scripted_backend::ScriptedBackend;

/// Sampler reporting the same stats for every process tree.
#[derive(Debug, Clone, Copy)]
pub struct FixedSampler(pub MonitorStats);

impl ProcessSampler for FixedSampler {
    fn sample_tree(&self, _root: u32) -> MonitorStats {
        self.0
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub backend: Arc<ScriptedBackend>,
    pub engine: Engine,
}

impl Fixture {
    /// Must be called from within a tokio runtime.
    pub fn new(builder: ConfigBuilder) -> Self {
        Self::with_sampler(builder, Arc::new(FixedSampler(MonitorStats::ZERO)))
    }

    pub fn with_sampler(builder: ConfigBuilder, sampler: Arc<dyn ProcessSampler>) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let config = builder
            .services_directory(dir.path().join("services"))
            .build();
        let backend = Arc::new(ScriptedBackend::new());
        let engine = Engine::new(config, backend.clone(), sampler);
        Self {
            dir,
            backend,
            engine,
        }
    }

    pub fn config(&self) -> &ConfigFile {
        self.engine.config()
    }

    pub fn registry(&self) -> &ServiceRegistry {
        self.engine.registry()
    }

    pub fn notifier(&self) -> &Notifier {
        self.engine.notifier()
    }

    pub fn orchestrator(&self) -> &TaskOrchestrator {
        self.engine.orchestrator()
    }

    pub fn loops(&self) -> &ReconciliationLoops {
        self.engine.loops()
    }

    pub fn checkout(&self, service: &str) -> PathBuf {
        self.registry().checkout_path(service)
    }

    /// Create a non-empty checkout directory so the service counts as cloned.
    pub fn make_cloned(&self, service: &str) -> PathBuf {
        let path = self.checkout(service);
        std::fs::create_dir_all(&path).expect("create checkout");
        std::fs::write(path.join("README.md"), "checkout\n").expect("write checkout file");
        path
    }

    pub async fn execute(
        &self,
        task: &str,
        service: &str,
        attributes: &[(&str, &str)],
    ) -> Result<TaskOutcome> {
        let attributes: HashMap<String, String> = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.orchestrator().execute(task, service, &attributes).await
    }

    pub async fn shutdown(self) {
        self.engine.shutdown().await;
    }
}
