// src/engine/mod.rs

//! Orchestration engine for devfleet.
//!
//! This module ties together:
//! - the service registry (single source of truth for runtime state)
//! - the broadcast scheduler that batches log entries for observers
//! - the task orchestrator and its git operations
//! - the reconciliation loops
//!
//! The async/IO entry points used by the CLI live in [`runtime`].

pub mod runtime;

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastScheduler, Notifier, PushMessage};
use crate::config::ConfigFile;
use crate::exec::{CommandBackend, RealCommandBackend, ServiceCommands};
use crate::reconcile::{ProcessSampler, ProcfsSampler, ReconciliationLoops};
use crate::registry::{ServiceRegistry, ServiceStatus};
use crate::tasks::{OrchestratorSettings, TaskCatalog, TaskOrchestrator};

pub use runtime::{print_status, run_daemon, run_script, run_task};

/// A wired-up fleet. Must be created inside a tokio runtime, since the
/// broadcast scheduler starts immediately.
pub struct Engine {
    config: ConfigFile,
    registry: ServiceRegistry,
    notifier: Notifier,
    orchestrator: TaskOrchestrator,
    loops: ReconciliationLoops,
    loop_cancel: CancellationToken,
    scheduler_cancel: CancellationToken,
    loop_handles: Vec<JoinHandle<()>>,
    scheduler: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new(
        config: ConfigFile,
        backend: Arc<dyn CommandBackend>,
        sampler: Arc<dyn ProcessSampler>,
    ) -> Self {
        let registry = ServiceRegistry::from_config(&config);
        let (scheduler, notifier) = BroadcastScheduler::new(config.timings.log_flush_interval);
        let scheduler_cancel = CancellationToken::new();
        let scheduler = scheduler.spawn(scheduler_cancel.clone());

        let commands = ServiceCommands::new(backend, notifier.clone());
        let orchestrator = TaskOrchestrator::new(
            registry.clone(),
            commands,
            TaskCatalog::from_config(&config),
            OrchestratorSettings::from_config(&config),
        );
        let loops = ReconciliationLoops::new(
            registry.clone(),
            orchestrator.git().clone(),
            sampler,
            notifier.clone(),
            config.timings,
        );

        info!(
            services = registry.names().len(),
            root = %registry.services_root().display(),
            "engine initialised"
        );

        Self {
            config,
            registry,
            notifier,
            orchestrator,
            loops,
            loop_cancel: CancellationToken::new(),
            scheduler_cancel,
            loop_handles: Vec::new(),
            scheduler: Some(scheduler),
        }
    }

    /// Engine backed by real processes and `/proc` sampling.
    pub fn with_real_backends(config: ConfigFile) -> Self {
        Self::new(
            config,
            Arc::new(RealCommandBackend::new()),
            Arc::new(ProcfsSampler::new()),
        )
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn orchestrator(&self) -> &TaskOrchestrator {
        &self.orchestrator
    }

    pub fn loops(&self) -> &ReconciliationLoops {
        &self.loops
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushMessage> {
        self.notifier.subscribe()
    }

    /// Start the reconciliation loops. Calling it twice is a no-op.
    pub fn start_loops(&mut self) {
        if !self.loop_handles.is_empty() {
            return;
        }
        self.loop_handles = self.loops.spawn(&self.loop_cancel);
        debug!(loops = self.loop_handles.len(), "reconciliation loops started");
    }

    pub fn status(&self) -> Vec<ServiceStatus> {
        self.registry.status()
    }

    /// Stop the loops, kill every attached run process, flush the pending
    /// log batch and stop the scheduler.
    pub async fn shutdown(mut self) {
        info!("shutting down");
        self.loop_cancel.cancel();
        for handle in self.loop_handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "reconciliation loop ended abnormally");
            }
        }

        self.orchestrator.stop_all().await;
        self.notifier.flush().await;

        self.scheduler_cancel.cancel();
        if let Some(scheduler) = self.scheduler.take() {
            if let Err(e) = scheduler.await {
                warn!(error = %e, "broadcast scheduler ended abnormally");
            }
        }
        info!("shutdown complete");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.loop_cancel.cancel();
        self.scheduler_cancel.cancel();
    }
}
