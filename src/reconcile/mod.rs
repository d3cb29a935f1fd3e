// src/reconcile/mod.rs

//! Periodic reconciliation of registry fields with the outside world.
//!
//! Each pass covers every service, isolates per-service failures, and
//! reports whether any stored field changed. The spawned loops turn a
//! changed pass into exactly one status pulse (or one monitor message for
//! resource sampling).
//!
//! - [`sampler`] measures process-tree CPU and memory.

pub mod sampler;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{MonitorSample, Notifier};
use crate::config::Timings;
use crate::git::GitOperations;
use crate::registry::{MonitorStats, ServiceRegistry};

pub use sampler::{ProcessSampler, ProcfsSampler, round_stats};

#[derive(Clone)]
pub struct ReconciliationLoops {
    registry: ServiceRegistry,
    git: GitOperations,
    sampler: Arc<dyn ProcessSampler>,
    notifier: Notifier,
    timings: Timings,
}

impl ReconciliationLoops {
    pub fn new(
        registry: ServiceRegistry,
        git: GitOperations,
        sampler: Arc<dyn ProcessSampler>,
        notifier: Notifier,
        timings: Timings,
    ) -> Self {
        Self {
            registry,
            git,
            sampler,
            notifier,
            timings,
        }
    }

    /// Record the checked-out branch of every cloned service, and reset the
    /// branch fields of services whose checkout is gone.
    pub async fn discover_branches(&self) -> bool {
        let mut changed = false;
        for name in self.registry.names() {
            let result = if self.registry.is_cloned(&name) {
                match self.git.current_branch(&name).await {
                    Ok(Some(branch)) => self.registry.set_branch(&name, &branch),
                    Ok(None) => self.registry.reset_branch_fields(&name),
                    Err(e) => Err(e),
                }
            } else {
                self.registry.reset_branch_fields(&name)
            };
            changed |= self.tolerate(&name, "branch discovery", result);
        }
        changed
    }

    /// Update the dirty flag of every service with a known branch.
    pub async fn check_dirty(&self) -> bool {
        let mut changed = false;
        for name in self.registry.names() {
            if !self.registry.has_branch(&name) {
                continue;
            }
            let result = match self.git.has_uncommitted_changes(&name).await {
                Ok(Some(dirty)) => self.registry.set_has_changes(&name, dirty),
                Ok(None) => Ok(false),
                Err(e) => Err(e),
            };
            changed |= self.tolerate(&name, "dirty check", result);
        }
        changed
    }

    /// Quiet fetch + ahead/behind refresh of one service.
    pub async fn refresh_service(&self, service: &str) -> bool {
        let result = self.git.refresh_status(service, false).await;
        self.tolerate(service, "status refresh", result)
    }

    /// Sample every service's process tree. Services without an attached
    /// process report zero. Emits one monitor message when anything changed.
    pub async fn sample_resources(&self) -> bool {
        let mut changed = false;
        let mut samples = Vec::new();

        for name in self.registry.names() {
            let stats = match self.registry.attached_process(&name) {
                Ok(Some(process)) => {
                    let sampler = Arc::clone(&self.sampler);
                    let pid = process.pid;
                    match tokio::task::spawn_blocking(move || sampler.sample_tree(pid)).await {
                        Ok(stats) => round_stats(stats),
                        Err(e) => {
                            warn!(service = %name, error = %e, "resource sampling failed");
                            continue;
                        }
                    }
                }
                Ok(None) => MonitorStats::ZERO,
                Err(e) => {
                    warn!(service = %name, error = %e, "resource sampling failed");
                    continue;
                }
            };
            changed |= self.tolerate(
                &name,
                "resource sampling",
                self.registry.set_monitor_stats(&name, stats),
            );
            samples.push(MonitorSample {
                service: name,
                cpu_percent: stats.cpu_percent,
                memory_mega_bytes: stats.memory_mega_bytes,
            });
        }

        if changed {
            self.notifier.monitor(samples);
        }
        changed
    }

    /// Spawn every loop. They stop when `cancel` fires.
    pub fn spawn(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let poll = self.timings.poll_interval;
        let mut handles = Vec::new();

        let this = self.clone();
        handles.push(spawn_periodic("branch-discovery", poll, cancel.clone(), move || {
            let this = this.clone();
            async move {
                if this.discover_branches().await {
                    this.notifier.status_changed();
                }
            }
        }));

        let this = self.clone();
        handles.push(spawn_periodic("dirty-check", poll, cancel.clone(), move || {
            let this = this.clone();
            async move {
                if this.check_dirty().await {
                    this.notifier.status_changed();
                }
            }
        }));

        let this = self.clone();
        handles.push(spawn_periodic("resource-sampling", poll, cancel.clone(), move || {
            let this = this.clone();
            async move {
                this.sample_resources().await;
            }
        }));

        if let Some(every) = self.timings.git_interval {
            for name in self.registry.names() {
                let this = self.clone();
                handles.push(spawn_periodic("status-refresh", every, cancel.clone(), move || {
                    let this = this.clone();
                    let name = name.clone();
                    async move {
                        if this.refresh_service(&name).await {
                            this.notifier.status_changed();
                        }
                    }
                }));
            }
        } else {
            info!("per-service status refresh disabled");
        }

        handles
    }

    fn tolerate(&self, service: &str, pass: &str, result: crate::errors::Result<bool>) -> bool {
        match result {
            Ok(changed) => changed,
            Err(e) => {
                warn!(service, pass, error = %e, "reconciliation failed for service");
                false
            }
        }
    }
}

/// Run `pass` every `period` (first run after one period) until cancelled.
/// A slow pass delays the next tick instead of overlapping it.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(reconcile_loop = name, ?period, "loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = pass() => {}
                    }
                }
            }
        }
        debug!(reconcile_loop = name, "loop stopped");
    })
}
