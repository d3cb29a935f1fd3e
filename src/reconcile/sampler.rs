// src/reconcile/sampler.rs

//! CPU and memory sampling of a process tree.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::exec::proctree;
use crate::registry::MonitorStats;

/// Measures the aggregate resource usage of a process and its descendants.
pub trait ProcessSampler: Send + Sync {
    fn sample_tree(&self, root: u32) -> MonitorStats;
}

#[derive(Debug, Clone, Copy)]
struct CpuMark {
    ticks: u64,
    at: Instant,
}

/// `/proc` based sampler.
///
/// CPU percent is the share of one core used since the previous sample of
/// the same pid; a pid seen for the first time contributes zero.
///
/// Baselines are kept per root and hold only the pids of the latest walk.
/// Roots that no longer exist are forgotten on the next sample.
#[derive(Debug)]
pub struct ProcfsSampler {
    clock_ticks: f64,
    previous: Mutex<HashMap<u32, HashMap<u32, CpuMark>>>,
}

impl ProcfsSampler {
    pub fn new() -> Self {
        Self {
            clock_ticks: clock_ticks_per_second(),
            previous: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for ProcfsSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSampler for ProcfsSampler {
    fn sample_tree(&self, root: u32) -> MonitorStats {
        let mut pids = vec![root];
        pids.extend(proctree::descendants(root));

        let now = Instant::now();
        let mut previous = self.previous.lock().unwrap_or_else(PoisonError::into_inner);
        previous.retain(|r, _| *r == root || proctree::read_stat(*r).is_some());

        let last = previous.remove(&root).unwrap_or_default();
        let mut marks = HashMap::with_capacity(pids.len());
        let mut cpu_percent = 0.0;
        let mut rss_kb: u64 = 0;

        for pid in &pids {
            let Some(stat) = proctree::read_stat(*pid) else {
                continue;
            };
            rss_kb += proctree::read_rss_kb(*pid).unwrap_or(0);

            if let Some(prev) = last.get(pid) {
                let elapsed = now.duration_since(prev.at).as_secs_f64();
                if elapsed > 0.0 {
                    let used = stat.cpu_ticks.saturating_sub(prev.ticks) as f64 / self.clock_ticks;
                    cpu_percent += used / elapsed * 100.0;
                }
            }
            marks.insert(
                *pid,
                CpuMark {
                    ticks: stat.cpu_ticks,
                    at: now,
                },
            );
        }

        if !marks.is_empty() {
            previous.insert(root, marks);
        }

        MonitorStats {
            cpu_percent,
            memory_mega_bytes: rss_kb as f64 / 1024.0,
        }
    }
}

#[cfg(test)]
impl ProcfsSampler {
    fn tracked_roots(&self) -> usize {
        self.previous
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(unix)]
fn clock_ticks_per_second() -> f64 {
    use nix::unistd::{SysconfVar, sysconf};
    match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(ticks)) if ticks > 0 => ticks as f64,
        _ => 100.0,
    }
}

#[cfg(not(unix))]
fn clock_ticks_per_second() -> f64 {
    100.0
}

/// Round to two decimals, as shown to observers.
pub fn round_stats(stats: MonitorStats) -> MonitorStats {
    MonitorStats {
        cpu_percent: (stats.cpu_percent * 100.0).round() / 100.0,
        memory_mega_bytes: (stats.memory_mega_bytes * 100.0).round() / 100.0,
    }
}
