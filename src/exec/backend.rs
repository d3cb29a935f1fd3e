// src/exec/backend.rs

//! Pluggable command backend.
//!
//! Git operations, installs and custom tasks run short-lived commands through
//! a `CommandBackend` rather than spawning processes directly, so tests can
//! script command results without a real checkout or network.
//!
//! The long-lived run command of `START_SERVICE` does not go through the
//! backend: it needs a [`ProcessHandle`](super::ProcessHandle) that outlives
//! the call.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use anyhow::Result;

use super::command::{CommandLine, CommandOutput};
use super::process::{OutputSink, ProcessRunner, discard_output};

pub type BackendFuture<'a> = Pin<Box<dyn Future<Output = Result<CommandOutput>> + Send + 'a>>;

/// Runs commands to completion.
///
/// `Err` means the command could not be run at all (bad cwd, missing
/// binary). A non-zero exit is reported through [`CommandOutput::exit_code`].
pub trait CommandBackend: Send + Sync {
    /// Run and collect output without streaming it anywhere.
    fn capture(&self, command: CommandLine, cwd: PathBuf) -> BackendFuture<'_>;

    /// Run, forwarding output chunks to `sink` as they arrive.
    fn stream(&self, command: CommandLine, cwd: PathBuf, sink: OutputSink) -> BackendFuture<'_>;
}

/// Backend that spawns real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealCommandBackend {
    runner: ProcessRunner,
}

impl RealCommandBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CommandBackend for RealCommandBackend {
    fn capture(&self, command: CommandLine, cwd: PathBuf) -> BackendFuture<'_> {
        Box::pin(async move { self.runner.run(&command, &cwd, discard_output()).await })
    }

    fn stream(&self, command: CommandLine, cwd: PathBuf, sink: OutputSink) -> BackendFuture<'_> {
        Box::pin(async move { self.runner.run(&command, &cwd, sink).await })
    }
}
