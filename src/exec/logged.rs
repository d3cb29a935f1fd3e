// src/exec/logged.rs

//! Commands run on behalf of a service, narrated into its log stream.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use super::backend::CommandBackend;
use super::command::{CommandLine, CommandOutput};
use super::process::OutputSink;
use crate::broadcast::Notifier;

/// Wraps a [`CommandBackend`] with the `Running command` / `Command
/// finished` info lines observers see around every user-visible command.
#[derive(Clone)]
pub struct ServiceCommands {
    backend: Arc<dyn CommandBackend>,
    notifier: Notifier,
}

impl ServiceCommands {
    pub fn new(backend: Arc<dyn CommandBackend>, notifier: Notifier) -> Self {
        Self { backend, notifier }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Run without any log lines.
    pub async fn quiet(&self, command: CommandLine, cwd: &Path) -> Result<CommandOutput> {
        self.backend.capture(command, cwd.to_path_buf()).await
    }

    /// Run, announcing start and finish but not forwarding output.
    pub async fn announced(
        &self,
        service: &str,
        command: CommandLine,
        cwd: &Path,
    ) -> Result<CommandOutput> {
        self.announce_start(service, &command, cwd);
        let result = self.backend.capture(command.clone(), cwd.to_path_buf()).await;
        self.announce_result(service, &command, &result);
        result
    }

    /// Run with output forwarded into the service's log stream.
    pub async fn streamed(
        &self,
        service: &str,
        command: CommandLine,
        cwd: &Path,
    ) -> Result<CommandOutput> {
        self.announce_start(service, &command, cwd);
        let sink = self.output_sink(service);
        let result = self
            .backend
            .stream(command.clone(), cwd.to_path_buf(), sink)
            .await;
        self.announce_result(service, &command, &result);
        result
    }

    /// Sink forwarding raw chunks of both streams to the aggregator.
    pub fn output_sink(&self, service: &str) -> OutputSink {
        let notifier = self.notifier.clone();
        let service = service.to_string();
        Arc::new(move |chunk| notifier.output(&service, chunk.text))
    }

    pub fn announce_start(&self, service: &str, command: &CommandLine, cwd: &Path) {
        info!(service, cmd = %command, "running command");
        self.notifier
            .info(service, format!("Running command: \"{command}\""));
        self.notifier
            .info(service, format!("-> in path: \"{}\"", cwd.display()));
    }

    pub fn announce_finish(&self, service: &str, command: &CommandLine, output: &CommandOutput) {
        self.notifier
            .info(service, format!("Command finished: \"{command}\""));
        match output.exit_code {
            Some(0) => {}
            Some(code) => {
                info!(service, cmd = %command, exit_code = code, "command exited with non-zero code");
                self.notifier
                    .info(service, format!("Command exited with code {code}"));
            }
            None => {
                info!(service, cmd = %command, "command terminated by signal");
                self.notifier
                    .info(service, "Command terminated without an exit code");
            }
        }
    }

    fn announce_result(
        &self,
        service: &str,
        command: &CommandLine,
        result: &Result<CommandOutput>,
    ) {
        match result {
            Ok(output) => self.announce_finish(service, command, output),
            Err(e) => {
                warn!(service, cmd = %command, error = %e, "command could not be run");
                self.notifier
                    .info(service, format!("Command failed to start: {e:#}"));
            }
        }
    }
}
