// src/engine/runtime.rs

//! Async entry points behind the CLI modes.
//!
//! Every mode prints push messages to stdout as one JSON object per line;
//! diagnostics go to stderr through `tracing`.

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Engine;
use crate::broadcast::PushMessage;
use crate::tasks::{BuiltinTask, TaskOutcome};

/// Upper bound for the printer to drain after shutdown.
const PRINTER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run the fleet until Ctrl-C.
pub async fn run_daemon(mut engine: Engine) -> Result<()> {
    let printer = Printer::spawn(engine.subscribe());
    engine.start_loops();
    info!("devfleet running; press Ctrl-C to stop");

    wait_for_ctrl_c().await?;
    engine.shutdown().await;
    printer.finish().await;
    Ok(())
}

/// Execute one task, stream its messages, and return its outcome.
///
/// A successful `START_SERVICE` keeps the service (and the output stream)
/// alive until Ctrl-C.
pub async fn run_task(
    engine: Engine,
    task: &str,
    service: &str,
    attributes: HashMap<String, String>,
) -> Result<TaskOutcome> {
    let printer = Printer::spawn(engine.subscribe());

    let result = engine
        .orchestrator()
        .execute(task, service, &attributes)
        .await;

    if matches!(result, Ok(TaskOutcome::Succeeded))
        && BuiltinTask::from_name(task) == Some(BuiltinTask::StartService)
    {
        info!(service, "service is running; press Ctrl-C to stop");
        wait_for_ctrl_c().await?;
    }

    engine.shutdown().await;
    printer.finish().await;

    let outcome = result.with_context(|| format!("task {task} on service {service}"))?;
    print_json(&outcome)?;
    Ok(outcome)
}

/// Run one package script and return its outcome.
pub async fn run_script(engine: Engine, service: &str, script: &str) -> Result<TaskOutcome> {
    let printer = Printer::spawn(engine.subscribe());
    let result = engine.orchestrator().run_script(service, script).await;
    engine.shutdown().await;
    printer.finish().await;

    let outcome = result.with_context(|| format!("script {script} on service {service}"))?;
    print_json(&outcome)?;
    Ok(outcome)
}

/// Print the aggregate status after one branch-discovery pass.
pub async fn print_status(engine: Engine) -> Result<()> {
    engine.loops().discover_branches().await;
    engine.loops().check_dirty().await;

    let status = engine.status();
    let text = serde_json::to_string_pretty(&status).context("serialising status")?;
    println!("{text}");
    engine.shutdown().await;
    Ok(())
}

/// Writes every push message to stdout until told to finish.
struct Printer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Printer {
    fn spawn(mut rx: broadcast::Receiver<PushMessage>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(message) => print_message(&message),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "stdout printer lagged behind; messages dropped");
                        }
                        Err(RecvError::Closed) => return,
                    },
                }
            }
            loop {
                match rx.try_recv() {
                    Ok(message) => print_message(&message),
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(_) => break,
                }
            }
            debug!("stdout printer stopped");
        });
        Self { cancel, handle }
    }

    /// Print whatever is still queued, then stop.
    async fn finish(self) {
        self.cancel.cancel();
        if tokio::time::timeout(PRINTER_DRAIN_TIMEOUT, self.handle)
            .await
            .is_err()
        {
            warn!("stdout printer did not stop in time");
        }
    }
}

fn print_message(message: &PushMessage) {
    if let Err(e) = print_json(message) {
        warn!(error = %e, "failed to print push message");
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}

async fn wait_for_ctrl_c() -> Result<()> {
    if let Err(e) = tokio::signal::ctrl_c().await {
        bail!("failed to listen for Ctrl+C: {e}");
    }
    info!("Ctrl-C received");
    Ok(())
}
