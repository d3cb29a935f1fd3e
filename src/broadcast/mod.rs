// src/broadcast/mod.rs

//! Push channel to observers.
//!
//! Producers hold a [`Notifier`]. Raw output and synthetic info lines go
//! through one mpsc queue to the [`BroadcastScheduler`], which owns the
//! [`LogAggregator`](crate::logs::LogAggregator) and flushes entries as one
//! batch per timer tick. Status pulses and monitor samples skip the queue and
//! go straight to the broadcast channel.
//!
//! - [`scheduler`] contains the flush loop.

pub mod scheduler;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::debug;

use crate::exec::redact_credentials;
use crate::logs::LogEntry;

pub use scheduler::BroadcastScheduler;

/// Capacity of the observer channel. Slow subscribers lag rather than block
/// producers.
pub const PUSH_CHANNEL_CAPACITY: usize = 256;

/// One message on the push channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum PushMessage {
    Log(Vec<LogEntry>),
    /// No payload; subscribers re-query status.
    StatusUpdate,
    MonitorStats(Vec<MonitorSample>),
}

/// Per-service resource usage, rounded for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSample {
    pub service: String,
    pub cpu_percent: f64,
    pub memory_mega_bytes: f64,
}

#[derive(Debug)]
pub(crate) enum LogInput {
    Output { service: String, chunk: String },
    Info { service: String, line: String },
    OutputClosed { service: String },
    Flush(oneshot::Sender<()>),
}

/// Cheap-to-clone producer handle.
#[derive(Debug, Clone)]
pub struct Notifier {
    log_tx: mpsc::UnboundedSender<LogInput>,
    push_tx: broadcast::Sender<PushMessage>,
}

impl Notifier {
    /// Raw process output for `service`; split and reassembled downstream.
    pub fn output(&self, service: &str, chunk: impl Into<String>) {
        self.send_log(LogInput::Output {
            service: service.to_string(),
            chunk: chunk.into(),
        });
    }

    /// A synthetic line attributed to `service`. URL credentials are masked.
    pub fn info(&self, service: &str, line: impl AsRef<str>) {
        self.send_log(LogInput::Info {
            service: service.to_string(),
            line: redact_credentials(line.as_ref()).into_owned(),
        });
    }

    /// The output streams of `service`'s process are closed; an unfinished
    /// JSON object will never complete.
    pub fn output_closed(&self, service: &str) {
        self.send_log(LogInput::OutputClosed {
            service: service.to_string(),
        });
    }

    pub fn status_changed(&self) {
        self.push(PushMessage::StatusUpdate);
    }

    pub fn monitor(&self, samples: Vec<MonitorSample>) {
        self.push(PushMessage::MonitorStats(samples));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushMessage> {
        self.push_tx.subscribe()
    }

    /// Flush queued log entries now and wait until the batch was sent.
    ///
    /// Returns immediately if the scheduler is gone.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.log_tx.send(LogInput::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn send_log(&self, input: LogInput) {
        if self.log_tx.send(input).is_err() {
            debug!("log scheduler stopped; dropping log input");
        }
    }

    fn push(&self, message: PushMessage) {
        // No subscribers is not an error.
        let _ = self.push_tx.send(message);
    }
}
