// src/broadcast/scheduler.rs

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::{LogInput, Notifier, PUSH_CHANNEL_CAPACITY, PushMessage};
use crate::logs::{LogAggregator, LogEntry};

/// Single consumer of all log input. Owns the aggregator and the pending
/// batch.
#[derive(Debug)]
pub struct BroadcastScheduler {
    log_rx: mpsc::UnboundedReceiver<LogInput>,
    push_tx: broadcast::Sender<PushMessage>,
    aggregator: LogAggregator,
    pending: Vec<LogEntry>,
    flush_interval: Duration,
}

impl BroadcastScheduler {
    /// Create the scheduler and the first producer handle.
    pub fn new(flush_interval: Duration) -> (Self, Notifier) {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (push_tx, _) = broadcast::channel(PUSH_CHANNEL_CAPACITY);
        let notifier = Notifier {
            log_tx,
            push_tx: push_tx.clone(),
        };
        let scheduler = Self {
            log_rx,
            push_tx,
            aggregator: LogAggregator::new(),
            pending: Vec::new(),
            flush_interval,
        };
        (scheduler, notifier)
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Run until cancelled or every [`Notifier`] is dropped, flushing once
    /// more on the way out.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        info!(interval = ?self.flush_interval, "log broadcast scheduler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    while let Ok(input) = self.log_rx.try_recv() {
                        self.handle(input);
                    }
                    break;
                }
                maybe = self.log_rx.recv() => match maybe {
                    Some(input) => self.handle(input),
                    None => break,
                },
                _ = ticker.tick() => self.flush(),
            }
        }
        self.flush();
        debug!("log broadcast scheduler stopped");
    }

    fn handle(&mut self, input: LogInput) {
        match input {
            LogInput::Output { service, chunk } => {
                let entries = self.aggregator.feed(&service, &chunk);
                for entry in &entries {
                    if let Some(line) = &entry.line {
                        trace!(service = %service, "{}", line);
                    }
                }
                self.pending.extend(entries);
            }
            LogInput::Info { service, line } => {
                debug!(service = %service, "{}", line);
                self.pending.push(LogEntry::info(&service, line));
            }
            LogInput::OutputClosed { service } => self.aggregator.discard(&service),
            LogInput::Flush(ack) => {
                self.flush();
                let _ = ack.send(());
            }
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        trace!(entries = batch.len(), "flushing log batch");
        let _ = self.push_tx.send(PushMessage::Log(batch));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_are_batched_until_flush() {
        let (scheduler, notifier) = BroadcastScheduler::new(Duration::from_secs(3600));
        let mut rx = notifier.subscribe();
        let cancel = CancellationToken::new();
        let handle = scheduler.spawn(cancel.clone());

        notifier.output("web", "one\ntwo\n");
        notifier.info("web", "Running command: \"git clone https://u:p@host/x\"");
        notifier.flush().await;

        match rx.recv().await.unwrap() {
            PushMessage::Log(batch) => {
                let lines: Vec<_> = batch.iter().filter_map(|e| e.line.clone()).collect();
                assert_eq!(
                    lines,
                    vec![
                        "one".to_string(),
                        "two".to_string(),
                        "Running command: \"git clone https://***@host/x\"".to_string(),
                    ]
                );
                assert!(batch[2].info);
            }
            other => panic!("expected log batch, got {other:?}"),
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn closed_output_drops_an_unfinished_json_object() {
        let (scheduler, notifier) = BroadcastScheduler::new(Duration::from_secs(3600));
        let mut rx = notifier.subscribe();
        let cancel = CancellationToken::new();
        let handle = scheduler.spawn(cancel.clone());

        notifier.output("web", "{\n  \"level\": \"info\",\n");
        notifier.output_closed("web");
        notifier.output("web", "restarted\n");
        notifier.flush().await;

        match rx.recv().await.unwrap() {
            PushMessage::Log(batch) => {
                assert_eq!(batch.len(), 1);
                assert!(!batch[0].is_json);
                assert_eq!(batch[0].line.as_deref(), Some("restarted"));
            }
            other => panic!("expected log batch, got {other:?}"),
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn status_pulses_bypass_the_batch() {
        let (scheduler, notifier) = BroadcastScheduler::new(Duration::from_secs(3600));
        let mut rx = notifier.subscribe();
        let cancel = CancellationToken::new();
        let handle = scheduler.spawn(cancel.clone());

        notifier.status_changed();
        assert_eq!(rx.recv().await.unwrap(), PushMessage::StatusUpdate);

        cancel.cancel();
        handle.await.unwrap();
    }
}
