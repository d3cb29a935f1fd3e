#![allow(dead_code)]

pub use devfleet_test_utils::builders;
pub use devfleet_test_utils::fixture::{FixedSampler, Fixture};
pub use devfleet_test_utils::scripted_backend::ScriptedBackend;
pub use devfleet_test_utils::{init_tracing, with_timeout};

use devfleet::broadcast::PushMessage;
use tokio::sync::broadcast;

/// Everything currently queued on a push receiver.
pub fn drain(rx: &mut broadcast::Receiver<PushMessage>) -> Vec<PushMessage> {
    let mut out = Vec::new();
    while let Ok(message) = rx.try_recv() {
        out.push(message);
    }
    out
}

/// Count of status pulses in `messages`.
pub fn status_pulses(messages: &[PushMessage]) -> usize {
    messages
        .iter()
        .filter(|m| matches!(m, PushMessage::StatusUpdate))
        .count()
}
