// src/logs/aggregator.rs

//! Line splitting and multi-line JSON reassembly.
//!
//! Each service has at most one open reassembly buffer. A buffer opens on a
//! fragment whose trimmed form starts with `{` and closes when the brace
//! depth returns to zero. Braces inside JSON strings are not counted.
//!
//! Fragments inside a buffer are kept verbatim and concatenated without a
//! separator: a chunk boundary that falls mid-line must not inject
//! whitespace into a string value.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use super::LogEntry;

/// Buffers larger than this are discarded as runaway input.
pub const MAX_BUFFER_BYTES: usize = 1 << 20;

#[derive(Debug, Default)]
struct JsonBuffer {
    text: String,
    depth: u32,
    in_string: bool,
    escaped: bool,
}

impl JsonBuffer {
    /// Append as much of `fragment` as belongs to the object. Returns the
    /// byte offset just past the closing brace, if it was reached.
    fn push(&mut self, fragment: &str) -> Option<usize> {
        for (i, ch) in fragment.char_indices() {
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if ch == '\\' {
                    self.escaped = true;
                } else if ch == '"' {
                    self.in_string = false;
                }
                continue;
            }
            match ch {
                '"' => self.in_string = true,
                '{' => self.depth += 1,
                '}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        let end = i + ch.len_utf8();
                        self.text.push_str(&fragment[..end]);
                        return Some(end);
                    }
                }
                _ => {}
            }
        }
        self.text.push_str(fragment);
        None
    }
}

/// Turns raw output chunks into log entries. Owned by a single consumer.
#[derive(Debug, Default)]
pub struct LogAggregator {
    buffers: HashMap<String, JsonBuffer>,
}

impl LogAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one raw chunk of `service` output.
    pub fn feed(&mut self, service: &str, chunk: &str) -> Vec<LogEntry> {
        let mut out = Vec::new();
        for fragment in chunk.split('\n') {
            let fragment = fragment.strip_suffix('\r').unwrap_or(fragment);
            self.process_fragment(service, fragment, &mut out);
        }
        out
    }

    /// Whether `service` has a partially reassembled JSON object.
    pub fn has_open_buffer(&self, service: &str) -> bool {
        self.buffers.contains_key(service)
    }

    /// Drop the open buffer of `service`, if any.
    pub fn discard(&mut self, service: &str) {
        if self.buffers.remove(service).is_some() {
            debug!(service, "discarded partial JSON buffer");
        }
    }

    fn process_fragment(&mut self, service: &str, fragment: &str, out: &mut Vec<LogEntry>) {
        let mut rest = fragment;
        loop {
            if let Some(buffer) = self.buffers.get_mut(service) {
                if rest.is_empty() {
                    return;
                }
                let Some(end) = buffer.push(rest) else {
                    if buffer.text.len() > MAX_BUFFER_BYTES {
                        warn!(
                            service,
                            bytes = buffer.text.len(),
                            "JSON log buffer exceeded limit; discarding"
                        );
                        self.buffers.remove(service);
                    }
                    return;
                };

                if let Some(buffer) = self.buffers.remove(service) {
                    match serde_json::from_str::<Value>(&buffer.text) {
                        Ok(payload) => out.push(LogEntry::json(service, payload)),
                        Err(e) => warn!(
                            service,
                            error = %e,
                            "dropping malformed JSON log payload"
                        ),
                    }
                }
                // Whatever follows the closing brace is a line of its own.
                rest = &rest[end..];
                continue;
            }

            let trimmed = rest.trim();
            if trimmed.is_empty() {
                return;
            }
            if trimmed.starts_with('{') {
                self.buffers.insert(service.to_string(), JsonBuffer::default());
                rest = rest.trim_start();
                continue;
            }
            out.push(LogEntry::plain(service, trimmed));
            return;
        }
    }
}
