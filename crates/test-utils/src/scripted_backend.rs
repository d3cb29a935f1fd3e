#![allow(dead_code)]

//! A `CommandBackend` that answers from rules instead of spawning processes.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use devfleet::exec::{
    BackendFuture, CommandBackend, CommandLine, CommandOutput, OutputChunk, OutputSink, StreamKind,
};

type Responder = Arc<dyn Fn(&CommandLine, &Path) -> CommandOutput + Send + Sync>;

enum Reply {
    Fixed(CommandOutput),
    /// Consumed front to back; the last output repeats.
    Sequence(Mutex<VecDeque<CommandOutput>>),
    Dynamic(Responder),
    SpawnError(String),
}

struct Rule {
    prefix: String,
    reply: Reply,
}

/// One command the backend was asked to run.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub command: CommandLine,
    /// Display form, e.g. `git status -s -b`.
    pub display: String,
    pub cwd: PathBuf,
    pub streamed: bool,
}

/// Rules match on a prefix of the command's display form. The most recently
/// registered matching rule wins; unmatched commands succeed with no output.
#[derive(Default)]
pub struct ScriptedBackend {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, prefix: &str, output: CommandOutput) -> &Self {
        self.push(prefix, Reply::Fixed(output))
    }

    pub fn respond_seq(&self, prefix: &str, outputs: Vec<CommandOutput>) -> &Self {
        assert!(!outputs.is_empty(), "respond_seq needs at least one output");
        self.push(prefix, Reply::Sequence(Mutex::new(outputs.into())))
    }

    pub fn respond_with<F>(&self, prefix: &str, f: F) -> &Self
    where
        F: Fn(&CommandLine, &Path) -> CommandOutput + Send + Sync + 'static,
    {
        self.push(prefix, Reply::Dynamic(Arc::new(f)))
    }

    /// The command cannot be started at all.
    pub fn fail(&self, prefix: &str, message: &str) -> &Self {
        self.push(prefix, Reply::SpawnError(message.to_string()))
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.display).collect()
    }

    fn push(&self, prefix: &str, reply: Reply) -> &Self {
        self.rules.lock().unwrap().push(Rule {
            prefix: prefix.to_string(),
            reply,
        });
        self
    }

    fn answer(&self, command: &CommandLine, cwd: &Path, streamed: bool) -> anyhow::Result<CommandOutput> {
        let display = command.to_string();
        self.calls.lock().unwrap().push(RecordedCall {
            command: command.clone(),
            display: display.clone(),
            cwd: cwd.to_path_buf(),
            streamed,
        });

        let responder = {
            let rules = self.rules.lock().unwrap();
            let Some(rule) = rules.iter().rev().find(|r| display.starts_with(&r.prefix)) else {
                return Ok(CommandOutput::ok(""));
            };
            match &rule.reply {
                Reply::Fixed(out) => return Ok(out.clone()),
                Reply::Sequence(queue) => {
                    let mut queue = queue.lock().unwrap();
                    let out = if queue.len() > 1 {
                        queue.pop_front().unwrap()
                    } else {
                        queue.front().cloned().unwrap()
                    };
                    return Ok(out);
                }
                Reply::SpawnError(message) => return Err(anyhow::anyhow!(message.clone())),
                Reply::Dynamic(f) => Arc::clone(f),
            }
        };
        // Called outside the lock so responders may register new rules.
        Ok(responder(command, cwd))
    }
}

impl CommandBackend for ScriptedBackend {
    fn capture(&self, command: CommandLine, cwd: PathBuf) -> BackendFuture<'_> {
        Box::pin(async move { self.answer(&command, &cwd, false) })
    }

    fn stream(&self, command: CommandLine, cwd: PathBuf, sink: OutputSink) -> BackendFuture<'_> {
        Box::pin(async move {
            let out = self.answer(&command, &cwd, true)?;
            if !out.stdout.is_empty() {
                sink(OutputChunk {
                    stream: StreamKind::Stdout,
                    text: out.stdout.clone(),
                });
            }
            if !out.stderr.is_empty() {
                sink(OutputChunk {
                    stream: StreamKind::Stderr,
                    text: out.stderr.clone(),
                });
            }
            Ok(out)
        })
    }
}
