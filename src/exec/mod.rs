// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`command`] describes what to run and what came back.
//! - [`process`] spawns children and streams their output in chunks.
//! - [`kill`] terminates a whole process tree.
//! - [`proctree`] reads descendants and usage counters from `/proc`.
//! - [`backend`] provides the `CommandBackend` trait used for short-lived
//!   commands, and the real implementation; tests swap in a scripted one.
//! - [`logged`] narrates service commands into the log stream.

pub mod backend;
pub mod command;
pub mod kill;
pub mod logged;
pub mod proctree;
pub mod process;

pub use backend::{BackendFuture, CommandBackend, RealCommandBackend};
pub use command::{CommandLine, CommandOutput, redact_credentials};
pub use kill::kill_tree;
pub use logged::ServiceCommands;
pub use process::{
    OutputChunk, OutputSink, ProcessHandle, ProcessRunner, StreamKind, discard_output,
};
