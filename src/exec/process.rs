// src/exec/process.rs

//! Child process spawning with chunked output delivery.

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::command::{CommandLine, CommandOutput};
use super::kill::kill_tree;

/// Collected output beyond this many bytes per stream is still delivered to
/// the sink but not kept for the final [`CommandOutput`].
const MAX_COLLECTED_BYTES: usize = 1 << 20;

/// After the child exits, grandchildren may still hold the pipes open.
const READER_DRAIN_GRACE: Duration = Duration::from_secs(2);

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// A raw piece of child output. Not line-aligned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: StreamKind,
    pub text: String,
}

/// Receives output chunks as they are read, from the reader tasks.
pub type OutputSink = Arc<dyn Fn(OutputChunk) + Send + Sync>;

/// A sink that drops everything.
pub fn discard_output() -> OutputSink {
    Arc::new(|_| {})
}

/// Handle to a spawned child. Cheap to clone; every clone observes the same
/// exit.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    id: u64,
    pid: u32,
    exit_rx: watch::Receiver<Option<Arc<CommandOutput>>>,
}

impl ProcessHandle {
    /// Unique per spawn for the lifetime of this process.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_finished(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Wait for the child to exit and its output to drain.
    pub async fn wait(&self) -> CommandOutput {
        let mut rx = self.exit_rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(exit) => exit.as_deref().cloned().unwrap_or_default(),
            // Waiter task vanished (runtime shutting down).
            Err(_) => CommandOutput::default(),
        }
    }

    /// Terminate the child and all of its descendants. No-op once exited.
    pub fn kill(&self) -> Result<()> {
        if self.is_finished() {
            return Ok(());
        }
        kill_tree(self.pid)
    }
}

/// Spawns commands with piped output and a null stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Spawn `command` in `cwd`, forwarding output chunks to `sink`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        &self,
        command: &CommandLine,
        cwd: &Path,
        sink: OutputSink,
    ) -> Result<ProcessHandle> {
        let mut cmd = command.to_command();
        cmd.current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so the whole tree can be signalled at once.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning '{command}' in {}", cwd.display()))?;
        let pid = child
            .id()
            .with_context(|| format!("'{command}' exited before its pid was read"))?;
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);

        debug!(handle = id, pid, cmd = %command, cwd = %cwd.display(), "spawned process");

        let stdout = child
            .stdout
            .take()
            .map(|s| tokio::spawn(pump(s, StreamKind::Stdout, Arc::clone(&sink))));
        let stderr = child
            .stderr
            .take()
            .map(|s| tokio::spawn(pump(s, StreamKind::Stderr, Arc::clone(&sink))));

        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(handle = id, pid, error = %e, "failed to wait for child process");
                    None
                }
            };
            let stdout = drain(stdout).await;
            let stderr = drain(stderr).await;

            debug!(handle = id, pid, ?exit_code, "process exited");
            let _ = exit_tx.send(Some(Arc::new(CommandOutput {
                stdout: stdout.trim().to_string(),
                stderr: stderr.trim().to_string(),
                exit_code,
            })));
        });

        Ok(ProcessHandle { id, pid, exit_rx })
    }

    /// Spawn and wait for completion.
    pub async fn run(
        &self,
        command: &CommandLine,
        cwd: &Path,
        sink: OutputSink,
    ) -> Result<CommandOutput> {
        Ok(self.spawn(command, cwd, sink)?.wait().await)
    }

    pub fn kill(&self, handle: &ProcessHandle) -> Result<()> {
        handle.kill()
    }
}

async fn drain(reader: Option<JoinHandle<String>>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    match tokio::time::timeout(READER_DRAIN_GRACE, &mut reader).await {
        Ok(Ok(collected)) => collected,
        Ok(Err(e)) => {
            debug!(error = %e, "output reader task failed");
            String::new()
        }
        Err(_) => {
            debug!("output pipe still open after exit; abandoning reader");
            reader.abort();
            String::new()
        }
    }
}

async fn pump<R>(mut reader: R, stream: StreamKind, sink: OutputSink) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8 * 1024];
    let mut pending = Vec::new();
    let mut collected = String::new();

    let deliver = |text: String, collected: &mut String| {
        if text.is_empty() {
            return;
        }
        if collected.len() < MAX_COLLECTED_BYTES {
            collected.push_str(&text);
        }
        sink(OutputChunk { stream, text });
    };

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = decode_utf8(&mut pending, &buf[..n]);
                deliver(text, &mut collected);
            }
            Err(e) => {
                debug!(?stream, error = %e, "error reading child output");
                break;
            }
        }
    }

    if !pending.is_empty() {
        let text = String::from_utf8_lossy(&pending).into_owned();
        deliver(text, &mut collected);
    }
    collected
}

/// Decode `bytes` appended to `pending`, holding back a trailing partial
/// UTF-8 sequence for the next read.
fn decode_utf8(pending: &mut Vec<u8>, bytes: &[u8]) -> String {
    pending.extend_from_slice(bytes);
    match std::str::from_utf8(&pending[..]) {
        Ok(s) => {
            let s = s.to_string();
            pending.clear();
            s
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let s = String::from_utf8_lossy(&pending[..valid]).into_owned();
            pending.drain(..valid);
            s
        }
        Err(_) => {
            let s = String::from_utf8_lossy(pending).into_owned();
            pending.clear();
            s
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn split_multibyte_sequence_is_held_back() {
        let mut pending = Vec::new();
        let bytes = "héllo".as_bytes();
        // Split inside the two-byte 'é'.
        let first = decode_utf8(&mut pending, &bytes[..2]);
        assert_eq!(first, "h");
        assert_eq!(pending.len(), 1);
        let second = decode_utf8(&mut pending, &bytes[2..]);
        assert_eq!(second, "éllo");
        assert!(pending.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_collects_trimmed_output_and_exit_code() {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&chunks);
        let sink: OutputSink = Arc::new(move |c: OutputChunk| seen.lock().unwrap().push(c));

        let out = ProcessRunner::new()
            .run(
                &CommandLine::shell("echo hello; echo oops >&2; exit 3"),
                Path::new("."),
                sink,
            )
            .await
            .unwrap();

        assert_eq!(out.stdout, "hello");
        assert_eq!(out.stderr, "oops");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());

        let chunks = chunks.lock().unwrap();
        assert!(chunks.iter().any(|c| c.stream == StreamKind::Stderr));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_terminates_the_tree_and_is_idempotent() {
        let handle = ProcessRunner::new()
            .spawn(&CommandLine::shell("sleep 30"), Path::new("."), discard_output())
            .unwrap();
        assert!(!handle.is_finished());

        handle.kill().unwrap();
        let out = tokio::time::timeout(Duration::from_secs(10), handle.wait())
            .await
            .expect("process should exit after kill");
        assert!(!out.success());
        assert!(handle.is_finished());
        handle.kill().unwrap();
    }

    #[tokio::test]
    async fn spawning_in_missing_directory_fails() {
        let err = ProcessRunner::new()
            .spawn(
                &CommandLine::shell("true"),
                Path::new("/definitely/not/here"),
                discard_output(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("spawning"));
    }
}
