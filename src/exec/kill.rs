// src/exec/kill.rs

//! Process-tree termination.

use anyhow::Result;

/// Send SIGTERM to `pid`, its process group and every descendant.
///
/// Processes that are already gone are ignored.
#[cfg(unix)]
pub fn kill_tree(pid: u32) -> Result<()> {
    use anyhow::Context;
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill, killpg};
    use nix::unistd::Pid;
    use tracing::debug;

    let raw = i32::try_from(pid).with_context(|| format!("pid {pid} out of range"))?;

    // Collect first: once the root dies its children are re-parented.
    let descendants = super::proctree::descendants(pid);
    debug!(pid, descendants = descendants.len(), "killing process tree");

    match killpg(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!(pid, error = %e, "killpg failed"),
    }

    for child in descendants.iter().rev() {
        let Ok(child) = i32::try_from(*child) else {
            continue;
        };
        match kill(Pid::from_raw(child), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => debug!(pid = child, error = %e, "kill failed"),
        }
    }

    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("failed to signal pid {pid}: {e}")),
    }
}

#[cfg(windows)]
pub fn kill_tree(pid: u32) -> Result<()> {
    use anyhow::Context;

    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .context("running taskkill")?;
    // 128: no such process.
    if status.success() || status.code() == Some(128) {
        Ok(())
    } else {
        anyhow::bail!("taskkill exited with {status}")
    }
}
