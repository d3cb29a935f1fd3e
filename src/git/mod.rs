// src/git/mod.rs

//! Git operations against service checkouts.
//!
//! Every operation re-checks that the service still has a branch right
//! before each command, because removal can run concurrently. A vanished
//! checkout is a clean abort, not an error. Command failures are logged
//! and reported through [`GitOutcome`]; only an unknown service is an `Err`.
//!
//! - [`status`] parses `git status -s -b`.

pub mod status;

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::exec::{CommandLine, CommandOutput, ServiceCommands};
use crate::registry::ServiceRegistry;

pub use status::{StatusSummary, parse_status};

/// How a git operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitOutcome {
    Completed,
    /// Nothing was done, e.g. the checkout disappeared or no upstream exists.
    Aborted(String),
    /// A git command failed; fields keep their last known values.
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Quiet,
    Announced,
    Streamed,
}

#[derive(Clone)]
pub struct GitOperations {
    registry: ServiceRegistry,
    commands: ServiceCommands,
}

impl GitOperations {
    pub fn new(registry: ServiceRegistry, commands: ServiceCommands) -> Self {
        Self { registry, commands }
    }

    /// Branch checked out in the service's directory, `None` when it is not
    /// a git checkout.
    pub async fn current_branch(&self, service: &str) -> Result<Option<String>> {
        let out = self
            .git(service, Mode::Quiet, ["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        Ok(out
            .filter(|o| o.success() && !o.stdout.is_empty())
            .map(|o| o.stdout))
    }

    /// `None` when the status could not be read.
    pub async fn has_uncommitted_changes(&self, service: &str) -> Result<Option<bool>> {
        let out = self.git(service, Mode::Quiet, ["status", "-s"]).await?;
        Ok(out
            .filter(CommandOutput::success)
            .map(|o| !o.stdout.is_empty()))
    }

    /// Fetch and re-read ahead/behind and the dirty flag. Returns whether
    /// any stored field changed.
    pub async fn refresh_status(&self, service: &str, with_logging: bool) -> Result<bool> {
        let mode = if with_logging { Mode::Announced } else { Mode::Quiet };

        if !self.still_has_branch(service, "fetch") {
            return Ok(false);
        }
        match self.git(service, mode, ["fetch", "origin"]).await? {
            Some(out) if out.success() => {}
            Some(out) => debug!(
                service,
                exit_code = ?out.exit_code,
                stderr = %out.stderr,
                "fetch failed; reading local status only"
            ),
            None => return Ok(false),
        }

        if !self.still_has_branch(service, "status") {
            return Ok(false);
        }
        let Some(out) = self.git(service, mode, ["status", "-s", "-b"]).await? else {
            return Ok(false);
        };
        if !out.success() {
            warn!(service, exit_code = ?out.exit_code, "git status failed");
            return Ok(false);
        }

        if !self.still_has_branch(service, "update") {
            return Ok(false);
        }
        let summary = parse_status(&out.stdout);
        let counts = self
            .registry
            .set_ahead_behind(service, summary.ahead, summary.behind)?;
        let dirty = self.registry.set_has_changes(service, summary.dirty)?;
        Ok(counts || dirty)
    }

    /// Fetch the current branch and fast-forward to it.
    pub async fn pull(&self, service: &str) -> Result<GitOutcome> {
        if !self.still_has_branch(service, "pull") {
            return Ok(aborted_missing());
        }
        let branch = match self
            .git(service, Mode::Quiet, ["symbolic-ref", "--short", "HEAD"])
            .await?
        {
            Some(out) if out.success() && !out.stdout.is_empty() => out.stdout,
            _ => {
                self.commands
                    .notifier()
                    .info(service, "Not on a branch; nothing to pull");
                return Ok(GitOutcome::Aborted("not on a branch".into()));
            }
        };

        if !self.still_has_branch(service, "fetch") {
            return Ok(aborted_missing());
        }
        let fetched = self
            .git(service, Mode::Streamed, ["fetch", "origin", branch.as_str()])
            .await?;
        if !fetched.is_some_and(|o| o.success()) {
            warn!(service, branch = %branch, "fetch failed; skipping merge");
            return Ok(GitOutcome::Failed(format!("fetch of {branch} failed")));
        }

        if !self.still_has_branch(service, "merge") {
            return Ok(aborted_missing());
        }
        let merged = self
            .git(service, Mode::Streamed, ["merge", "--ff-only", "FETCH_HEAD"])
            .await?
            .is_some_and(|o| o.success());

        self.refresh_status(service, true).await?;
        if merged {
            Ok(GitOutcome::Completed)
        } else {
            warn!(service, branch = %branch, "fast-forward merge failed");
            Ok(GitOutcome::Failed(format!("{branch} cannot be fast-forwarded")))
        }
    }

    /// Hard-reset to the configured upstream of the current branch.
    pub async fn reset(&self, service: &str) -> Result<GitOutcome> {
        if !self.still_has_branch(service, "resolve upstream") {
            return Ok(aborted_missing());
        }
        let upstream = self
            .git(
                service,
                Mode::Quiet,
                ["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
            )
            .await?
            .filter(|o| o.success() && !o.stdout.is_empty())
            .map(|o| o.stdout);
        let Some(upstream) = upstream else {
            info!(service, "no upstream configured; skipping reset");
            self.commands
                .notifier()
                .info(service, "No upstream configured for the current branch; skipping reset");
            return Ok(GitOutcome::Aborted("no upstream configured".into()));
        };

        if !self.still_has_branch(service, "reset") {
            return Ok(aborted_missing());
        }
        let reset = self
            .git(service, Mode::Announced, ["reset", "--hard", upstream.as_str()])
            .await?;
        if !reset.is_some_and(|o| o.success()) {
            return Ok(GitOutcome::Failed(format!("reset to {upstream} failed")));
        }

        self.refresh_status(service, true).await?;
        Ok(GitOutcome::Completed)
    }

    /// Check out `branch`, or the configured default branch, then reset to
    /// its upstream.
    pub async fn checkout(&self, service: &str, branch: Option<&str>) -> Result<GitOutcome> {
        let config = self.registry.config(service)?;
        let Some(target) = branch
            .map(str::to_string)
            .or_else(|| config.default_branch.clone())
        else {
            info!(service, "no branch given and no default branch configured");
            self.commands
                .notifier()
                .info(service, "No branch given and no default branch configured");
            return Ok(GitOutcome::Aborted("no branch to check out".into()));
        };

        if !self.still_has_branch(service, "checkout") {
            return Ok(aborted_missing());
        }
        let switched = self
            .git(service, Mode::Announced, ["checkout", target.as_str()])
            .await?;
        if !switched.is_some_and(|o| o.success()) {
            return Ok(GitOutcome::Failed(format!("checkout of {target} failed")));
        }

        if !self.still_has_branch(service, "record branch") {
            return Ok(aborted_missing());
        }
        if let Some(current) = self.current_branch(service).await? {
            self.registry.set_branch(service, &current)?;
        }
        self.refresh_status(service, true).await?;

        match self.reset(service).await? {
            GitOutcome::Failed(reason) => Ok(GitOutcome::Failed(reason)),
            _ => Ok(GitOutcome::Completed),
        }
    }

    /// `git branch <name>`.
    pub async fn create_branch(&self, service: &str, name: &str) -> Result<GitOutcome> {
        if !self.still_has_branch(service, "branch") {
            return Ok(aborted_missing());
        }
        let created = self
            .git(service, Mode::Announced, ["branch", name])
            .await?;
        self.finish(service, created, || format!("could not create branch {name}"))
            .await
    }

    /// Optionally stage everything, then commit with `message`.
    pub async fn commit(&self, service: &str, message: &str, add_all: bool) -> Result<GitOutcome> {
        if add_all {
            if !self.still_has_branch(service, "add") {
                return Ok(aborted_missing());
            }
            let added = self.git(service, Mode::Announced, ["add", "."]).await?;
            if !added.is_some_and(|o| o.success()) {
                return Ok(GitOutcome::Failed("staging changes failed".into()));
            }
        }

        if !self.still_has_branch(service, "commit") {
            return Ok(aborted_missing());
        }
        let committed = self
            .git(service, Mode::Announced, ["commit", "-m", message])
            .await?;
        self.finish(service, committed, || "commit failed".to_string())
            .await
    }

    /// `git push [--set-upstream <upstream>] <branch>`.
    pub async fn push(
        &self,
        service: &str,
        branch: &str,
        upstream: Option<&str>,
    ) -> Result<GitOutcome> {
        if !self.still_has_branch(service, "push") {
            return Ok(aborted_missing());
        }
        let mut args = vec!["push"];
        if let Some(upstream) = upstream {
            args.extend(["--set-upstream", upstream]);
        }
        args.push(branch);

        let pushed = self.git(service, Mode::Streamed, args).await?;
        self.finish(service, pushed, || format!("push of {branch} failed"))
            .await
    }

    async fn finish(
        &self,
        service: &str,
        out: Option<CommandOutput>,
        failure: impl FnOnce() -> String,
    ) -> Result<GitOutcome> {
        let ok = out.is_some_and(|o| o.success());
        self.refresh_status(service, true).await?;
        if ok {
            Ok(GitOutcome::Completed)
        } else {
            Ok(GitOutcome::Failed(failure()))
        }
    }

    fn still_has_branch(&self, service: &str, step: &str) -> bool {
        let present = self.registry.has_branch(service);
        if !present {
            debug!(service, step, "checkout or branch gone; skipping git step");
        }
        present
    }

    /// Run git in the service checkout. `Ok(None)` when git could not be
    /// started at all; only an unknown service is an error.
    async fn git<I, S>(&self, service: &str, mode: Mode, args: I) -> Result<Option<CommandOutput>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registry.config(service)?;
        let cwd: PathBuf = self.registry.checkout_path(service);
        let command = CommandLine::git(args);
        let result = match mode {
            Mode::Quiet => self.commands.quiet(command.clone(), &cwd).await,
            Mode::Announced => self.commands.announced(service, command.clone(), &cwd).await,
            Mode::Streamed => self.commands.streamed(service, command.clone(), &cwd).await,
        };
        match result {
            Ok(out) => Ok(Some(out)),
            Err(e) => {
                if mode == Mode::Quiet {
                    warn!(service, cmd = %command, error = %e, "git could not be run");
                }
                Ok(None)
            }
        }
    }
}

fn aborted_missing() -> GitOutcome {
    GitOutcome::Aborted("checkout no longer present".into())
}
