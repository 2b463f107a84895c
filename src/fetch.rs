//! Repository Fetcher: keep a local checkout of the shrink script current.
//!
//! Three-way branch on the checkout directory:
//!
//! | State   | Action                               |
//! |---------|--------------------------------------|
//! | absent  | clone                                |
//! | valid   | pull (failure is fatal, no reclone)  |
//! | foreign | delete, pause, clone                 |
//!
//! A directory is a valid checkout when it has a `.git` entry and its
//! `origin` remote names the configured URL.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::WorkflowConfig;
use crate::error::{Result, WorkflowError};
use crate::tool_runner::{CommandRunner, run_tool_safe};
use crate::tools::git::{GitCloneArgs, GitPullArgs, GitRemoteUrlArgs, same_repository_url};

/// What `ensure_repository` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FetchOutcome {
    #[strum(serialize = "cloned")]
    Cloned,
    #[strum(serialize = "updated")]
    Updated,
    #[strum(serialize = "recloned")]
    Recloned,
}

/// Classification of the checkout directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutState {
    Absent,
    Valid,
    /// Present but not a checkout of the configured remote
    Foreign(String),
}

pub struct RepositoryFetcher {
    runner: Arc<dyn CommandRunner>,
    git_program: String,
    remote_url: String,
    local_dir: PathBuf,
    reclone_delay: Duration,
    timeout: Option<Duration>,
    dry_run: bool,
}

impl RepositoryFetcher {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        remote_url: impl Into<String>,
        local_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            git_program: "git".to_string(),
            remote_url: remote_url.into(),
            local_dir: local_dir.into(),
            reclone_delay: Duration::ZERO,
            timeout: None,
            dry_run: false,
        }
    }

    pub fn from_config(runner: Arc<dyn CommandRunner>, config: &WorkflowConfig) -> Self {
        Self {
            runner,
            git_program: config.git_program.clone(),
            remote_url: config.repo_url.clone(),
            local_dir: config.repo_dir(),
            reclone_delay: config.reclone_delay(),
            timeout: config.timeouts.fetch(),
            dry_run: config.dry_run,
        }
    }

    /// Classify the checkout directory without changing it.
    pub fn inspect(&self) -> Result<CheckoutState> {
        if !self.local_dir.exists() {
            return Ok(CheckoutState::Absent);
        }
        if !self.local_dir.is_dir() {
            return Ok(CheckoutState::Foreign("path is a file".to_string()));
        }
        if !self.local_dir.join(".git").exists() {
            return Ok(CheckoutState::Foreign("no .git entry".to_string()));
        }

        let output = run_tool_safe(
            self.runner.as_ref(),
            &GitRemoteUrlArgs {
                program: self.git_program.clone(),
                repo_dir: self.local_dir.clone(),
                remote: "origin".to_string(),
            },
            self.timeout,
        )
        .map_err(|e| WorkflowError::fetch(e.to_string()))?;

        if !output.success {
            return Ok(CheckoutState::Foreign("no origin remote".to_string()));
        }
        let origin = output.stdout.trim();
        if same_repository_url(origin, &self.remote_url) {
            Ok(CheckoutState::Valid)
        } else {
            Ok(CheckoutState::Foreign(format!("origin is '{}'", origin)))
        }
    }

    /// Clone, update or replace the checkout.
    pub fn ensure_repository(&self) -> Result<FetchOutcome> {
        match self.inspect()? {
            CheckoutState::Absent => {
                self.clone_fresh()?;
                Ok(FetchOutcome::Cloned)
            }
            CheckoutState::Valid => {
                self.pull()?;
                Ok(FetchOutcome::Updated)
            }
            CheckoutState::Foreign(reason) => {
                warn!(
                    "{} is not a checkout of {} ({}), replacing it",
                    self.local_dir.display(),
                    self.remote_url,
                    reason
                );
                self.remove_foreign()?;
                if !self.reclone_delay.is_zero() {
                    std::thread::sleep(self.reclone_delay);
                }
                self.clone_fresh()?;
                Ok(FetchOutcome::Recloned)
            }
        }
    }

    fn clone_fresh(&self) -> Result<()> {
        if let Some(parent) = self.local_dir.parent() {
            if !self.dry_run && !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    WorkflowError::fetch(format!(
                        "Could not create cache directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        info!("Cloning {} into {}", self.remote_url, self.local_dir.display());
        let output = run_tool_safe(
            self.runner.as_ref(),
            &GitCloneArgs {
                program: self.git_program.clone(),
                url: self.remote_url.clone(),
                dest: self.local_dir.clone(),
            },
            self.timeout,
        )
        .map_err(|e| WorkflowError::fetch(e.to_string()))?;
        output.ensure_success("git clone").map_err(WorkflowError::fetch)
    }

    fn pull(&self) -> Result<()> {
        info!("Updating {}", self.local_dir.display());
        let output = run_tool_safe(
            self.runner.as_ref(),
            &GitPullArgs {
                program: self.git_program.clone(),
                repo_dir: self.local_dir.clone(),
            },
            self.timeout,
        )
        .map_err(|e| WorkflowError::fetch(e.to_string()))?;
        output.ensure_success("git pull").map_err(WorkflowError::fetch)
    }

    fn remove_foreign(&self) -> Result<()> {
        if self.dry_run {
            info!("[DRY RUN] Would delete {}", self.local_dir.display());
            return Ok(());
        }
        remove_path(&self.local_dir).map_err(|e| {
            WorkflowError::fetch(format!(
                "Could not delete {}: {}",
                self.local_dir.display(),
                e
            ))
        })
    }
}

/// Delete a file or directory tree.
///
/// Git marks pack files read-only; on Windows that makes `remove_dir_all`
/// fail, so on permission errors the tree is made writable and retried.
fn remove_path(path: &Path) -> io::Result<()> {
    if !path.is_dir() {
        return fs::remove_file(path);
    }
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            debug!("Clearing read-only flags under {}", path.display());
            make_writable(path)?;
            fs::remove_dir_all(path)
        }
        other => other,
    }
}

fn make_writable(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        for entry in fs::read_dir(path)? {
            make_writable(&entry?.path())?;
        }
    }
    let mut permissions = metadata.permissions();
    if permissions.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}
