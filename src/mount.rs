//! Drive mapping and its guaranteed release.
//!
//! `DriveMounter` makes sure the configured share is mapped at the configured
//! drive letter, remapping once if the letter points somewhere else.
//!
//! `MountLease` is the one place the drive is unmapped. It is idempotent and
//! serialised: the first caller performs the unmount, concurrent callers wait
//! for it to finish and then do nothing. `MountGuard` ties a lease to scope
//! and to the process-wide cleanup hooks, so the same release runs on normal
//! return, on error propagation, on panic unwinding and on Ctrl-C/SIGTERM.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::WorkflowConfig;
use crate::error::{Result, WorkflowError};
use crate::process_guard::{CleanupHook, CleanupHooks, HookId};
use crate::status;
use crate::tool_runner::{CommandRunner, run_tool_safe};
use crate::tools::net_use::{
    NetUseAddArgs, NetUseDeleteArgs, NetUseQueryArgs, parse_remote_name, same_remote,
};

/// What `ensure_mounted` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum MountStatus {
    #[strum(serialize = "created")]
    Created,
    #[strum(serialize = "already mapped")]
    AlreadySatisfied,
    #[strum(serialize = "remapped")]
    Remapped,
}

/// What a release attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmountOutcome {
    Unmounted,
    /// Nothing was mapped at the drive letter
    NotMounted,
    /// An earlier release already ran
    AlreadyReleased,
    /// The delete failed; logged as a warning
    Failed,
}

/// Maps a network share to a local drive letter.
#[derive(Clone)]
pub struct DriveMounter {
    runner: Arc<dyn CommandRunner>,
    local_id: String,
    remote_path: String,
    persistent: bool,
    remap_delay: Duration,
    timeout: Option<Duration>,
}

impl DriveMounter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        local_id: impl Into<String>,
        remote_path: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            local_id: local_id.into(),
            remote_path: remote_path.into(),
            persistent: false,
            remap_delay: Duration::ZERO,
            timeout: None,
        }
    }

    pub fn from_config(runner: Arc<dyn CommandRunner>, config: &WorkflowConfig) -> Self {
        Self {
            runner,
            local_id: config.local_id.clone(),
            remote_path: config.remote_path.clone(),
            persistent: config.persistent,
            remap_delay: config.remap_delay(),
            timeout: config.timeouts.mount(),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    /// Remote path currently mapped at the drive letter, if any.
    ///
    /// A mapping whose target cannot be parsed is reported as an empty
    /// string, which never matches the desired share.
    pub fn current_target(&self) -> Result<Option<String>> {
        let output = run_tool_safe(
            self.runner.as_ref(),
            &NetUseQueryArgs {
                local_id: self.local_id.clone(),
            },
            self.timeout,
        )
        .map_err(|e| WorkflowError::mount(format!("Could not query {}: {}", self.local_id, e)))?;

        if !output.success {
            debug!("{} is not mapped", self.local_id);
            return Ok(None);
        }
        Ok(Some(parse_remote_name(&output.stdout).unwrap_or_default()))
    }

    /// Ensure the share is mapped at the drive letter.
    ///
    /// Issues no mutating command when the mapping is already correct.
    pub fn ensure_mounted(&self) -> Result<MountStatus> {
        match self.current_target()? {
            None => {
                self.create()?;
                info!("Mapped {} to {}", self.local_id, self.remote_path);
                Ok(MountStatus::Created)
            }
            Some(target) if same_remote(&target, &self.remote_path) => {
                info!("{} already mapped to {}", self.local_id, target);
                Ok(MountStatus::AlreadySatisfied)
            }
            Some(target) => {
                warn!(
                    "{} is mapped to '{}', remapping to {}",
                    self.local_id, target, self.remote_path
                );
                self.delete().map_err(|e| {
                    WorkflowError::mount(format!(
                        "Could not release {} (mapped to '{}'): {}",
                        self.local_id, target, e
                    ))
                })?;
                if !self.remap_delay.is_zero() {
                    std::thread::sleep(self.remap_delay);
                }
                self.create()?;
                info!("Remapped {} to {}", self.local_id, self.remote_path);
                Ok(MountStatus::Remapped)
            }
        }
    }

    /// Remove the mapping if one exists.
    pub fn unmount(&self) -> Result<UnmountOutcome> {
        if self.current_target()?.is_none() {
            return Ok(UnmountOutcome::NotMounted);
        }
        self.delete()?;
        Ok(UnmountOutcome::Unmounted)
    }

    fn create(&self) -> Result<()> {
        let output = run_tool_safe(
            self.runner.as_ref(),
            &NetUseAddArgs {
                local_id: self.local_id.clone(),
                remote_path: self.remote_path.clone(),
                persistent: self.persistent,
            },
            self.timeout,
        )
        .map_err(|e| WorkflowError::mount(e.to_string()))?;
        output.ensure_success("net use add").map_err(WorkflowError::mount)
    }

    fn delete(&self) -> Result<()> {
        let output = run_tool_safe(
            self.runner.as_ref(),
            &NetUseDeleteArgs {
                local_id: self.local_id.clone(),
            },
            self.timeout,
        )
        .map_err(|e| WorkflowError::mount(e.to_string()))?;
        output.ensure_success("net use delete").map_err(WorkflowError::mount)
    }
}

/// Idempotent, serialised unmount of one drive letter.
pub struct MountLease {
    mounter: DriveMounter,
    released: Mutex<bool>,
}

impl MountLease {
    pub fn new(mounter: DriveMounter) -> Self {
        Self {
            mounter,
            released: Mutex::new(false),
        }
    }

    pub fn mounter(&self) -> &DriveMounter {
        &self.mounter
    }

    pub fn is_released(&self) -> bool {
        match self.released.lock() {
            Ok(released) => *released,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Unmount the drive. Never fails: errors become warnings.
    ///
    /// Holds the lock for the whole unmount so a signal-driven release and a
    /// scope-driven release cannot interleave.
    pub fn release(&self) -> UnmountOutcome {
        let mut released = match self.released.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *released {
            return UnmountOutcome::AlreadyReleased;
        }
        *released = true;

        let local_id = self.mounter.local_id();
        match self.mounter.unmount() {
            Ok(UnmountOutcome::NotMounted) => {
                info!("{} not mapped, nothing to unmount", local_id);
                status::info(&format!("{} was not mapped; nothing to unmount", local_id));
                UnmountOutcome::NotMounted
            }
            Ok(outcome) => {
                info!("Unmapped {}", local_id);
                status::ok(&format!("Unmounted {}", local_id));
                outcome
            }
            Err(e) => {
                warn!("Cleanup could not unmount {}: {}", local_id, e);
                status::warn(&format!("Could not unmount {}: {}", local_id, e));
                UnmountOutcome::Failed
            }
        }
    }
}

impl CleanupHook for MountLease {
    fn label(&self) -> String {
        format!("unmount {}", self.mounter.local_id())
    }

    fn run_cleanup(&self) {
        self.release();
    }
}

/// Scope guard around a `MountLease`.
///
/// Created before the first mount attempt so a half-finished remap is
/// still cleaned up.
pub struct MountGuard {
    lease: Arc<MountLease>,
    hook: Option<HookId>,
}

impl MountGuard {
    /// Register the lease with the process-wide cleanup hooks.
    pub fn register(mounter: DriveMounter) -> Self {
        let lease = Arc::new(MountLease::new(mounter));
        let hook = match CleanupHooks::global().lock() {
            Ok(mut hooks) => Some(hooks.register(lease.clone())),
            Err(_) => {
                warn!("Cleanup hook registry poisoned; relying on scope release only");
                None
            }
        };
        Self { lease, hook }
    }

    pub fn lease(&self) -> &Arc<MountLease> {
        &self.lease
    }

    pub fn ensure_mounted(&self) -> Result<MountStatus> {
        self.lease.mounter().ensure_mounted()
    }

    /// Release now. Later calls, `Drop` and signal hooks become no-ops.
    pub fn release(&mut self) -> UnmountOutcome {
        if let Some(id) = self.hook.take() {
            if let Ok(mut hooks) = CleanupHooks::global().lock() {
                hooks.unregister(id);
            }
        }
        self.lease.release()
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use crate::tool_runner::ToolOutput;

    const SHARE: &str = "\\\\fileserver\\profiles";

    fn mapped_to(remote: &str) -> ToolOutput {
        ToolOutput::ok(format!(
            "Local name        Z:\nRemote name       {}\nThe command completed successfully.\n",
            remote
        ))
    }

    fn not_mapped() -> ToolOutput {
        ToolOutput::failed(2, "The network connection could not be found.")
    }

    fn mounter(runner: &Arc<ScriptedRunner>) -> DriveMounter {
        DriveMounter::new(runner.clone(), "Z:", SHARE)
    }

    #[test]
    fn test_absent_mount_is_created() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("net use query", not_mapped());
        runner.respond("net use add", ToolOutput::ok(""));

        let status = mounter(&runner).ensure_mounted().expect("mount");
        assert_eq!(status, MountStatus::Created);
        assert_eq!(runner.labels(), vec!["net use query", "net use add"]);
        assert_eq!(
            runner.calls()[1].args,
            vec!["use", "Z:", SHARE, "/persistent:no"]
        );
    }

    #[test]
    fn test_matching_mount_issues_no_mutations() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("net use query", mapped_to("\\\\FILESERVER\\Profiles\\"));

        let status = mounter(&runner).ensure_mounted().expect("mount");
        assert_eq!(status, MountStatus::AlreadySatisfied);
        assert_eq!(runner.mutating_calls(), 0);
    }

    #[test]
    fn test_mismatched_mount_is_remapped() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("net use query", mapped_to("\\\\oldserver\\archive"));
        runner.respond("net use delete", ToolOutput::ok(""));
        runner.respond("net use add", ToolOutput::ok(""));

        let status = mounter(&runner).ensure_mounted().expect("remap");
        assert_eq!(status, MountStatus::Remapped);
        assert_eq!(
            runner.labels(),
            vec!["net use query", "net use delete", "net use add"]
        );
    }

    #[test]
    fn test_failed_release_during_remap_is_fatal() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("net use query", mapped_to("\\\\oldserver\\archive"));
        runner.respond("net use delete", ToolOutput::failed(2, "There are open files"));

        let err = mounter(&runner).ensure_mounted().unwrap_err();
        assert!(matches!(err, WorkflowError::Mount(ref msg) if msg.contains("oldserver")));
        assert!(!runner.labels().contains(&"net use add"));
    }

    #[test]
    fn test_failed_create_is_fatal() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("net use query", not_mapped());
        runner.respond("net use add", ToolOutput::failed(2, "System error 53 has occurred."));

        let err = mounter(&runner).ensure_mounted().unwrap_err();
        assert!(matches!(err, WorkflowError::Mount(ref msg) if msg.contains("System error 53")));
    }

    #[test]
    fn test_query_spawn_failure_is_mount_error() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail_spawn("net use query");

        let err = mounter(&runner).ensure_mounted().unwrap_err();
        assert!(matches!(err, WorkflowError::Mount(_)));
    }

    #[test]
    fn test_lease_release_twice_is_safe() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("net use query", mapped_to(SHARE));
        runner.respond("net use delete", ToolOutput::ok(""));

        let lease = MountLease::new(mounter(&runner));
        assert_eq!(lease.release(), UnmountOutcome::Unmounted);
        assert_eq!(lease.release(), UnmountOutcome::AlreadyReleased);
        assert!(lease.is_released());
        assert_eq!(runner.count("net use delete"), 1);
    }

    #[test]
    fn test_release_skips_delete_when_not_mapped() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("net use query", not_mapped());

        let lease = MountLease::new(mounter(&runner));
        assert_eq!(lease.release(), UnmountOutcome::NotMounted);
        assert_eq!(runner.mutating_calls(), 0);
    }

    #[test]
    fn test_failed_unmount_is_only_a_warning() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("net use query", mapped_to(SHARE));
        runner.respond("net use delete", ToolOutput::failed(2, "access denied"));

        let lease = MountLease::new(mounter(&runner));
        assert_eq!(lease.release(), UnmountOutcome::Failed);
        // No retry on the second call
        assert_eq!(lease.release(), UnmountOutcome::AlreadyReleased);
        assert_eq!(runner.count("net use delete"), 1);
    }

    #[test]
    fn test_concurrent_releases_unmount_once() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("net use query", mapped_to(SHARE));
        runner.respond("net use delete", ToolOutput::ok(""));

        let lease = Arc::new(MountLease::new(mounter(&runner)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lease = lease.clone();
                std::thread::spawn(move || lease.release())
            })
            .collect();
        let outcomes: Vec<UnmountOutcome> = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect();

        assert_eq!(
            outcomes.iter().filter(|o| **o == UnmountOutcome::Unmounted).count(),
            1
        );
        assert_eq!(runner.count("net use delete"), 1);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("net use query", mapped_to(SHARE));
        runner.respond("net use delete", ToolOutput::ok(""));

        let lease = {
            let guard = MountGuard::register(mounter(&runner));
            guard.lease().clone()
        };
        assert!(lease.is_released());
        assert_eq!(runner.count("net use delete"), 1);
    }

    #[test]
    fn test_guard_explicit_release_then_drop() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("net use query", mapped_to(SHARE));
        runner.respond("net use delete", ToolOutput::ok(""));

        let mut guard = MountGuard::register(mounter(&runner));
        assert_eq!(guard.release(), UnmountOutcome::Unmounted);
        drop(guard);
        assert_eq!(runner.count("net use delete"), 1);
    }
}
