//! Process lifecycle management for external tools
//!
//! This module ensures that child processes (the shrink script host, git,
//! the spreadsheet engine) are terminated when shrinkwrap exits, and that
//! registered cleanup hooks (the drive unmount) run on every exit path,
//! including SIGINT/SIGTERM/SIGHUP on unix and Ctrl-C/Ctrl-Break on windows.
//!
//! # Problem Solved
//! An interrupted shrink run must not leave the script host holding the VHDX
//! files open, nor the share mapped at the drive letter.
//!
//! # Solution
//! - Spawn children in their own process group
//! - Track all child PIDs in a global registry
//! - Track cleanup hooks in a second global registry
//! - On signal: stop all children (grace period, then force), run hooks, exit

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Global registry of child process IDs
static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Global registry of cleanup hooks
static CLEANUP_HOOKS: OnceLock<Arc<Mutex<CleanupHooks>>> = OnceLock::new();

/// Registry tracking all spawned child processes
#[derive(Debug, Default)]
pub struct ChildRegistry {
    /// Set of child PIDs currently running
    pids: HashSet<u32>,
    /// Whether cleanup has already been initiated (prevent double-cleanup)
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    /// Register a new child process
    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        tracing::debug!("Registered child process PID {}", pid);
    }

    /// Unregister a child process (called when it exits normally)
    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        tracing::debug!("Unregistered child process PID {}", pid);
    }

    /// Get count of tracked children
    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Whether `pid` is currently tracked
    pub fn contains(&self, pid: u32) -> bool {
        self.pids.contains(&pid)
    }

    /// Terminate all tracked child processes
    /// Requests a graceful stop first, waits up to `grace_period`, then forces
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            tracing::debug!("Cleanup already initiated, skipping");
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            tracing::debug!("No child processes to terminate");
            return;
        }

        tracing::info!("Terminating {} child process(es)...", self.pids.len());

        let pids_to_kill: Vec<u32> = self.pids.iter().copied().collect();
        for &pid in &pids_to_kill {
            terminate_process_tree(pid, grace_period);
        }

        self.pids.clear();
        tracing::info!("Child process cleanup complete");
    }
}

/// Stop a child and everything in its process group.
///
/// Sends a graceful stop request, polls until `grace_period` elapses, then
/// force-kills whatever is left. Errors are logged, never returned: this runs
/// on shutdown and timeout paths that must not fail.
pub fn terminate_process_tree(pid: u32, grace_period: Duration) {
    if let Err(e) = platform::request_stop(pid) {
        tracing::warn!("Failed to request stop of process tree {}: {}", pid, e);
    } else {
        tracing::debug!("Requested stop of process tree {}", pid);
    }

    let start = Instant::now();
    while start.elapsed() < grace_period {
        if !platform::is_process_alive(pid) {
            tracing::debug!("Process {} terminated gracefully", pid);
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    if platform::is_process_alive(pid) {
        tracing::warn!("Process tree {} did not terminate, forcing", pid);
        if let Err(e) = platform::force_kill(pid) {
            tracing::error!("Failed to force-kill process tree {}: {}", pid, e);
        }
    }
}

#[cfg(unix)]
mod platform {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    /// Send a signal to a process
    pub(super) fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
        signal::kill(Pid::from_raw(pid as i32), signal)
    }

    /// Send a signal to an entire process group
    /// Uses negative PID so the interpreter's own children get it too
    fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
        signal::kill(Pid::from_raw(-(pgid as i32)), signal)
    }

    fn signal_tree(pid: u32, sig: Signal) -> std::io::Result<()> {
        send_signal_to_group(pid, sig)
            .or_else(|_| send_signal(pid, sig))
            .map_err(std::io::Error::from)
    }

    pub(super) fn request_stop(pid: u32) -> std::io::Result<()> {
        signal_tree(pid, Signal::SIGTERM)
    }

    pub(super) fn force_kill(pid: u32) -> std::io::Result<()> {
        signal_tree(pid, Signal::SIGKILL)
    }

    /// Check if a process is still alive (not dead or zombie)
    pub(super) fn is_process_alive(pid: u32) -> bool {
        if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
            return false;
        }

        // Field 3 of /proc/pid/stat is the state; Z and X are not running
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            let fields: Vec<&str> = stat.split_whitespace().collect();
            if fields.len() > 2 {
                return !matches!(fields[2], "Z" | "X");
            }
        }

        // If we can't read /proc, assume alive
        true
    }
}

#[cfg(windows)]
mod platform {
    use std::process::{Command, Stdio};

    fn taskkill(pid: u32, force: bool) -> std::io::Result<()> {
        let pid = pid.to_string();
        let mut args = vec!["/PID", pid.as_str(), "/T"];
        if force {
            args.push("/F");
        }
        let status = Command::new("taskkill")
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(std::io::Error::other(format!("taskkill exited with {status}")))
        }
    }

    pub(super) fn request_stop(pid: u32) -> std::io::Result<()> {
        taskkill(pid, false)
    }

    pub(super) fn force_kill(pid: u32) -> std::io::Result<()> {
        taskkill(pid, true)
    }

    pub(super) fn is_process_alive(pid: u32) -> bool {
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/NH"])
            .output()
            .map(|out| String::from_utf8_lossy(&out.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
}

/// Work that must run before the process exits, whatever the exit path.
pub trait CleanupHook: Send + Sync {
    /// Label for logs (e.g., "unmount Z:").
    fn label(&self) -> String;

    /// Perform the cleanup. Must be idempotent and must not panic.
    fn run_cleanup(&self);
}

/// Handle returned by `CleanupHooks::register`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Registry of cleanup hooks run on signal-driven shutdown
#[derive(Default)]
pub struct CleanupHooks {
    next_id: u64,
    hooks: Vec<(HookId, Arc<dyn CleanupHook>)>,
}

impl CleanupHooks {
    /// Get or create the global hook registry
    pub fn global() -> Arc<Mutex<CleanupHooks>> {
        CLEANUP_HOOKS
            .get_or_init(|| Arc::new(Mutex::new(CleanupHooks::default())))
            .clone()
    }

    pub fn register(&mut self, hook: Arc<dyn CleanupHook>) -> HookId {
        let id = HookId(self.next_id);
        self.next_id += 1;
        tracing::debug!("Registered cleanup hook '{}'", hook.label());
        self.hooks.push((id, hook));
        id
    }

    pub fn unregister(&mut self, id: HookId) {
        self.hooks.retain(|(hook_id, _)| *hook_id != id);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Remove every hook, most recently registered first.
    pub fn drain(&mut self) -> Vec<Arc<dyn CleanupHook>> {
        self.hooks.drain(..).rev().map(|(_, hook)| hook).collect()
    }
}

/// Run and clear every globally registered cleanup hook.
///
/// Hooks are taken out of the registry before they run so the lock is not
/// held across external commands.
pub fn run_cleanup_hooks() {
    let hooks = match CleanupHooks::global().lock() {
        Ok(mut registry) => registry.drain(),
        Err(poisoned) => poisoned.into_inner().drain(),
    };
    for hook in hooks {
        tracing::info!("Running cleanup hook '{}'", hook.label());
        hook.run_cleanup();
    }
}

/// RAII guard that terminates all children on drop
/// Hold this in `main` so cleanup happens on any exit path
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    /// Create a new process guard attached to the global registry
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        tracing::debug!("ProcessGuard dropped, initiating cleanup");
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(Duration::from_secs(5));
        }
    }
}

/// Stop children, run cleanup hooks, and exit with `code`.
fn shutdown(signal_name: &str, code: i32) -> ! {
    tracing::warn!("Received {}, cleaning up...", signal_name);

    if let Ok(mut registry) = ChildRegistry::global().lock() {
        registry.terminate_all(Duration::from_secs(3));
    }
    run_cleanup_hooks();

    std::process::exit(code);
}

/// Initialize global signal handlers for graceful shutdown
/// Handles SIGINT (Ctrl+C), SIGTERM, and SIGHUP
/// Call this once at program start
#[cfg(unix)]
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };
            // Exit with appropriate code (128 + signal number)
            shutdown(signal_name, 128 + sig);
        }
    });

    Ok(())
}

/// Initialize the console control handler (Ctrl-C, Ctrl-Break)
/// Call this once at program start
#[cfg(windows)]
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    ctrlc::set_handler(|| shutdown("Ctrl-C", 130)).map_err(std::io::Error::other)
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Configure the command to run in its own process group
    /// This allows us to stop the entire process tree at once
    fn in_new_process_group(&mut self) -> &mut Self;
}

#[cfg(unix)]
impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // process_group(0) creates a new process group with PGID = child PID
        self.process_group(0);

        #[cfg(target_os = "linux")]
        // SAFETY: prctl is async-signal-safe and touches no parent state.
        unsafe {
            use nix::libc;
            self.pre_exec(|| {
                // Child dies with us if we are killed outright
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

#[cfg(windows)]
impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        self.creation_flags(CREATE_NEW_PROCESS_GROUP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook {
        name: &'static str,
        runs: Arc<AtomicUsize>,
    }

    impl CleanupHook for CountingHook {
        fn label(&self) -> String {
            self.name.to_string()
        }

        fn run_cleanup(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::default();

        registry.register(1234);
        assert_eq!(registry.count(), 1);

        registry.register(5678);
        assert_eq!(registry.count(), 2);
        assert!(registry.contains(5678));

        registry.unregister(1234);
        assert_eq!(registry.count(), 1);

        registry.unregister(5678);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_cleanup_hooks_register_and_unregister() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut hooks = CleanupHooks::default();

        let first = hooks.register(Arc::new(CountingHook {
            name: "first",
            runs: runs.clone(),
        }));
        let _second = hooks.register(Arc::new(CountingHook {
            name: "second",
            runs: runs.clone(),
        }));
        assert_eq!(hooks.len(), 2);

        hooks.unregister(first);
        assert_eq!(hooks.len(), 1);

        for hook in hooks.drain() {
            hook.run_cleanup();
        }
        assert!(hooks.is_empty());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cleanup_hooks_drain_newest_first() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut hooks = CleanupHooks::default();
        hooks.register(Arc::new(CountingHook {
            name: "older",
            runs: runs.clone(),
        }));
        hooks.register(Arc::new(CountingHook {
            name: "newer",
            runs,
        }));

        let labels: Vec<String> = hooks.drain().iter().map(|h| h.label()).collect();
        assert_eq!(labels, vec!["newer", "older"]);
    }

    #[cfg(unix)]
    fn wait_for_process_death(pid: u32, timeout: Duration) -> bool {
        use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
        use nix::unistd::Pid;

        let start = Instant::now();
        let nix_pid = Pid::from_raw(pid as i32);

        while start.elapsed() < timeout {
            match waitpid(nix_pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, _)) | Ok(WaitStatus::Signaled(_, _, _)) => {
                    return true;
                }
                Ok(WaitStatus::StillAlive) => {}
                Err(nix::errno::Errno::ECHILD) => {
                    if !platform::is_process_alive(pid) {
                        return true;
                    }
                }
                _ => {}
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_all_kills_real_process() {
        use std::process::Command;

        let child = Command::new("sh")
            .args(["-c", "sleep 60"])
            .in_new_process_group()
            .spawn()
            .expect("Failed to spawn sh sleep process");

        let pid = child.id();

        // Fresh registry, not the global one
        let mut registry = ChildRegistry::default();
        registry.register(pid);

        assert!(platform::is_process_alive(pid), "Process should be alive after spawn");

        registry.terminate_all(Duration::from_millis(500));

        let died = wait_for_process_death(pid, Duration::from_secs(2));
        assert!(died, "Process should be dead after terminate_all");
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_all_handles_already_dead_process() {
        use std::process::Command;

        let mut child = Command::new("sh")
            .args(["-c", "exit 0"])
            .spawn()
            .expect("Failed to spawn sh");
        let pid = child.id();
        let _ = child.wait();

        let mut registry = ChildRegistry::default();
        registry.register(pid);

        // No panic = success
        registry.terminate_all(Duration::from_millis(100));
        assert_eq!(registry.count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_graceful_stop_before_force() {
        use std::process::Command;

        let child = Command::new("sh")
            .args(["-c", "trap 'exit 0' TERM; sleep 60 & wait"])
            .in_new_process_group()
            .spawn()
            .expect("Failed to spawn sh with trap");
        let pid = child.id();

        std::thread::sleep(Duration::from_millis(50));
        terminate_process_tree(pid, Duration::from_secs(2));

        let died = wait_for_process_death(pid, Duration::from_secs(3));
        assert!(died, "Process should exit from TERM trap");
    }

    #[cfg(unix)]
    #[test]
    fn test_send_signal_to_nonexistent_pid() {
        let result = platform::send_signal(999_999, nix::sys::signal::Signal::SIGTERM);
        assert!(result.is_err(), "Should fail for nonexistent PID");
    }

    #[cfg(unix)]
    #[test]
    fn test_is_process_alive_nonexistent() {
        assert!(!platform::is_process_alive(999_999));
    }

    #[test]
    fn test_cleanup_initiated_flag_prevents_double_cleanup() {
        let mut registry = ChildRegistry::default();

        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.cleanup_initiated);

        // Second call returns early
        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.cleanup_initiated);
    }
}
