//! Type-Safe External Tool Execution
//!
//! Every external command the workflow issues (`net use`, `git`, the shrink
//! script host, the spreadsheet engine) goes through a `CommandRunner`. The
//! production implementation, `SystemRunner`, guarantees:
//!
//! - Process group isolation, so a timeout or Ctrl-C stops the whole tree
//! - PID registration with `ChildRegistry` for signal-driven cleanup
//! - Concurrent draining of stdout/stderr so chatty tools never block
//! - Per-invocation timeouts
//! - Dry-run skipping of mutating commands
//!
//! Steps receive `Arc<dyn CommandRunner>` so tests can script the outcomes of
//! external tools without touching the host.

use crate::error::{Result, WorkflowError};
use crate::process_guard::{ChildRegistry, CommandProcessGroup, terminate_process_tree};
use crate::tool_traits::ToolArgs;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Grace period between the stop request and the forced kill on timeout
const TIMEOUT_GRACE: Duration = Duration::from_secs(3);

/// How often a running child is polled for completion
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A fully resolved external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub label: &'static str,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    /// `None` waits indefinitely
    pub timeout: Option<Duration>,
    pub mutating: bool,
}

impl Invocation {
    /// Build an invocation from a typed argument contract.
    pub fn from_args<T: ToolArgs>(args: &T) -> Self {
        Self {
            label: args.tool_name(),
            program: args.program(),
            args: args.to_cli_args(),
            env: args.get_env_vars(),
            timeout: None,
            mutating: args.is_mutating(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// `program arg1 arg2 ...` for log lines.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Output from an external tool execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Standard output from the tool.
    pub stdout: String,
    /// Standard error from the tool.
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the tool exited successfully (exit code 0).
    pub success: bool,
    /// Whether execution was skipped because of dry-run mode.
    pub dry_run: bool,
}

impl ToolOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: Some(0),
            success: true,
            ..Self::default()
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code: Some(exit_code),
            success: false,
            ..Self::default()
        }
    }

    /// Synthetic success for a skipped mutating command.
    pub fn skipped(invocation: &Invocation) -> Self {
        Self {
            stdout: format!("[DRY RUN] Skipped: {}\n", invocation.command_line()),
            exit_code: Some(0),
            success: true,
            dry_run: true,
            ..Self::default()
        }
    }

    /// Check if the tool succeeded and return an error if not.
    ///
    /// The error message uses stderr, falling back to stdout for tools
    /// (like `net`) that report failures on stdout.
    pub fn ensure_success(&self, context: &str) -> std::result::Result<(), String> {
        if self.success {
            return Ok(());
        }
        let code = self
            .exit_code
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        Err(format!("{} failed (exit code {}): {}", context, code, detail))
    }
}

/// Abstraction over running external commands.
pub trait CommandRunner: Send + Sync {
    /// Run `invocation` to completion.
    ///
    /// Returns `Ok` whenever the process ran, whatever its exit status;
    /// `Err(WorkflowError::Process)` only when it could not be spawned,
    /// waited on, or exceeded its timeout.
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput>;
}

/// Execute a typed tool contract through `runner`.
pub fn run_tool_safe<T: ToolArgs>(
    runner: &dyn CommandRunner,
    args: &T,
    timeout: Option<Duration>,
) -> Result<ToolOutput> {
    runner.run(&Invocation::from_args(args).with_timeout(timeout))
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    dry_run: bool,
}

impl SystemRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        if self.dry_run && invocation.mutating {
            info!("[DRY RUN] Skipping {}: {}", invocation.label, invocation.command_line());
            return Ok(ToolOutput::skipped(invocation));
        }

        // Log exact command and environment for transparency
        info!(
            "run_tool: {} args={:?} env={:?}",
            invocation.program, invocation.args, invocation.env
        );

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group();
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            WorkflowError::process(format!(
                "Failed to spawn {} ({}): {}",
                invocation.label, invocation.program, e
            ))
        })?;
        let pid = child.id();
        with_registry(|registry| registry.register(pid));

        let stdout_reader = drain(child.stdout.take());
        let stderr_reader = drain(child.stderr.take());

        let waited = wait_with_deadline(&mut child, invocation.timeout);
        with_registry(|registry| registry.unregister(pid));

        let stdout = join_drain(stdout_reader);
        let stderr = join_drain(stderr_reader);

        let status = match waited {
            Ok(Some(status)) => status,
            Ok(None) => {
                warn!(
                    "{} exceeded its timeout of {:?}, process tree stopped",
                    invocation.label, invocation.timeout
                );
                return Err(WorkflowError::process(format!(
                    "{} timed out after {}s",
                    invocation.label,
                    invocation.timeout.unwrap_or_default().as_secs()
                )));
            }
            Err(e) => {
                return Err(WorkflowError::process(format!(
                    "Failed waiting for {}: {}",
                    invocation.label, e
                )));
            }
        };

        let exit_code = status.code();
        if status.success() {
            info!("{} executed successfully", invocation.label);
        } else {
            info!(
                "{} failed with exit code {}",
                invocation.label,
                exit_code.unwrap_or(-1)
            );
        }

        Ok(ToolOutput {
            stdout,
            stderr,
            exit_code,
            success: status.success(),
            dry_run: false,
        })
    }
}

fn with_registry(f: impl FnOnce(&mut ChildRegistry)) {
    match ChildRegistry::global().lock() {
        Ok(mut guard) => f(&mut guard),
        Err(poisoned) => f(&mut poisoned.into_inner()),
    }
}

/// Wait for `child`, stopping its process tree if `timeout` elapses.
///
/// Returns `Ok(None)` on timeout.
fn wait_with_deadline(
    child: &mut Child,
    timeout: Option<Duration>,
) -> std::io::Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            terminate_process_tree(child.id(), TIMEOUT_GRACE);
            // Reap so no zombie or handle outlives the step
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            if let Err(e) = pipe.read_to_end(&mut buf) {
                debug!("Output pipe closed with error: {}", e);
            }
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_drain(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
