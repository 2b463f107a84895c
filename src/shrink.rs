//! Shrink Runner: invoke the external shrink script against the mapped drive.
//!
//! The script is a black box. Success means exit status zero, nothing else.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::WorkflowConfig;
use crate::error::{Result, WorkflowError};
use crate::tool_runner::{CommandRunner, ToolOutput, run_tool_safe};
use crate::tools::shrink::ShrinkArgs;

/// How many trailing output lines go into a failure message
const FAILURE_TAIL_LINES: usize = 5;

pub struct ShrinkRunner {
    runner: Arc<dyn CommandRunner>,
    shell: String,
    timeout: Option<Duration>,
    dry_run: bool,
}

impl ShrinkRunner {
    pub fn new(runner: Arc<dyn CommandRunner>, shell: impl Into<String>) -> Self {
        Self {
            runner,
            shell: shell.into(),
            timeout: None,
            dry_run: false,
        }
    }

    pub fn from_config(runner: Arc<dyn CommandRunner>, config: &WorkflowConfig) -> Self {
        Self {
            runner,
            shell: config.shell_program.clone(),
            timeout: config.timeouts.shrink(),
            dry_run: config.dry_run,
        }
    }

    /// Run the script recursively over `target`, logging to `log_path`.
    ///
    /// Any stale log at `log_path` is removed first so the report only
    /// describes this run. Every failure, including a timeout, is a
    /// `ToolExecution` error.
    pub fn run_shrink(&self, script: &Path, target: &str, log_path: &Path) -> Result<ToolOutput> {
        if !script.is_file() {
            if self.dry_run {
                warn!("[DRY RUN] {} not present yet", script.display());
            } else {
                return Err(WorkflowError::tool(
                    None,
                    format!("script not found at {}", script.display()),
                ));
            }
        }
        if !self.dry_run {
            prepare_log(log_path)?;
        }

        let args = ShrinkArgs {
            shell: self.shell.clone(),
            script: script.to_path_buf(),
            target: target.to_string(),
            log_path: log_path.to_path_buf(),
            recurse: true,
        };
        info!("Shrinking disks under {}", target);

        let output = run_tool_safe(self.runner.as_ref(), &args, self.timeout)
            .map_err(|e| WorkflowError::tool(None, e.to_string()))?;

        for line in output.stdout.lines() {
            debug!(target: "shrinkwrap::shrink::stdout", "{}", line);
        }
        for line in output.stderr.lines() {
            debug!(target: "shrinkwrap::shrink::stderr", "{}", line);
        }

        if !output.success {
            return Err(WorkflowError::tool(output.exit_code, failure_detail(&output)));
        }
        Ok(output)
    }
}

fn prepare_log(log_path: &Path) -> Result<()> {
    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    if log_path.exists() {
        debug!("Removing stale report {}", log_path.display());
        fs::remove_file(log_path)?;
    }
    Ok(())
}

fn failure_detail(output: &ToolOutput) -> String {
    let source = if output.stderr.trim().is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    let lines: Vec<&str> = source.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return "no output".to_string();
    }
    let start = lines.len().saturating_sub(FAILURE_TAIL_LINES);
    lines[start..].join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;
    use std::path::PathBuf;

    fn script_in(dir: &Path) -> PathBuf {
        let script = dir.join("Invoke-FslShrinkDisk.ps1");
        fs::write(&script, "param($Path)").unwrap();
        script
    }

    #[test]
    fn test_successful_run_passes_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let script = script_in(dir.path());
        let log = dir.path().join("logs").join("ShrinkDisk.csv");
        let runner = Arc::new(ScriptedRunner::new());

        let shrink = ShrinkRunner::new(runner.clone(), "pwsh");
        shrink.run_shrink(&script, "Z:\\", &log).expect("shrink");

        let call = &runner.calls()[0];
        assert_eq!(call.program, "pwsh");
        assert!(call.args.contains(&"-Recurse".to_string()));
        assert!(call.args.contains(&"Z:\\".to_string()));
        assert!(dir.path().join("logs").is_dir(), "log directory is created");
    }

    #[test]
    fn test_nonzero_exit_is_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = script_in(dir.path());
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond("shrink script", ToolOutput::failed(2, "line one\nDisk locked\n"));

        let shrink = ShrinkRunner::new(runner, "powershell.exe");
        let err = shrink
            .run_shrink(&script, "Z:\\", &dir.path().join("log.csv"))
            .unwrap_err();
        match err {
            WorkflowError::ToolExecution { exit_code, detail } => {
                assert_eq!(exit_code, Some(2));
                assert!(detail.contains("Disk locked"));
            }
            other => panic!("expected tool error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_script_fails_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());

        let shrink = ShrinkRunner::new(runner.clone(), "powershell.exe");
        let err = shrink
            .run_shrink(&dir.path().join("missing.ps1"), "Z:\\", &dir.path().join("log.csv"))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ToolExecution { exit_code: None, .. }));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_stale_log_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let script = script_in(dir.path());
        let log = dir.path().join("ShrinkDisk.csv");
        fs::write(&log, "old,run\n").unwrap();
        let runner = Arc::new(ScriptedRunner::new());

        ShrinkRunner::new(runner, "powershell.exe")
            .run_shrink(&script, "Z:\\", &log)
            .expect("shrink");
        assert!(!log.exists());
    }

    #[test]
    fn test_spawn_failure_is_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = script_in(dir.path());
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail_spawn("shrink script");

        let err = ShrinkRunner::new(runner, "powershell.exe")
            .run_shrink(&script, "Z:\\", &dir.path().join("log.csv"))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ToolExecution { exit_code: None, .. }));
    }

    #[test]
    fn test_failure_detail_keeps_tail() {
        let out = ToolOutput::failed(1, "a\nb\nc\nd\ne\nf\ng\n");
        assert_eq!(failure_detail(&out), "c | d | e | f | g");
        assert_eq!(failure_detail(&ToolOutput::failed(1, "")), "no output");
    }
}
