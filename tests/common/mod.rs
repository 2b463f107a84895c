//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use shrinkwrap::config::WorkflowConfig;
use shrinkwrap::testing::ScriptedRunner;

pub const SHARE: &str = "\\\\fileserver\\profiles";

/// `net use Z:` output for a drive mapped to `remote`.
pub fn net_use_output(remote: &str) -> String {
    format!(
        "Local name        Z:\r\nRemote name       {}\r\nResource type     Disk\r\nStatus            OK\r\nThe command completed successfully.\r\n",
        remote
    )
}

/// Config rooted in `dir` with delays switched off.
pub fn config_in(dir: &Path) -> WorkflowConfig {
    WorkflowConfig {
        remote_path: SHARE.to_string(),
        cache_root: dir.join("cache"),
        log_path: dir.join("reports").join("ShrinkDisk.csv"),
        workbook_path: dir.join("reports").join("ShrinkDisk.xlsx"),
        remap_delay_ms: 0,
        reclone_delay_ms: 0,
        ..WorkflowConfig::default()
    }
}

/// Make `git clone` materialise a checkout containing the script.
pub fn clone_creates_checkout(runner: &ScriptedRunner, config: &WorkflowConfig) {
    let script = config.script_path();
    runner.on_call("git clone", move |_| {
        let repo = script.parent().expect("script has a parent");
        fs::create_dir_all(repo.join(".git")).expect("create .git");
        fs::write(&script, "param($Path, [switch]$Recurse, $LogFilePath)").expect("write script");
    });
}

/// Make the shrink script write `csv` to the configured log path.
pub fn shrink_writes_report(runner: &ScriptedRunner, config: &WorkflowConfig, csv: &'static str) {
    let log = config.log_path.clone();
    runner.on_call("shrink script", move |_| {
        fs::write(&log, csv).expect("write report");
    });
}

pub fn scripted() -> Arc<ScriptedRunner> {
    Arc::new(ScriptedRunner::new())
}
