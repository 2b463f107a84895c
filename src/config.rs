//! Workflow configuration.
//!
//! Every value the workflow needs lives in `WorkflowConfig`, passed explicitly
//! to each step. Values come from built-in defaults, an optional JSON file,
//! environment variables and CLI flags, in increasing order of precedence
//! (see `cli::RunArgs::apply_to`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, WorkflowError};

/// How the CSV report becomes a workbook.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ConverterBackend {
    /// In-process writer, no spreadsheet application required
    #[default]
    Native,
    /// Headless office suite driven as an external process
    External,
}

/// Per-step timeouts in seconds. `None` waits indefinitely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepTimeouts {
    pub mount_secs: Option<u64>,
    pub fetch_secs: Option<u64>,
    pub shrink_secs: Option<u64>,
    pub convert_secs: Option<u64>,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            mount_secs: Some(60),
            fetch_secs: Some(600),
            // Shrinking a large share legitimately takes hours
            shrink_secs: None,
            convert_secs: Some(300),
        }
    }
}

impl StepTimeouts {
    pub fn mount(&self) -> Option<Duration> {
        self.mount_secs.map(Duration::from_secs)
    }

    pub fn fetch(&self) -> Option<Duration> {
        self.fetch_secs.map(Duration::from_secs)
    }

    pub fn shrink(&self) -> Option<Duration> {
        self.shrink_secs.map(Duration::from_secs)
    }

    pub fn convert(&self) -> Option<Duration> {
        self.convert_secs.map(Duration::from_secs)
    }

    fn iter(&self) -> impl Iterator<Item = (&'static str, Option<u64>)> {
        [
            ("mount", self.mount_secs),
            ("fetch", self.fetch_secs),
            ("shrink", self.shrink_secs),
            ("convert", self.convert_secs),
        ]
        .into_iter()
    }
}

/// Complete configuration of one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    // Drive mapping
    pub local_id: String,
    pub remote_path: String,
    pub persistent: bool,

    // Shrink script checkout
    pub repo_url: String,
    pub cache_root: PathBuf,
    pub repo_dir_name: String,
    pub script_name: String,
    pub git_program: String,

    // Shrink run
    pub shell_program: String,
    pub log_path: PathBuf,

    // Report conversion
    pub workbook_path: PathBuf,
    pub converter: ConverterBackend,
    pub office_program: String,

    // Pauses after releasing a drive letter or deleting a foreign checkout
    pub remap_delay_ms: u64,
    pub reclone_delay_ms: u64,

    pub timeouts: StepTimeouts,
    pub dry_run: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            local_id: "Z:".to_string(),
            remote_path: "\\\\fileserver\\profiles".to_string(),
            persistent: false,
            repo_url: "https://github.com/FSLogix/Invoke-FslShrinkDisk.git".to_string(),
            cache_root: default_cache_root(),
            repo_dir_name: "Invoke-FslShrinkDisk".to_string(),
            script_name: "Invoke-FslShrinkDisk.ps1".to_string(),
            git_program: "git".to_string(),
            shell_program: "powershell.exe".to_string(),
            log_path: PathBuf::from("ShrinkDisk.csv"),
            workbook_path: PathBuf::from("ShrinkDisk.xlsx"),
            converter: ConverterBackend::Native,
            office_program: "soffice".to_string(),
            remap_delay_ms: 2000,
            reclone_delay_ms: 2000,
            timeouts: StepTimeouts::default(),
            dry_run: false,
        }
    }
}

fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("shrinkwrap"))
        .unwrap_or_else(|| PathBuf::from(".shrinkwrap-cache"))
}

impl WorkflowConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|e| {
            WorkflowError::config(format!(
                "Failed to write configuration to {:?}: {}",
                path.as_ref(),
                e
            ))
        })
    }

    /// Load configuration from a JSON file
    ///
    /// Missing fields take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).map_err(|e| {
            WorkflowError::config(format!(
                "Failed to read configuration from {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            WorkflowError::config(format!("Failed to parse configuration JSON: {}", e))
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !is_drive_identifier(&self.local_id) {
            return Err(WorkflowError::config(format!(
                "Drive '{}' must be a single letter followed by ':'",
                self.local_id
            )));
        }

        if self.remote_path.trim().is_empty() {
            return Err(WorkflowError::config("Share path must be specified"));
        }

        if self.repo_url.trim().is_empty() {
            return Err(WorkflowError::config("Repository URL must be specified"));
        }

        if self.repo_dir_name.trim().is_empty() {
            return Err(WorkflowError::config("Repository directory name must be specified"));
        }

        if self.script_name.trim().is_empty() {
            return Err(WorkflowError::config("Script name must be specified"));
        }

        if self.log_path.as_os_str().is_empty() {
            return Err(WorkflowError::config("Log path must be specified"));
        }

        if self.workbook_path.as_os_str().is_empty() {
            return Err(WorkflowError::config("Workbook path must be specified"));
        }

        if self.log_path == self.workbook_path {
            return Err(WorkflowError::config(
                "Log path and workbook path must differ",
            ));
        }

        if let Some((step, _)) = self.timeouts.iter().find(|(_, secs)| *secs == Some(0)) {
            return Err(WorkflowError::config(format!(
                "The {} timeout must be at least one second",
                step
            )));
        }

        Ok(())
    }

    /// Directory holding the shrink script checkout.
    pub fn repo_dir(&self) -> PathBuf {
        self.cache_root.join(&self.repo_dir_name)
    }

    /// Full path of the shrink script inside the checkout.
    pub fn script_path(&self) -> PathBuf {
        self.repo_dir().join(&self.script_name)
    }

    /// Root of the mapped drive, as handed to the shrink script.
    pub fn mount_target(&self) -> String {
        format!("{}\\", self.local_id)
    }

    pub fn remap_delay(&self) -> Duration {
        Duration::from_millis(self.remap_delay_ms)
    }

    pub fn reclone_delay(&self) -> Duration {
        Duration::from_millis(self.reclone_delay_ms)
    }
}

/// `true` for identifiers like `Z:` or `e:`.
pub fn is_drive_identifier(id: &str) -> bool {
    let bytes = id.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
