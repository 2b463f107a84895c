//! Type-safe arguments for the shrink-disk script.
//!
//! The script is a PowerShell file run through a script host
//! (`powershell.exe` or `pwsh`). It accepts a target path, a recursion switch
//! and a CSV log destination.

use std::path::PathBuf;

use crate::tool_traits::ToolArgs;

/// Arguments for invoking the shrink script.
///
/// # Field to Flag Mapping
///
/// | Rust Field | CLI Flag        | Notes |
/// |------------|-----------------|-------|
/// | `script`   | `-File`         | Host flag, not a script parameter |
/// | `target`   | `-Path`         | Mounted share root |
/// | `recurse`  | `-Recurse`      | Switch, omitted when false |
/// | `log_path` | `-LogFilePath`  | NOT `-LogPath` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShrinkArgs {
    /// Script host executable.
    pub shell: String,
    /// Full path of the `.ps1` file inside the checkout.
    pub script: PathBuf,
    pub target: String,
    pub log_path: PathBuf,
    pub recurse: bool,
}

impl ToolArgs for ShrinkArgs {
    fn program(&self) -> String {
        self.shell.clone()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-ExecutionPolicy".to_string(),
            "Bypass".to_string(),
            "-File".to_string(),
            self.script.display().to_string(),
            "-Path".to_string(),
            self.target.clone(),
        ];
        if self.recurse {
            args.push("-Recurse".to_string());
        }
        args.push("-LogFilePath".to_string());
        args.push(self.log_path.display().to_string());
        args
    }

    fn tool_name(&self) -> &'static str {
        "shrink script"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ShrinkArgs {
        ShrinkArgs {
            shell: "powershell.exe".to_string(),
            script: PathBuf::from("cache/Invoke-FslShrinkDisk/Invoke-FslShrinkDisk.ps1"),
            target: "Z:\\".to_string(),
            log_path: PathBuf::from("ShrinkDisk.csv"),
            recurse: true,
        }
    }

    #[test]
    fn test_shrink_args_order() {
        assert_eq!(
            args().to_cli_args(),
            vec![
                "-NoProfile",
                "-NonInteractive",
                "-ExecutionPolicy",
                "Bypass",
                "-File",
                "cache/Invoke-FslShrinkDisk/Invoke-FslShrinkDisk.ps1",
                "-Path",
                "Z:\\",
                "-Recurse",
                "-LogFilePath",
                "ShrinkDisk.csv",
            ]
        );
    }

    #[test]
    fn test_uses_log_file_path_not_log_path() {
        let cli = args().to_cli_args();
        assert!(cli.contains(&"-LogFilePath".to_string()));
        assert!(!cli.contains(&"-LogPath".to_string()));
    }

    #[test]
    fn test_recurse_switch_omitted_when_false() {
        let mut a = args();
        a.recurse = false;
        assert!(!a.to_cli_args().contains(&"-Recurse".to_string()));
    }

    #[test]
    fn test_program_is_configured_shell() {
        let mut a = args();
        a.shell = "pwsh".to_string();
        assert_eq!(a.program(), "pwsh");
        assert!(a.is_mutating());
    }
}
