//! Type-safe arguments for the Windows `net use` drive mapping commands.
//!
//! - `NetUseQueryArgs` for `net use Z:` (read-only)
//! - `NetUseAddArgs` for `net use Z: \\server\share /persistent:no`
//! - `NetUseDeleteArgs` for `net use Z: /delete /y`
//!
//! `net` reports the mapping target on stdout as a `Remote name` row, and
//! signals "no such mapping" with a nonzero exit status.

use crate::tool_traits::ToolArgs;

const NET: &str = "net";

/// Arguments for querying the mapping at a local identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetUseQueryArgs {
    /// Local identifier, e.g. `Z:`.
    pub local_id: String,
}

impl ToolArgs for NetUseQueryArgs {
    fn program(&self) -> String {
        NET.to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["use".to_string(), self.local_id.clone()]
    }

    fn tool_name(&self) -> &'static str {
        "net use query"
    }

    fn is_mutating(&self) -> bool {
        false
    }
}

/// Arguments for creating a drive mapping.
///
/// # Field to Flag Mapping
///
/// | Rust Field    | CLI Flag                   |
/// |---------------|----------------------------|
/// | `local_id`    | positional                 |
/// | `remote_path` | positional                 |
/// | `persistent`  | `/persistent:yes` or `:no` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetUseAddArgs {
    pub local_id: String,
    pub remote_path: String,
    /// Whether Windows should restore the mapping at next logon.
    pub persistent: bool,
}

impl ToolArgs for NetUseAddArgs {
    fn program(&self) -> String {
        NET.to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        let persistence = if self.persistent {
            "/persistent:yes"
        } else {
            "/persistent:no"
        };
        vec![
            "use".to_string(),
            self.local_id.clone(),
            self.remote_path.clone(),
            persistence.to_string(),
        ]
    }

    fn tool_name(&self) -> &'static str {
        "net use add"
    }
}

/// Arguments for removing a drive mapping.
///
/// `/y` answers the "open files" prompt so the command never waits on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetUseDeleteArgs {
    pub local_id: String,
}

impl ToolArgs for NetUseDeleteArgs {
    fn program(&self) -> String {
        NET.to_string()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "use".to_string(),
            self.local_id.clone(),
            "/delete".to_string(),
            "/y".to_string(),
        ]
    }

    fn tool_name(&self) -> &'static str {
        "net use delete"
    }
}

/// Extract the remote path from `net use Z:` output.
///
/// Looks for the `Remote name` row first; on localized systems where the
/// label differs, falls back to the first UNC token on any line.
pub fn parse_remote_name(stdout: &str) -> Option<String> {
    for line in stdout.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("Remote name") {
            let rest = rest.trim();
            if !rest.is_empty() {
                return Some(rest.to_string());
            }
        }
    }

    stdout
        .split_whitespace()
        .find(|token| token.starts_with("\\\\"))
        .map(str::to_string)
}

/// Compare two UNC paths the way Windows does: case-insensitively, with
/// either slash style, ignoring trailing separators.
pub fn same_remote(a: &str, b: &str) -> bool {
    normalize_remote(a) == normalize_remote(b)
}

fn normalize_remote(path: &str) -> String {
    path.trim()
        .replace('/', "\\")
        .trim_end_matches('\\')
        .to_lowercase()
}
