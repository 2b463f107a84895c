//! Type-safe arguments for the git client.
//!
//! Every git invocation carries `GIT_TERMINAL_PROMPT=0`: credentials are
//! expected to be configured on the host, and a hidden prompt would otherwise
//! hang the workflow.

use std::path::PathBuf;

use crate::tool_traits::ToolArgs;

fn no_prompt_env() -> Vec<(String, String)> {
    vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())]
}

/// Arguments for `git clone <url> <dest>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCloneArgs {
    pub program: String,
    pub url: String,
    pub dest: PathBuf,
}

impl ToolArgs for GitCloneArgs {
    fn program(&self) -> String {
        self.program.clone()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "clone".to_string(),
            self.url.clone(),
            self.dest.display().to_string(),
        ]
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        no_prompt_env()
    }

    fn tool_name(&self) -> &'static str {
        "git clone"
    }
}

/// Arguments for `git -C <dir> pull`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitPullArgs {
    pub program: String,
    pub repo_dir: PathBuf,
}

impl ToolArgs for GitPullArgs {
    fn program(&self) -> String {
        self.program.clone()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-C".to_string(),
            self.repo_dir.display().to_string(),
            "pull".to_string(),
        ]
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        no_prompt_env()
    }

    fn tool_name(&self) -> &'static str {
        "git pull"
    }
}

/// Arguments for `git -C <dir> remote get-url <remote>` (read-only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRemoteUrlArgs {
    pub program: String,
    pub repo_dir: PathBuf,
    pub remote: String,
}

impl ToolArgs for GitRemoteUrlArgs {
    fn program(&self) -> String {
        self.program.clone()
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-C".to_string(),
            self.repo_dir.display().to_string(),
            "remote".to_string(),
            "get-url".to_string(),
            self.remote.clone(),
        ]
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        no_prompt_env()
    }

    fn tool_name(&self) -> &'static str {
        "git remote get-url"
    }

    fn is_mutating(&self) -> bool {
        false
    }
}

/// Whether two remote URLs name the same repository.
///
/// Ignores surrounding whitespace, trailing `/`, a trailing `.git` and case.
pub fn same_repository_url(a: &str, b: &str) -> bool {
    normalize_url(a) == normalize_url(b)
}

fn normalize_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    trimmed.trim_end_matches('/').to_lowercase()
}
