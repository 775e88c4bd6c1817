//! Repository context loader. Enumerates versioned files, reads file
//! content at a revision, and lists recent commit identifiers by shelling
//! out to `git` and wrapping each invocation in a `Result`.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{NightingaleError, Result};

pub struct RepositoryContextLoader {
    repo_path: PathBuf,
}

impl RepositoryContextLoader {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .output()
            .map_err(|e| NightingaleError::Transient(format!("spawning git: {e}")))?;

        if !output.status.success() {
            return Err(NightingaleError::Transient(format!(
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Lists every file tracked at `HEAD`, relative to the repo root.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let stdout = self.run_git(&["ls-tree", "-r", "--name-only", "HEAD"])?;
        Ok(stdout.lines().map(std::string::ToString::to_string).collect())
    }

    /// Reads a file's content at the given revision (default `HEAD`).
    /// Returns an empty string if the path did not exist at that revision.
    pub fn get_file_content(&self, file_path: &str, revision: &str) -> String {
        self.run_git(&["show", &format!("{revision}:{file_path}")])
            .unwrap_or_default()
    }

    /// Lists the `n` most recent commit identifiers, newest first.
    pub fn recent_commits(&self, n: usize) -> Result<Vec<String>> {
        let stdout = self.run_git(&["log", &format!("-{n}"), "--format=%H"])?;
        Ok(stdout.lines().map(std::string::ToString::to_string).collect())
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }
}
