//! Snapshot-copies the repository, applies whole-file changes, runs
//! verification commands under a timeout, and checks that the original
//! tree was not mutated by the attempt. Not an OS-level sandbox — a
//! directory copy plus a subprocess with a timeout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{error, instrument};

use crate::domain::{ChangeType, FileChange};
use crate::error::{NightingaleError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

fn is_ignored(name: &str) -> bool {
    name == ".git" || name == "__pycache__" || name == ".nightingale_cache" || name.ends_with(".pyc")
}

/// Recomputes a deterministic SHA-256 fingerprint of `root`, visiting
/// entries in sorted path order and excluding `{.git, <sandbox_base>,
/// __pycache__, .nightingale_cache, *.pyc}`, mixing relative path then
/// file bytes into the hasher.
fn fingerprint_tree(root: &Path, sandbox_base: &str) -> Result<String> {
    let mut paths = Vec::new();
    collect_files(root, root, sandbox_base, &mut paths)?;
    paths.sort();

    let mut hasher = Sha256::new();
    for rel in paths {
        hasher.update(rel.to_string_lossy().as_bytes());
        let bytes = std::fs::read(root.join(&rel))
            .map_err(|e| NightingaleError::Sandbox(format!("reading {}: {e}", rel.display())))?;
        hasher.update(bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn collect_files(root: &Path, dir: &Path, sandbox_base: &str, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| NightingaleError::Sandbox(format!("reading {}: {e}", dir.display())))?;

    for entry in entries {
        let entry = entry.map_err(|e| NightingaleError::Sandbox(e.to_string()))?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if is_ignored(&name) || name == sandbox_base {
            continue;
        }

        if path.is_dir() {
            collect_files(root, &path, sandbox_base, out)?;
        } else {
            out.push(path.strip_prefix(root).unwrap().to_path_buf());
        }
    }
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path, sandbox_base: &str) -> Result<()> {
    if dst.exists() {
        std::fs::remove_dir_all(dst)
            .map_err(|e| NightingaleError::Sandbox(format!("clearing sandbox path: {e}")))?;
    }
    std::fs::create_dir_all(dst).map_err(|e| NightingaleError::Sandbox(format!("creating sandbox path: {e}")))?;

    let mut files = Vec::new();
    collect_files(src, src, sandbox_base, &mut files)?;

    for rel in files {
        let from = src.join(&rel);
        let to = dst.join(&rel);
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| NightingaleError::Sandbox(format!("creating {}: {e}", parent.display())))?;
        }
        std::fs::copy(&from, &to)
            .map_err(|e| NightingaleError::Sandbox(format!("copying {}: {e}", rel.display())))?;
    }
    Ok(())
}

fn resolve_under(root: &Path, rel_path: &str) -> Result<PathBuf> {
    let joined = root.join(rel_path);
    let normalized = normalize(&joined);
    let root_normalized = normalize(root);
    if !normalized.starts_with(&root_normalized) {
        return Err(NightingaleError::Sandbox(format!(
            "path escapes target tree: {rel_path}"
        )));
    }
    Ok(joined)
}

/// Applies each `FileChange` against `root`. Shared by the sandbox's own
/// `apply` and the resolution gate's working-tree mutation — the rule set
/// is identical, only the root differs.
pub fn apply_to_tree(root: &Path, changes: &[FileChange]) -> Result<()> {
    for change in changes {
        let target = resolve_under(root, &change.file_path)?;
        match change.change_type {
            ChangeType::Modify | ChangeType::Add => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| NightingaleError::Sandbox(format!("creating {}: {e}", parent.display())))?;
                }
                std::fs::write(&target, &change.content)
                    .map_err(|e| NightingaleError::Sandbox(format!("writing {}: {e}", target.display())))?;
            }
            ChangeType::Delete => {
                if target.exists() {
                    std::fs::remove_file(&target)
                        .map_err(|e| NightingaleError::Sandbox(format!("removing {}: {e}", target.display())))?;
                }
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

pub struct Sandbox {
    repo_path: PathBuf,
    sandbox_base: String,
    sandbox_path: PathBuf,
    original_hash: Option<String>,
}

impl Sandbox {
    pub fn new(repo_path: impl Into<PathBuf>, sandbox_base: &str, id: &str) -> Self {
        let repo_path = repo_path.into();
        let sandbox_path = repo_path.join(sandbox_base).join(id);
        Self {
            repo_path,
            sandbox_base: sandbox_base.to_string(),
            sandbox_path,
            original_hash: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.sandbox_path
    }

    /// Fingerprints the original tree, then copies it into the sandbox
    /// path, replacing any prior content there.
    #[instrument(skip(self))]
    pub fn setup(&mut self) -> Result<()> {
        let hash = fingerprint_tree(&self.repo_path, &self.sandbox_base)?;
        self.original_hash = Some(hash);
        copy_tree(&self.repo_path, &self.sandbox_path, &self.sandbox_base)
    }

    /// Applies each `FileChange` to the sandbox tree only.
    pub fn apply(&self, changes: &[FileChange]) -> Result<()> {
        apply_to_tree(&self.sandbox_path, changes)
    }

    /// Runs `command` as a shell command with cwd set to the sandbox,
    /// under `timeout`. A timeout returns exit code -1 with a synthetic
    /// stderr message and is not retried.
    pub async fn run_command(&self, command: &str, timeout: Duration) -> CommandOutcome {
        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.sandbox_path)
            .output();

        match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => CommandOutcome {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            },
            Ok(Err(e)) => CommandOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("failed to spawn command: {e}"),
            },
            Err(_) => CommandOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: "command timed out".to_string(),
            },
        }
    }

    pub async fn run_command_default_timeout(&self, command: &str) -> CommandOutcome {
        self.run_command(command, DEFAULT_TIMEOUT).await
    }

    /// Recomputes the original tree's fingerprint and compares it to the
    /// value captured at `setup`. A mismatch is reported but does not by
    /// itself fail the incident.
    pub fn verify_original_unchanged(&self) -> Result<bool> {
        let Some(expected) = &self.original_hash else {
            return Err(NightingaleError::Sandbox("verify called before setup".to_string()));
        };
        let current = fingerprint_tree(&self.repo_path, &self.sandbox_base)?;
        let unchanged = &current == expected;
        if !unchanged {
            error!(incident_path = %self.repo_path.display(), "INTEGRITY VIOLATION");
        }
        Ok(unchanged)
    }

    /// Removes the sandbox directory. Idempotent.
    pub fn cleanup(&self) -> Result<()> {
        if self.sandbox_path.exists() {
            std::fs::remove_dir_all(&self.sandbox_path)
                .map_err(|e| NightingaleError::Sandbox(format!("removing sandbox: {e}")))?;
        }
        Ok(())
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "fn add(a: i32, b: i32) -> i32 { a + b }\n").unwrap();
        dir
    }

    #[test]
    fn setup_copies_tree_and_captures_fingerprint() {
        let repo = sample_repo();
        let mut sandbox = Sandbox::new(repo.path(), ".sandbox", "attempt-1");
        sandbox.setup().unwrap();
        assert!(sandbox.path().join("lib.rs").exists());
        assert!(sandbox.verify_original_unchanged().unwrap());
    }

    #[test]
    fn apply_writes_modify_and_add_then_delete() {
        let repo = sample_repo();
        let mut sandbox = Sandbox::new(repo.path(), ".sandbox", "attempt-2");
        sandbox.setup().unwrap();

        sandbox
            .apply(&[
                FileChange {
                    file_path: "lib.rs".into(),
                    change_type: ChangeType::Modify,
                    content: "fn add(a: i32, b: i32) -> i32 { a + b + 1 }\n".into(),
                },
                FileChange {
                    file_path: "new.rs".into(),
                    change_type: ChangeType::Add,
                    content: "// new\n".into(),
                },
            ])
            .unwrap();

        assert!(std::fs::read_to_string(sandbox.path().join("lib.rs"))
            .unwrap()
            .contains('1'));
        assert!(sandbox.path().join("new.rs").exists());

        sandbox
            .apply(&[FileChange {
                file_path: "new.rs".into(),
                change_type: ChangeType::Delete,
                content: String::new(),
            }])
            .unwrap();
        assert!(!sandbox.path().join("new.rs").exists());
    }

    #[test]
    fn apply_rejects_path_escape() {
        let repo = sample_repo();
        let mut sandbox = Sandbox::new(repo.path(), ".sandbox", "attempt-3");
        sandbox.setup().unwrap();

        let result = sandbox.apply(&[FileChange {
            file_path: "../../etc/passwd".into(),
            change_type: ChangeType::Add,
            content: "evil".into(),
        }]);
        assert!(result.is_err());
    }

    #[test]
    fn integrity_check_detects_mutation_of_original_tree() {
        let repo = sample_repo();
        let mut sandbox = Sandbox::new(repo.path(), ".sandbox", "attempt-4");
        sandbox.setup().unwrap();

        std::fs::write(repo.path().join("lib.rs"), "tampered").unwrap();
        assert!(!sandbox.verify_original_unchanged().unwrap());
    }

    #[tokio::test]
    async fn run_command_times_out() {
        let repo = sample_repo();
        let mut sandbox = Sandbox::new(repo.path(), ".sandbox", "attempt-5");
        sandbox.setup().unwrap();

        let outcome = sandbox.run_command("sleep 5", Duration::from_millis(50)).await;
        assert_eq!(outcome.exit_code, -1);
        assert!(outcome.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn run_command_captures_exit_code_and_output() {
        let repo = sample_repo();
        let mut sandbox = Sandbox::new(repo.path(), ".sandbox", "attempt-6");
        sandbox.setup().unwrap();

        let outcome = sandbox.run_command("echo hi && exit 0", Duration::from_secs(5)).await;
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.stdout.contains("hi"));
    }
}
