//! Extracts test invocation commands from GitHub Actions workflow
//! descriptors, or infers them from project dependency markers.

use std::path::{Path, PathBuf};

use serde::Deserialize;

const TEST_KEYWORDS: &[&str] = &[
    "test", "pytest", "jest", "mocha", "rspec", "unittest", "nose", "check", "verify", "spec",
];

#[derive(Debug, Deserialize)]
struct WorkflowFile {
    #[serde(default)]
    jobs: serde_yaml::Mapping,
}

#[derive(Debug, Deserialize)]
struct WorkflowJob {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    steps: Vec<WorkflowStep>,
}

#[derive(Debug, Deserialize)]
struct WorkflowStep {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    run: Option<String>,
}

fn contains_test_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    TEST_KEYWORDS.iter().any(|k| lower.contains(k))
}

pub struct WorkflowParser {
    repo_path: PathBuf,
}

impl WorkflowParser {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    fn workflows_dir(&self) -> PathBuf {
        self.repo_path.join(".github").join("workflows")
    }

    fn find_workflow_files(&self) -> Vec<PathBuf> {
        let dir = self.workflows_dir();
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yml" | "yaml")))
            .collect();
        files.sort();
        files
    }

    /// Extracts test commands in encounter order, deduplicated. Jobs are
    /// walked in the order the YAML document declares them, not
    /// alphabetically, since a later job's commands must not be reordered
    /// ahead of an earlier one's.
    fn extract_test_commands(&self, workflow: &WorkflowFile) -> Vec<String> {
        let mut commands = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for (_, job_value) in &workflow.jobs {
            let Ok(job) = serde_yaml::from_value::<WorkflowJob>(job_value.clone()) else {
                continue;
            };
            let job_label = job.name.clone().unwrap_or_default();
            let is_test_job = contains_test_keyword(&job_label);

            for step in &job.steps {
                let step_name = step.name.clone().unwrap_or_default();
                let run = step.run.clone().unwrap_or_default();
                let is_test_step =
                    is_test_job || contains_test_keyword(&step_name) || contains_test_keyword(&run);

                if !is_test_step || run.is_empty() {
                    continue;
                }

                for line in run.lines() {
                    let trimmed = line.trim();
                    if trimmed.is_empty() || trimmed.starts_with('#') {
                        continue;
                    }
                    if seen.insert(trimmed.to_string()) {
                        commands.push(trimmed.to_string());
                    }
                }
            }
        }

        commands
    }

    /// Falls back to marker-based detection when no workflow-derived test
    /// commands are found.
    fn detect_by_markers(&self) -> Vec<String> {
        let exists = |name: &str| self.repo_path.join(name).exists();

        if exists("pyproject.toml") || exists("setup.py") || exists("requirements.txt") {
            vec!["python -m pytest -v".to_string()]
        } else if exists("package.json") {
            vec!["npm test".to_string()]
        } else if exists("go.mod") {
            vec!["go test ./...".to_string()]
        } else if exists("Cargo.toml") {
            vec!["cargo test".to_string()]
        } else {
            vec!["python -m pytest -v".to_string()]
        }
    }

    /// Returns the deduplicated list of test commands, preferring
    /// workflow-derived commands over marker-based inference.
    pub fn test_commands(&self) -> Vec<String> {
        let mut all = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for path in self.find_workflow_files() {
            let Ok(text) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(workflow) = serde_yaml::from_str::<WorkflowFile>(&text) else {
                continue;
            };
            for command in self.extract_test_commands(&workflow) {
                if seen.insert(command.clone()) {
                    all.push(command);
                }
            }
        }

        if all.is_empty() {
            self.detect_by_markers()
        } else {
            all
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }
}
