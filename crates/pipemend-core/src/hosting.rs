//! Version-control hosting capability set consumed by the engine.

use crate::error::{PipemendError, Result};
use crate::types::{RunConclusion, RunStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// RepoRef
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// Parse `owner/name`.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(owner, name))
            }
            _ => Err(PipemendError::InvalidRepo(s.to_string())),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInfo {
    pub full_name: String,
    pub default_branch: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FileCommit {
    pub path: String,
    pub content: String,
    pub message: String,
    pub branch: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PullRequestDraft {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub run_number: u64,
    pub status: RunStatus,
    #[serde(default)]
    pub conclusion: Option<RunConclusion>,
    #[serde(default)]
    pub head_branch: Option<String>,
    pub head_sha: String,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl WorkflowRun {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStep {
    pub name: String,
    #[serde(default)]
    pub number: u32,
    pub status: RunStatus,
    #[serde(default)]
    pub conclusion: Option<RunConclusion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunJob {
    pub id: u64,
    pub name: String,
    pub status: RunStatus,
    #[serde(default)]
    pub conclusion: Option<RunConclusion>,
    #[serde(default)]
    pub steps: Vec<JobStep>,
}

impl RunJob {
    pub fn failed(&self) -> bool {
        self.conclusion.is_some_and(RunConclusion::is_failure)
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &JobStep> {
        self.steps
            .iter()
            .filter(|s| s.conclusion.is_some_and(RunConclusion::is_failure))
    }
}

// ---------------------------------------------------------------------------
// RepositoryHost
// ---------------------------------------------------------------------------

/// Operations the engine needs from a hosting provider.
///
/// Mutating calls return only after the provider acknowledged the change.
pub trait RepositoryHost: Send + Sync {
    fn repository(&self, repo: &RepoRef) -> Result<RepoInfo>;

    /// Every file path on `branch`, recursively.
    fn list_files(&self, repo: &RepoRef, branch: &str) -> Result<Vec<String>>;

    /// `Ok(None)` when the path does not exist at `reference`.
    fn file_content(&self, repo: &RepoRef, path: &str, reference: &str) -> Result<Option<String>>;

    /// Create `branch` from the head of `from`. An existing branch is not an
    /// error; its current head sha is returned.
    fn create_branch(&self, repo: &RepoRef, branch: &str, from: &str) -> Result<String>;

    /// Create or update a file. Returns the new commit sha.
    fn put_file(&self, repo: &RepoRef, commit: &FileCommit) -> Result<String>;

    fn create_pull_request(&self, repo: &RepoRef, draft: &PullRequestDraft) -> Result<PullRequest>;

    /// Most recent runs on `branch`, newest first.
    fn runs_for_branch(&self, repo: &RepoRef, branch: &str, limit: u32) -> Result<Vec<WorkflowRun>>;

    fn latest_run(&self, repo: &RepoRef, branch: &str) -> Result<Option<WorkflowRun>> {
        Ok(self.runs_for_branch(repo, branch, 1)?.into_iter().next())
    }

    /// Fetch a run by id; used to refresh its status.
    fn run(&self, repo: &RepoRef, run_id: u64) -> Result<WorkflowRun>;

    fn run_jobs(&self, repo: &RepoRef, run_id: u64) -> Result<Vec<RunJob>>;

    /// Plain-text log for a job. `Ok(None)` when logs are unavailable.
    fn job_logs(&self, repo: &RepoRef, job_id: u64) -> Result<Option<String>>;

    /// Logs of every failed job in a run, concatenated. Best-effort.
    fn run_logs(&self, repo: &RepoRef, run_id: u64) -> Result<Option<String>> {
        let mut combined = String::new();
        for job in self.run_jobs(repo, run_id)?.iter().filter(|j| j.failed()) {
            if let Some(log) = self.job_logs(repo, job.id)? {
                combined.push_str(&log);
                if !combined.ends_with('\n') {
                    combined.push('\n');
                }
            }
        }
        Ok((!combined.is_empty()).then_some(combined))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
