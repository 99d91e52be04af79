//! In-memory collaborators for engine and healer tests.

use crate::error::{PipemendError, Result};
use crate::hosting::{
    FileCommit, JobStep, PullRequest, PullRequestDraft, RepoInfo, RepoRef, RepositoryHost, RunJob,
    WorkflowRun,
};
use crate::llm::LanguageModel;
use crate::types::{RunConclusion, RunStatus};
use ollama_client::{GenerateRequest, OllamaError};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// FakeHost
// ---------------------------------------------------------------------------

/// Outcome of the remote run triggered by the next commit.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub conclusion: RunConclusion,
    pub job: String,
    pub step: String,
    pub log: String,
}

impl ScriptedRun {
    pub fn success() -> Self {
        Self {
            conclusion: RunConclusion::Success,
            job: "ci".into(),
            step: String::new(),
            log: String::new(),
        }
    }

    pub fn failure(step: &str, log: &str) -> Self {
        Self {
            conclusion: RunConclusion::Failure,
            job: "ci".into(),
            step: step.into(),
            log: log.into(),
        }
    }
}

#[derive(Default)]
struct HostState {
    files: BTreeMap<String, String>,
    branches: Vec<String>,
    commits: Vec<FileCommit>,
    pulls: Vec<PullRequestDraft>,
    scripts: VecDeque<ScriptedRun>,
    runs: Vec<(WorkflowRun, ScriptedRun)>,
    reject_commits: bool,
}

#[derive(Default)]
pub struct FakeHost {
    inner: Mutex<HostState>,
}

impl FakeHost {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let host = Self::default();
        {
            let mut s = host.lock();
            for (path, content) in files {
                s.files.insert((*path).to_string(), (*content).to_string());
            }
        }
        host
    }

    /// Queue the outcome of the run started by the next commit. Commits with
    /// nothing queued produce a successful run.
    pub fn script_run(&self, run: ScriptedRun) {
        self.lock().scripts.push_back(run);
    }

    pub fn reject_commits(&self) {
        self.lock().reject_commits = true;
    }

    pub fn commits(&self) -> Vec<FileCommit> {
        self.lock().commits.clone()
    }

    pub fn pulls(&self) -> Vec<PullRequestDraft> {
        self.lock().pulls.clone()
    }

    pub fn branches(&self) -> Vec<String> {
        self.lock().branches.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.inner.lock().unwrap()
    }
}

impl RepositoryHost for FakeHost {
    fn repository(&self, repo: &RepoRef) -> Result<RepoInfo> {
        Ok(RepoInfo {
            full_name: repo.to_string(),
            default_branch: "main".into(),
            private: false,
            html_url: None,
        })
    }

    fn list_files(&self, _repo: &RepoRef, _branch: &str) -> Result<Vec<String>> {
        Ok(self.lock().files.keys().cloned().collect())
    }

    fn file_content(&self, _repo: &RepoRef, path: &str, _reference: &str) -> Result<Option<String>> {
        Ok(self.lock().files.get(path).cloned())
    }

    fn create_branch(&self, _repo: &RepoRef, branch: &str, _from: &str) -> Result<String> {
        self.lock().branches.push(branch.to_string());
        Ok("base-sha".into())
    }

    fn put_file(&self, _repo: &RepoRef, commit: &FileCommit) -> Result<String> {
        let mut s = self.lock();
        if s.reject_commits {
            return Err(PipemendError::Hosting {
                status: 409,
                message: "commit rejected".into(),
            });
        }
        s.commits.push(commit.clone());
        let n = s.commits.len() as u64;
        let sha = format!("sha-{n}");
        let script = s.scripts.pop_front().unwrap_or_else(ScriptedRun::success);
        let run = WorkflowRun {
            id: n,
            run_number: n,
            status: RunStatus::Completed,
            conclusion: Some(script.conclusion),
            head_branch: Some(commit.branch.clone()),
            head_sha: sha.clone(),
            html_url: Some(format!("https://example.test/runs/{n}")),
        };
        s.runs.push((run, script));
        Ok(sha)
    }

    fn create_pull_request(&self, _repo: &RepoRef, draft: &PullRequestDraft) -> Result<PullRequest> {
        let mut s = self.lock();
        s.pulls.push(draft.clone());
        let number = s.pulls.len() as u64;
        Ok(PullRequest {
            number,
            html_url: format!("https://example.test/pull/{number}"),
        })
    }

    fn runs_for_branch(&self, _repo: &RepoRef, branch: &str, limit: u32) -> Result<Vec<WorkflowRun>> {
        Ok(self
            .lock()
            .runs
            .iter()
            .rev()
            .filter(|(r, _)| r.head_branch.as_deref() == Some(branch))
            .take(limit as usize)
            .map(|(r, _)| r.clone())
            .collect())
    }

    fn run(&self, _repo: &RepoRef, run_id: u64) -> Result<WorkflowRun> {
        self.lock()
            .runs
            .iter()
            .find(|(r, _)| r.id == run_id)
            .map(|(r, _)| r.clone())
            .ok_or_else(|| PipemendError::Hosting {
                status: 404,
                message: "Not Found".into(),
            })
    }

    fn run_jobs(&self, _repo: &RepoRef, run_id: u64) -> Result<Vec<RunJob>> {
        let s = self.lock();
        let Some((run, script)) = s.runs.iter().find(|(r, _)| r.id == run_id) else {
            return Ok(Vec::new());
        };
        let conclusion = run.conclusion;
        let steps = if script.step.is_empty() {
            Vec::new()
        } else {
            vec![
                JobStep {
                    name: "Checkout code".into(),
                    number: 1,
                    status: RunStatus::Completed,
                    conclusion: Some(RunConclusion::Success),
                },
                JobStep {
                    name: script.step.clone(),
                    number: 2,
                    status: RunStatus::Completed,
                    conclusion,
                },
            ]
        };
        Ok(vec![RunJob {
            id: run_id * 100,
            name: script.job.clone(),
            status: RunStatus::Completed,
            conclusion,
            steps,
        }])
    }

    fn job_logs(&self, _repo: &RepoRef, job_id: u64) -> Result<Option<String>> {
        Ok(self
            .lock()
            .runs
            .iter()
            .find(|(r, _)| r.id * 100 == job_id)
            .map(|(_, s)| s.log.clone())
            .filter(|l| !l.is_empty()))
    }
}

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

/// Returns queued responses in order; fails once the queue is empty.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.prompts.lock().unwrap().clone()
    }
}

impl LanguageModel for ScriptedModel {
    fn health(&self) -> Result<()> {
        Ok(())
    }

    fn generate(&self, request: GenerateRequest) -> Result<String> {
        self.prompts.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PipemendError::Llm(OllamaError::Unavailable("scripted model".into())))
    }
}
