//! GitHub REST v3 implementation of [`RepositoryHost`].

use crate::error::{PipemendError, Result};
use crate::hosting::{
    FileCommit, PullRequest, PullRequestDraft, RepoInfo, RepoRef, RepositoryHost, RunJob,
    WorkflowRun,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("pipemend/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct ContentResponse {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Deserialize)]
struct RefResponse {
    object: RefObject,
}

#[derive(Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Deserialize)]
struct PutContentResponse {
    commit: RefObject,
}

#[derive(Deserialize)]
struct RunsResponse {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Deserialize)]
struct JobsResponse {
    #[serde(default)]
    jobs: Vec<RunJob>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

// ---------------------------------------------------------------------------
// GitHubClient
// ---------------------------------------------------------------------------

pub struct GitHubClient {
    http: Client,
    api_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_url: &str, token: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let resp = builder.send()?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(api_error(resp))
        }
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.send(self.request(Method::GET, path))?;
        Ok(serde_json::from_str(&resp.text()?)?)
    }

    fn head_sha(&self, repo: &RepoRef, branch: &str) -> Result<String> {
        let r: RefResponse = self.get_json(&format!("/repos/{repo}/git/ref/heads/{branch}"))?;
        Ok(r.object.sha)
    }

    fn content(&self, repo: &RepoRef, path: &str, reference: &str) -> Result<Option<ContentResponse>> {
        let resp = self
            .request(Method::GET, &format!("/repos/{repo}/contents/{path}"))
            .query(&[("ref", reference)])
            .send()?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(api_error(resp));
        }
        Ok(Some(serde_json::from_str(&resp.text()?)?))
    }
}

fn api_error(resp: Response) -> PipemendError {
    let status = resp.status().as_u16();
    let body = resp.text().unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or(body);
    PipemendError::Hosting { status, message }
}

fn decode_content(c: &ContentResponse) -> Result<String> {
    if c.encoding != "base64" {
        return Ok(c.content.clone());
    }
    let compact: String = c.content.chars().filter(|ch| !ch.is_whitespace()).collect();
    let bytes = STANDARD.decode(compact).map_err(|e| PipemendError::Hosting {
        status: 200,
        message: format!("undecodable file content: {e}"),
    })?;
    String::from_utf8(bytes).map_err(|e| PipemendError::Hosting {
        status: 200,
        message: format!("file content is not UTF-8: {e}"),
    })
}

impl RepositoryHost for GitHubClient {
    fn repository(&self, repo: &RepoRef) -> Result<RepoInfo> {
        self.get_json(&format!("/repos/{repo}"))
    }

    fn list_files(&self, repo: &RepoRef, branch: &str) -> Result<Vec<String>> {
        let resp = self.send(
            self.request(Method::GET, &format!("/repos/{repo}/git/trees/{branch}"))
                .query(&[("recursive", "1")]),
        )?;
        let tree: TreeResponse = serde_json::from_str(&resp.text()?)?;
        if tree.truncated {
            tracing::warn!(repo = %repo, branch, "file tree truncated by the API");
        }
        Ok(tree
            .tree
            .into_iter()
            .filter(|e| e.kind == "blob")
            .map(|e| e.path)
            .collect())
    }

    fn file_content(&self, repo: &RepoRef, path: &str, reference: &str) -> Result<Option<String>> {
        match self.content(repo, path, reference)? {
            Some(c) => decode_content(&c).map(Some),
            None => Ok(None),
        }
    }

    fn create_branch(&self, repo: &RepoRef, branch: &str, from: &str) -> Result<String> {
        let sha = self.head_sha(repo, from)?;
        let resp = self
            .request(Method::POST, &format!("/repos/{repo}/git/refs"))
            .json(&serde_json::json!({ "ref": format!("refs/heads/{branch}"), "sha": sha }))
            .send()?;
        match resp.status() {
            s if s.is_success() => {
                tracing::info!(repo = %repo, branch, from, "branch created");
                Ok(sha)
            }
            StatusCode::UNPROCESSABLE_ENTITY => {
                tracing::warn!(repo = %repo, branch, "branch already exists");
                self.head_sha(repo, branch)
            }
            _ => Err(api_error(resp)),
        }
    }

    fn put_file(&self, repo: &RepoRef, commit: &FileCommit) -> Result<String> {
        let existing = self.content(repo, &commit.path, &commit.branch)?;
        let mut body = serde_json::json!({
            "message": commit.message,
            "content": STANDARD.encode(commit.content.as_bytes()),
            "branch": commit.branch,
        });
        if let Some(c) = existing {
            body["sha"] = serde_json::Value::String(c.sha);
        }
        let resp = self.send(
            self.request(Method::PUT, &format!("/repos/{repo}/contents/{}", commit.path))
                .json(&body),
        )?;
        let put: PutContentResponse = serde_json::from_str(&resp.text()?)?;
        tracing::info!(repo = %repo, path = %commit.path, branch = %commit.branch, sha = %put.commit.sha, "file committed");
        Ok(put.commit.sha)
    }

    fn create_pull_request(&self, repo: &RepoRef, draft: &PullRequestDraft) -> Result<PullRequest> {
        let resp = self.send(
            self.request(Method::POST, &format!("/repos/{repo}/pulls"))
                .json(draft),
        )?;
        let pr: PullRequest = serde_json::from_str(&resp.text()?)?;
        tracing::info!(repo = %repo, number = pr.number, url = %pr.html_url, "pull request created");
        Ok(pr)
    }

    fn runs_for_branch(&self, repo: &RepoRef, branch: &str, limit: u32) -> Result<Vec<WorkflowRun>> {
        let per_page = limit.to_string();
        let resp = self.send(
            self.request(Method::GET, &format!("/repos/{repo}/actions/runs"))
                .query(&[("branch", branch), ("per_page", per_page.as_str())]),
        )?;
        let runs: RunsResponse = serde_json::from_str(&resp.text()?)?;
        Ok(runs.workflow_runs)
    }

    fn run(&self, repo: &RepoRef, run_id: u64) -> Result<WorkflowRun> {
        self.get_json(&format!("/repos/{repo}/actions/runs/{run_id}"))
    }

    fn run_jobs(&self, repo: &RepoRef, run_id: u64) -> Result<Vec<RunJob>> {
        let jobs: JobsResponse = self.get_json(&format!("/repos/{repo}/actions/runs/{run_id}/jobs"))?;
        Ok(jobs.jobs)
    }

    fn job_logs(&self, repo: &RepoRef, job_id: u64) -> Result<Option<String>> {
        let resp = self
            .request(Method::GET, &format!("/repos/{repo}/actions/jobs/{job_id}/logs"))
            .send()?;
        if !resp.status().is_success() {
            tracing::debug!(job_id, status = resp.status().as_u16(), "job logs unavailable");
            return Ok(None);
        }
        Ok(Some(resp.text()?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
