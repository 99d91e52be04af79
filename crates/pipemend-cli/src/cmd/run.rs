use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Args;
use pipemend_core::config::Config;
use pipemend_core::github::GitHubClient;
use pipemend_core::hosting::RepoRef;
use pipemend_core::llm::{ollama_from_config, LanguageModel};
use pipemend_core::state::{RunOptions, RunState};
use pipemend_core::types::ExecutionMode;
use pipemend_core::Engine;
use std::path::Path;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// RunExit: typed non-zero exit codes
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum RunExit {
    Failed { reason: String },
    Interrupted,
}

impl RunExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunExit::Failed { .. } => 1,
            RunExit::Interrupted => 130,
        }
    }
}

impl std::fmt::Display for RunExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunExit::Failed { reason } => write!(f, "run failed: {reason}"),
            RunExit::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::error::Error for RunExit {}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct RunArgs {
    /// Target repository as owner/name
    #[arg(long)]
    pub repo: String,

    /// Branch the workflow is generated for
    #[arg(long, default_value = "main")]
    pub branch: String,

    /// How far through the graph to go: detect-only, generate-only, or full
    #[arg(long, default_value = "full")]
    pub mode: ExecutionMode,

    /// Detect and generate only; never touch the repository
    #[arg(long)]
    pub dry_run: bool,

    /// Commit to the work branch without opening a pull request
    #[arg(long)]
    pub no_pr: bool,

    /// Watch the CI run after the pull request is opened
    #[arg(long)]
    pub monitor: bool,

    /// Diagnose failures but never patch them
    #[arg(long)]
    pub no_heal: bool,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        if self.dry_run {
            return RunOptions {
                mode: ExecutionMode::GenerateOnly,
                skip_pull_request: true,
                skip_healing: true,
                enable_monitoring: false,
            };
        }
        RunOptions {
            mode: self.mode,
            skip_pull_request: self.no_pr,
            skip_healing: self.no_heal,
            enable_monitoring: self.monitor,
        }
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn run(config_path: Option<&Path>, args: RunArgs, json: bool) -> anyhow::Result<()> {
    let repo = RepoRef::parse(&args.repo)?;
    let config = Config::load(config_path).context("failed to load config")?;
    let token = config
        .hosting
        .token
        .clone()
        .context("no GitHub token: set hosting.token or GITHUB_TOKEN")?;

    // Blocking HTTP clients own an internal runtime; build them outside ours.
    let host = GitHubClient::new(&config.hosting.api_url, token)
        .context("failed to build GitHub client")?;
    let model = ollama_from_config(&config.llm).context("failed to build Ollama client")?;
    if let Err(e) = LanguageModel::health(&model) {
        tracing::warn!(
            url = %config.llm.base_url,
            error = %e,
            "language model is unreachable; template rendering only"
        );
    }

    let engine = Engine::new(config, Arc::new(host), Arc::new(model))
        .context("failed to build engine")?;
    let options = args.options();
    tracing::info!(
        repo = %repo,
        branch = %args.branch,
        mode = %options.mode,
        "starting run"
    );
    let initial = RunState::new(repo.owner, repo.name, args.branch, options);

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(async move {
        let worker = tokio::task::spawn_blocking(move || engine.execute(initial));
        tokio::select! {
            res = worker => res.map(Some).context("run worker panicked"),
            _ = tokio::signal::ctrl_c() => Ok(None),
        }
    });
    // The worker may still be inside a blocking call after Ctrl-C.
    rt.shutdown_background();

    let Some(state) = outcome? else {
        return Err(RunExit::Interrupted.into());
    };

    if json {
        print_json(&state)?;
    } else {
        print_summary(&state);
    }

    if state.succeeded() {
        Ok(())
    } else {
        let reason = state
            .escalation
            .as_ref()
            .map(|e| e.reason.clone())
            .or_else(|| state.errors.last().cloned())
            .unwrap_or_else(|| "run ended without completing".to_string());
        Err(RunExit::Failed { reason }.into())
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

fn print_summary(state: &RunState) {
    let mut rows = vec![
        vec!["repository".to_string(), state.full_name()],
        vec!["run".to_string(), state.run_id.clone()],
        vec!["mode".to_string(), state.options.mode.to_string()],
    ];

    if let Some(meta) = &state.metadata {
        let version = meta.language_version.as_deref().unwrap_or("-");
        rows.push(vec!["language".to_string(), format!("{} {version}", meta.language)]);
    }
    if let Some(artifact) = &state.artifact {
        rows.push(vec![
            "pipeline".to_string(),
            format!(
                "{} (attempt {}, confidence {:.2})",
                artifact.path, artifact.attempt, artifact.confidence
            ),
        ]);
    }
    if let Some(v) = &state.validation {
        rows.push(vec![
            "validation".to_string(),
            format!(
                "{} error(s), {} security finding(s), {} warning(s)",
                v.errors.len(),
                v.security_findings.len(),
                v.warnings.len()
            ),
        ]);
    }
    if let Some(risk) = &state.risk {
        rows.push(vec![
            "risk".to_string(),
            format!("{} ({:.2})", risk.category, risk.score),
        ]);
    }
    if let Some(git) = &state.git {
        rows.push(vec!["branch".to_string(), git.branch.clone()]);
        if let Some(url) = &git.pr_url {
            rows.push(vec!["pull request".to_string(), url.clone()]);
        }
    }
    if let Some(exec) = &state.execution {
        let conclusion = exec
            .conclusion
            .map(|c| c.to_string())
            .unwrap_or_else(|| exec.status.to_string());
        rows.push(vec![
            "ci run".to_string(),
            format!("#{} {conclusion}", exec.run_number),
        ]);
    }
    if !state.healing_attempts.is_empty() {
        rows.push(vec![
            "healing".to_string(),
            format!("{} attempt(s)", state.healing_attempts.len()),
        ]);
    }
    rows.push(vec!["result".to_string(), state.next_action.to_string()]);

    print_table(&["FIELD", "VALUE"], rows);

    if let Some(esc) = &state.escalation {
        println!("\nEscalated: {}", esc.reason);
        for fix in &esc.manual_fix {
            println!("  - {fix}");
        }
    }
    for err in &state.errors {
        eprintln!("{err}");
    }
}
