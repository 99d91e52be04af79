//! Bounded, autonomous repair of a failing pipeline.
//!
//! One call to [`HealingEngine::heal`] is one attempt: pick the primary
//! failure of the latest run, choose a strategy, synthesize a patch and
//! commit it to the work branch. The attempt counter on the run state
//! never passes `max_attempts`; once it is reached the engine escalates
//! with a [`FailureSummary`] instead of patching again.

use crate::error::{PipemendError, Result};
use crate::escalation::{manual_fix, FailureSummary};
use crate::hosting::{FileCommit, RepoRef, RepositoryHost};
use crate::llm::LanguageModel;
use crate::patch;
use crate::state::{Escalation, FailureRecord, HealingAttempt, PipelineArtifact, RunState};
use crate::strategy::{self, MatchContext, Strategy, StrategyChoice};
use crate::types::{AttemptOutcome, NextAction, StepName};
use chrono::Utc;
use ollama_client::GenerateRequest;
use std::sync::Arc;
use std::time::Duration;

/// Tail of the run log kept on a failure record.
pub const LOG_TAIL_LINES: usize = 100;
pub const LOG_TAIL_CHARS: usize = 2000;
/// Log characters sent to the model.
const PROMPT_LOG_CHARS: usize = 1500;
/// Shorter excerpts carry too little signal for a model patch.
const MIN_LOG_FOR_LLM: usize = 50;
const LLM_PATCH_CONFIDENCE: f64 = 0.70;
const LLM_TEMPERATURE: f32 = 0.1;

const PATCH_SYSTEM_PROMPT: &str = "\
You repair GitHub Actions workflows.
Read the failure report and return the complete corrected workflow YAML.

- Keep every existing job and the overall structure.
- Change only what the failure requires.
- Gradle projects need an executable wrapper (chmod +x gradlew).
- Check toolchain versions and dependency installation for build errors.
- Never add secrets or credentials.

Return only the YAML document.";

/// A synthesized change to the pipeline text.
#[derive(Debug, Clone)]
struct Patch {
    content: String,
    description: String,
    confidence: f64,
    model: Option<String>,
}

pub struct HealingEngine {
    host: Arc<dyn RepositoryHost>,
    model: Arc<dyn LanguageModel>,
    model_name: String,
    timeout: Duration,
    max_attempts: u32,
}

impl HealingEngine {
    pub fn new(
        host: Arc<dyn RepositoryHost>,
        model: Arc<dyn LanguageModel>,
        model_name: impl Into<String>,
        timeout: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            host,
            model,
            model_name: model_name.into(),
            timeout,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn heal(&self, state: &mut RunState) -> Result<NextAction> {
        let Some(primary) = self.primary_failure(state) else {
            return Err(PipemendError::MissingState("failure records"));
        };

        if state.healing_count >= self.max_attempts {
            let summary = FailureSummary::from_state(state, self.max_attempts);
            tracing::warn!(
                repo = %state.full_name(),
                attempts = state.healing_count,
                "healing attempts exhausted, escalating"
            );
            state.escalation = Some(Escalation {
                reason: format!(
                    "healing attempts exhausted ({}/{})",
                    state.healing_count, self.max_attempts
                ),
                manual_fix: summary.manual_fix.clone(),
                summary: Some(summary),
            });
            return Ok(NextAction::Fail);
        }

        let repo = RepoRef::new(state.owner.as_str(), state.name.as_str());
        self.attach_log(state, &repo, primary);

        let failure = state.failures[primary].clone();
        let artifact = state
            .artifact
            .clone()
            .ok_or(PipemendError::MissingState("pipeline artifact"))?;

        let choice = strategy::select(&MatchContext::new(
            &failure.step,
            &failure.message,
            &failure.log_excerpt,
            failure.category,
            &artifact.content,
        ));
        tracing::info!(
            category = %failure.category,
            strategy = %choice.strategy,
            confidence = choice.confidence,
            attempt = state.healing_count + 1,
            "healing strategy selected"
        );

        let patch = self
            .synthesize(state, &failure, &artifact, choice)
            .filter(|p| p.content.trim() != artifact.content.trim());
        let Some(patch) = patch else {
            state.escalate(
                format!(
                    "no applicable patch for {} failure in '{}' using {}",
                    failure.category, failure.step, choice.strategy
                ),
                manual_fix(failure.category),
            );
            return Ok(NextAction::Fail);
        };

        self.apply(state, &repo, &artifact, choice.strategy, patch)
    }

    /// Index of the first failure recorded for the latest run.
    fn primary_failure(&self, state: &RunState) -> Option<usize> {
        let run_id = state.execution.as_ref().map(|e| e.run_id);
        state
            .failures
            .iter()
            .position(|f| Some(f.run_id) == run_id)
            .or_else(|| (!state.failures.is_empty()).then(|| state.failures.len() - 1))
    }

    /// Fill the log excerpt from the run log when diagnosis did not.
    fn attach_log(&self, state: &mut RunState, repo: &RepoRef, index: usize) {
        if !state.failures[index].log_excerpt.is_empty() {
            return;
        }
        let run_id = state.failures[index].run_id;
        match self.host.run_logs(repo, run_id) {
            Ok(Some(log)) => state.failures[index].log_excerpt = log_tail(&log),
            Ok(None) => tracing::debug!(run_id, "no logs available"),
            Err(e) => tracing::warn!(run_id, error = %e, "failed to fetch run logs"),
        }
    }

    fn synthesize(
        &self,
        state: &RunState,
        failure: &FailureRecord,
        artifact: &PipelineArtifact,
        choice: StrategyChoice,
    ) -> Option<Patch> {
        let mechanical = |content: Option<String>| {
            content.map(|content| Patch {
                content,
                description: choice.strategy.describe().to_string(),
                confidence: choice.confidence,
                model: None,
            })
        };

        match choice.strategy {
            Strategy::WrapperPermission => {
                mechanical(patch::insert_wrapper_permission(&artifact.content))
            }
            Strategy::VersionAdjustment => mechanical(patch::pin_java_version(&artifact.content)),
            Strategy::TestRemediation => {
                let from_model = (failure.log_excerpt.len() > MIN_LOG_FOR_LLM)
                    .then(|| self.model_patch(state, failure, artifact))
                    .flatten();
                from_model.or_else(|| mechanical(patch::add_test_flags(&artifact.content)))
            }
            Strategy::PythonDependency | Strategy::NodeDependency | Strategy::LlmAnalysis => {
                self.model_patch(state, failure, artifact)
            }
        }
    }

    fn model_patch(
        &self,
        state: &RunState,
        failure: &FailureRecord,
        artifact: &PipelineArtifact,
    ) -> Option<Patch> {
        let request = GenerateRequest::new(self.model_name.as_str(), patch_prompt(state, failure, artifact))
            .system(PATCH_SYSTEM_PROMPT)
            .temperature(LLM_TEMPERATURE)
            .timeout(self.timeout);

        let content = self
            .model
            .generate(request)
            .and_then(|response| patch::extract_pipeline(&response));
        match content {
            Ok(content) => Some(Patch {
                content,
                description: format!("model fix for {} in {}", failure.category, failure.step),
                confidence: LLM_PATCH_CONFIDENCE,
                model: Some(self.model_name.clone()),
            }),
            Err(e) => {
                tracing::warn!(error = %e, "model patch unavailable");
                None
            }
        }
    }

    fn apply(
        &self,
        state: &mut RunState,
        repo: &RepoRef,
        artifact: &PipelineArtifact,
        strategy: Strategy,
        patch: Patch,
    ) -> Result<NextAction> {
        let branch = state
            .git
            .as_ref()
            .map(|g| g.branch.clone())
            .filter(|b| !b.is_empty())
            .ok_or(PipemendError::MissingState("work branch"))?;

        let sequence = state.healing_count + 1;
        state.healing_attempts.push(HealingAttempt {
            sequence,
            strategy,
            patch: patch.content.clone(),
            confidence: patch.confidence,
            applied: false,
            outcome: AttemptOutcome::Pending,
            commit_sha: None,
            at: Utc::now(),
        });

        let commit = FileCommit {
            path: artifact.path.clone(),
            content: patch.content.clone(),
            message: format!("fix: {}\n\nHealing attempt #{sequence}", patch.description),
            branch: branch.clone(),
        };

        match self.host.put_file(repo, &commit) {
            Ok(sha) => {
                if let Some(attempt) = state.healing_attempts.last_mut() {
                    attempt.applied = true;
                    attempt.outcome = AttemptOutcome::Committed;
                    attempt.commit_sha = Some(sha.clone());
                }
                state.healing_count = sequence;
                if let Some(git) = state.git.as_mut() {
                    git.head_sha = Some(sha.clone());
                    git.commit_message = commit.message;
                }
                let mut patched = PipelineArtifact::new(patch.content, artifact.confidence, artifact.path.clone());
                patched.generator_model = patch.model.or_else(|| artifact.generator_model.clone());
                patched.attempt = artifact.attempt;
                state.replace_artifact(patched);

                tracing::info!(sequence, strategy = %strategy, sha = %sha, "healing patch committed");
                Ok(NextAction::Step(StepName::ObserveExecution))
            }
            Err(e) => {
                if let Some(attempt) = state.healing_attempts.last_mut() {
                    attempt.outcome = AttemptOutcome::CommitFailed;
                }
                tracing::error!(error = %e, "healing commit failed");
                state.escalate(
                    format!("healing patch could not be committed: {e}"),
                    vec![
                        format!("Apply the attempted patch to {} on branch {branch}", commit.path),
                        "Check that the token can push to the work branch".to_string(),
                    ],
                );
                Ok(NextAction::Fail)
            }
        }
    }
}

fn patch_prompt(state: &RunState, failure: &FailureRecord, artifact: &PipelineArtifact) -> String {
    let mut report = format!(
        "Failure:\n- Category: {}\n- Job: {}\n- Step: {}\n- Error: {}",
        failure.category, failure.job, failure.step, failure.message
    );
    if !failure.root_cause.is_empty() {
        report.push_str(&format!("\n- Probable cause: {}", failure.root_cause));
    }
    if !failure.log_excerpt.is_empty() {
        let log: String = failure.log_excerpt.chars().take(PROMPT_LOG_CHARS).collect();
        report.push_str(&format!("\n\nLog excerpt:\n{log}"));
    }
    format!(
        "Repair this GitHub Actions workflow.\n\n{report}\n\nRepository: {}\nPrevious healing attempts: {}\n\nCurrent workflow:\n```yaml\n{}\n```\n\nFix the cause of the failure and return the full workflow.",
        state.full_name(),
        state.healing_count,
        artifact.content.trim_end()
    )
}

/// Last [`LOG_TAIL_LINES`] lines, then at most the last [`LOG_TAIL_CHARS`]
/// characters of those.
pub fn log_tail(log: &str) -> String {
    let lines: Vec<&str> = log.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    let tail = lines[start..].join("\n");
    let count = tail.chars().count();
    if count <= LOG_TAIL_CHARS {
        tail
    } else {
        tail.chars().skip(count - LOG_TAIL_CHARS).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
