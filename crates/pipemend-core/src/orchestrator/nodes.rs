use super::Engine;
use crate::classifier::{classify, root_cause, UNKNOWN_CONFIDENCE};
use crate::detector;
use crate::error::{PipemendError, Result};
use crate::healer::log_tail;
use crate::hosting::{FileCommit, PullRequestDraft};
use crate::patch;
use crate::risk;
use crate::state::{FailureRecord, GitOperation, PipelineArtifact, RepositoryMetadata, RunState};
use crate::types::{FailureCategory, NextAction, StepName};
use chrono::Utc;
use ollama_client::GenerateRequest;
use std::fmt::Write as _;
use std::time::Duration;

const BASE_CONFIDENCE: f64 = 0.95;
const ENHANCED_CONFIDENCE: f64 = 0.85;
const REGENERATION_DECAY: f64 = 0.15;
const CONFIDENCE_FLOOR: f64 = 0.3;

const ENHANCE_SYSTEM_PROMPT: &str = "\
You extend GitHub Actions workflows with a project's own scripts.
Keep every existing step. Add the custom commands where they fit.
Never add secrets or credentials. Keep the workflow minimal.
Return only the complete YAML document.";

const REPAIR_SYSTEM_PROMPT: &str = "\
You fix GitHub Actions workflows that failed validation.
Address every listed error and keep the rest of the workflow unchanged.
Return only the complete YAML document.";

const PR_SYSTEM_PROMPT: &str = "\
You write pull request descriptions for CI workflow changes.
Explain what the workflow runs and why it helps, in three to five short
Markdown paragraphs.";

// ---------------------------------------------------------------------------
// detect
// ---------------------------------------------------------------------------

pub(super) fn detect(engine: &Engine, state: &mut RunState) -> Result<NextAction> {
    let repo = Engine::repo(state);
    let info = engine.host.repository(&repo)?;
    tracing::debug!(repo = %info.full_name, default_branch = %info.default_branch, "repository found");
    state.metadata = Some(detector::detect(engine.host.as_ref(), &repo, &state.branch)?);
    Ok(NextAction::Step(StepName::Generate))
}

// ---------------------------------------------------------------------------
// generate
// ---------------------------------------------------------------------------

pub(super) fn generate(engine: &Engine, state: &mut RunState) -> Result<NextAction> {
    let meta = state
        .metadata
        .clone()
        .ok_or(PipemendError::MissingState("repository metadata"))?;
    state.generation_attempts += 1;
    let attempt = state.generation_attempts;
    let llm = &engine.config.llm;

    let artifact = match (&state.artifact, &state.validation) {
        (Some(previous), Some(validation)) if validation.has_structural_errors() => {
            let confidence = (previous.confidence - REGENERATION_DECAY).max(CONFIDENCE_FLOOR);
            let content = match repair(engine, previous, &validation.errors) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(error = %e, "model repair failed, re-rendering template");
                    engine.renderer.render(&meta, &state.branch)?
                }
            };
            let mut artifact = PipelineArtifact::new(content, confidence, previous.path.clone());
            artifact.generator_model = Some(llm.reasoning_model.clone());
            artifact
        }
        _ => {
            let base = engine.renderer.render(&meta, &state.branch)?;
            let (content, confidence) = if meta.custom_commands.is_empty() {
                (base, BASE_CONFIDENCE)
            } else {
                match enhance(engine, &meta, &base) {
                    Ok(enhanced) => (enhanced, ENHANCED_CONFIDENCE),
                    Err(e) => {
                        tracing::warn!(error = %e, "model enhancement failed, using template");
                        (base, ENHANCED_CONFIDENCE)
                    }
                }
            };
            let mut artifact =
                PipelineArtifact::new(content, confidence, engine.config.pipelines.path.clone());
            artifact.generator_model = Some(llm.reasoning_model.clone());
            artifact
        }
    };

    let mut artifact = artifact;
    artifact.attempt = attempt;
    tracing::info!(
        attempt,
        bytes = artifact.content.len(),
        confidence = artifact.confidence,
        "pipeline generated"
    );
    state.replace_artifact(artifact);
    Ok(NextAction::Step(StepName::Validate))
}

fn enhance(engine: &Engine, meta: &RepositoryMetadata, base: &str) -> Result<String> {
    let mut commands = String::new();
    for (name, command) in &meta.custom_commands {
        let _ = writeln!(commands, "- {name}: {command}");
    }
    let prompt = format!(
        "Repository: {}\nLanguage: {}\nProject scripts:\n{commands}\nWorkflow:\n```yaml\n{}\n```\n\nIntegrate the relevant scripts and return the full workflow.",
        meta.full_name,
        meta.language,
        base.trim_end()
    );
    let response = engine.model.generate(model_request(engine, prompt, ENHANCE_SYSTEM_PROMPT, 0.0))?;
    patch::extract_pipeline(&response)
}

fn repair(engine: &Engine, previous: &PipelineArtifact, errors: &[String]) -> Result<String> {
    let prompt = format!(
        "Validation errors:\n- {}\n\nWorkflow:\n```yaml\n{}\n```\n\nReturn the corrected workflow.",
        errors.join("\n- "),
        previous.content.trim_end()
    );
    let response = engine.model.generate(model_request(engine, prompt, REPAIR_SYSTEM_PROMPT, 0.0))?;
    patch::extract_pipeline(&response)
}

fn model_request(engine: &Engine, prompt: String, system: &str, temperature: f32) -> GenerateRequest {
    GenerateRequest::new(engine.config.llm.reasoning_model.as_str(), prompt)
        .system(system)
        .temperature(temperature)
        .timeout(Duration::from_secs(engine.config.llm.timeout_secs))
}

// ---------------------------------------------------------------------------
// validate / assess_risk
// ---------------------------------------------------------------------------

pub(super) fn validate(engine: &Engine, state: &mut RunState) -> Result<NextAction> {
    let artifact = state
        .artifact
        .as_ref()
        .ok_or(PipemendError::MissingState("pipeline artifact"))?;
    let outcome = engine.validator.validate(&artifact.content);
    let structural = outcome.has_structural_errors();
    tracing::info!(
        valid = outcome.is_valid,
        errors = outcome.errors.len(),
        security_findings = outcome.security_findings.len(),
        warnings = outcome.warnings.len(),
        "pipeline validated"
    );
    let errors = outcome.errors.clone();
    state.validation = Some(outcome);

    if !structural {
        return Ok(NextAction::Step(StepName::AssessRisk));
    }
    let max = engine.config.safety.max_regenerations;
    if state.generation_attempts <= max {
        tracing::warn!(attempt = state.generation_attempts, max, "invalid pipeline, regenerating");
        Ok(NextAction::Step(StepName::Generate))
    } else {
        state.add_error(format!(
            "pipeline still invalid after {} generation attempts: {}",
            state.generation_attempts,
            errors.join("; ")
        ));
        Ok(NextAction::Fail)
    }
}

pub(super) fn assess_risk(_engine: &Engine, state: &mut RunState) -> Result<NextAction> {
    let assessment = risk::assess(state).ok_or(PipemendError::MissingState("pipeline artifact"))?;
    tracing::info!(
        score = assessment.score,
        category = %assessment.category,
        requires_approval = assessment.requires_approval,
        "risk assessed"
    );
    state.risk = Some(assessment);
    Ok(NextAction::Step(StepName::Commit))
}

// ---------------------------------------------------------------------------
// commit / open_request
// ---------------------------------------------------------------------------

pub(super) fn commit(engine: &Engine, state: &mut RunState) -> Result<NextAction> {
    let artifact = state
        .artifact
        .as_ref()
        .ok_or(PipemendError::MissingState("pipeline artifact"))?;
    let language = state
        .metadata
        .as_ref()
        .map_or("generic", |m| m.language.as_str());
    let repo = Engine::repo(state);

    let branch = format!(
        "{}{}",
        engine.config.hosting.branch_prefix,
        Utc::now().format("%Y%m%d-%H%M%S")
    );
    engine.host.create_branch(&repo, &branch, &state.branch)?;

    let mut message = format!("ci: add {language} workflow");
    if let Some(risk) = &state.risk {
        let _ = write!(message, "\n\nRisk: {} ({:.2})", risk.category, risk.score);
    }
    let sha = engine.host.put_file(
        &repo,
        &FileCommit {
            path: artifact.path.clone(),
            content: artifact.content.clone(),
            message: message.clone(),
            branch: branch.clone(),
        },
    )?;
    tracing::info!(branch = %branch, sha = %sha, "pipeline committed");

    state.git = Some(GitOperation {
        branch,
        head_sha: Some(sha),
        commit_message: message,
        pr_number: None,
        pr_url: None,
    });
    Ok(NextAction::Step(StepName::OpenRequest))
}

pub(super) fn open_request(engine: &Engine, state: &mut RunState) -> Result<NextAction> {
    let head = state
        .git
        .as_ref()
        .map(|g| g.branch.clone())
        .ok_or(PipemendError::MissingState("work branch"))?;
    let language = state
        .metadata
        .as_ref()
        .map_or("project", |m| m.language.as_str());

    let body = match describe_with_model(engine, state) {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "model description failed, using template");
            describe(state)
        }
    };
    let draft = PullRequestDraft {
        title: format!("Add CI workflow for {language}"),
        body,
        head,
        base: state.branch.clone(),
    };
    let pr = engine.host.create_pull_request(&Engine::repo(state), &draft)?;
    if let Some(git) = state.git.as_mut() {
        git.pr_number = Some(pr.number);
        git.pr_url = Some(pr.html_url);
    }

    if state.options.enable_monitoring {
        Ok(NextAction::Step(StepName::ObserveExecution))
    } else {
        Ok(NextAction::Complete)
    }
}

fn describe_with_model(engine: &Engine, state: &RunState) -> Result<String> {
    let meta = state.metadata.as_ref();
    let prompt = format!(
        "Describe this CI workflow pull request.\n\nRepository: {}\nLanguage: {}\nPackage manager: {}\nHas tests: {}\nHas linter: {}\n\nWorkflow:\n```yaml\n{}\n```",
        state.full_name(),
        meta.map_or("unknown", |m| m.language.as_str()),
        meta.and_then(|m| m.package_manager.as_deref()).unwrap_or("unknown"),
        meta.is_some_and(|m| m.has_tests),
        meta.is_some_and(|m| m.has_linter),
        state.artifact.as_ref().map_or("", |a| a.content.trim_end()),
    );
    let request = GenerateRequest::new(engine.config.llm.lightweight_model.as_str(), prompt)
        .system(PR_SYSTEM_PROMPT)
        .temperature(0.3)
        .timeout(Duration::from_secs(engine.config.llm.timeout_secs));
    let body = engine.model.generate(request)?.trim().to_string();
    if body.is_empty() {
        return Err(PipemendError::InvalidPipeline(
            "empty pull request description".to_string(),
        ));
    }
    Ok(body)
}

/// Fallback pull request body.
pub(super) fn describe(state: &RunState) -> String {
    let meta = state.metadata.as_ref();
    let language = meta.map_or("unknown", |m| m.language.as_str());
    let mut out = String::new();
    let _ = writeln!(out, "## Automated CI workflow\n");
    let _ = writeln!(
        out,
        "This adds a GitHub Actions workflow for this {language} project.\n"
    );
    let _ = writeln!(out, "### Included\n");
    if meta.is_some_and(|m| m.has_linter) {
        let _ = writeln!(out, "- Lint checks");
    }
    if meta.is_some_and(|m| m.has_tests) {
        let _ = writeln!(out, "- Test execution on every push and pull request");
    }
    let _ = writeln!(out, "- Build verification");
    let _ = writeln!(out, "- Dependency caching\n");
    let _ = writeln!(out, "### Configuration\n");
    let _ = writeln!(out, "- Language: {language}");
    let _ = writeln!(
        out,
        "- Package manager: {}",
        meta.and_then(|m| m.package_manager.as_deref()).unwrap_or("n/a")
    );
    if let Some(a) = &state.artifact {
        let _ = writeln!(out, "- Confidence: {:.0}%", a.confidence * 100.0);
    }
    if let Some(v) = state.validation.as_ref().filter(|v| !v.warnings.is_empty()) {
        let _ = writeln!(out, "\n### Warnings\n");
        for w in &v.warnings {
            let _ = writeln!(out, "- {w}");
        }
    }
    if let Some(r) = &state.risk {
        let _ = writeln!(out, "\n### Risk\n");
        let _ = writeln!(out, "- Level: {}", r.category.as_str().to_uppercase());
        let _ = writeln!(out, "- Score: {:.2}", r.score);
        for reason in &r.reasons {
            let _ = writeln!(out, "- {reason}");
        }
    }
    out
}

// ---------------------------------------------------------------------------
// diagnose / heal / terminate
// ---------------------------------------------------------------------------

pub(super) fn diagnose(engine: &Engine, state: &mut RunState) -> Result<NextAction> {
    let run_id = state
        .execution
        .as_ref()
        .map(|e| e.run_id)
        .ok_or(PipemendError::MissingState("execution record"))?;
    let repo = Engine::repo(state);
    let jobs = engine.host.run_jobs(&repo, run_id)?;

    let mut found = Vec::new();
    for job in jobs.iter().filter(|j| j.failed()) {
        let log = match engine.host.job_logs(&repo, job.id) {
            Ok(log) => log.map(|l| log_tail(&l)).unwrap_or_default(),
            Err(e) => {
                tracing::warn!(job = %job.name, error = %e, "failed to fetch job logs");
                String::new()
            }
        };
        for step in job.failed_steps() {
            let conclusion = step.conclusion.map_or("unknown", |c| c.as_str());
            let message = format!("Step '{}' failed with conclusion: {conclusion}", step.name);
            let c = classify(&step.name, &format!("{message}\n{log}"));
            let mut record = FailureRecord::new(
                job.name.as_str(),
                step.name.as_str(),
                message,
                c.category,
                c.confidence,
                root_cause(&step.name, c.category),
                run_id,
            );
            record.log_excerpt = log.clone();
            record.job_id = Some(job.id);
            found.push(record);
        }
    }

    if found.is_empty() {
        found.push(FailureRecord::new(
            "unknown",
            "unknown",
            "Workflow failed but no specific error detected",
            FailureCategory::Unknown,
            UNKNOWN_CONFIDENCE,
            root_cause("unknown", FailureCategory::Unknown),
            run_id,
        ));
    }
    for f in &found {
        tracing::info!(
            job = %f.job,
            step = %f.step,
            category = %f.category,
            confidence = f.confidence,
            "failure classified"
        );
    }
    state.failures.extend(found);
    Ok(NextAction::Step(StepName::Heal))
}

pub(super) fn heal(engine: &Engine, state: &mut RunState) -> Result<NextAction> {
    engine.healer.heal(state)
}

pub(super) fn finish(_engine: &Engine, state: &mut RunState) -> Result<NextAction> {
    state.completed_at = Some(Utc::now());
    match state.next_action {
        NextAction::Complete => tracing::info!(run_id = %state.run_id, "run complete"),
        _ => tracing::warn!(
            run_id = %state.run_id,
            errors = state.errors.len(),
            escalated = state.escalation.is_some(),
            "run failed"
        ),
    }
    Ok(state.next_action)
}
