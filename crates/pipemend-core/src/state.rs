//! The run record threaded through every node of the graph.
//!
//! A `RunState` is created once per invocation with only repository
//! coordinates and options set. Nodes set or append fields; nothing is
//! removed. It is serialized for `--json` output and dropped at exit.

use crate::escalation::FailureSummary;
use crate::strategy::Strategy;
use crate::types::{
    AttemptOutcome, ExecutionMode, FailureCategory, Language, NextAction, RiskCategory,
    RunConclusion, RunStatus, StepName,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Commit to the work branch only; never open a pull request.
    #[serde(default)]
    pub skip_pull_request: bool,
    /// Diagnose failures but never patch them.
    #[serde(default)]
    pub skip_healing: bool,
    /// Watch the remote run after the pull request is opened.
    #[serde(default)]
    pub enable_monitoring: bool,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRecord {
    pub component: StepName,
    pub action: NextAction,
    pub outcome: String,
    pub duration_ms: u64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub full_name: String,
    pub language: Language,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies_file: Option<String>,
    #[serde(default)]
    pub has_tests: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_framework: Option<String>,
    #[serde(default)]
    pub has_linter: bool,
    /// Scripts declared by the project manifest (e.g. `package.json`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_commands: BTreeMap<String, String>,
}

impl RepositoryMetadata {
    pub fn generic(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            language: Language::Generic,
            language_version: None,
            package_manager: None,
            build_tool: None,
            dependencies_file: None,
            has_tests: false,
            test_framework: None,
            has_linter: false,
            custom_commands: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineArtifact {
    pub content: String,
    pub confidence: f64,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator_model: Option<String>,
    /// 1 for the first generation, incremented on each regeneration.
    pub attempt: u32,
    pub generated_at: DateTime<Utc>,
}

impl PipelineArtifact {
    pub fn new(content: impl Into<String>, confidence: f64, path: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            confidence: confidence.clamp(0.0, 1.0),
            path: path.into(),
            generator_model: None,
            attempt: 1,
            generated_at: Utc::now(),
        }
    }

    /// Newline characters in the definition.
    pub fn line_count(&self) -> usize {
        self.content.matches('\n').count()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub security_findings: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    pub fn has_structural_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_security_findings(&self) -> bool {
        !self.security_findings.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub category: RiskCategory,
    pub requires_approval: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitOperation {
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_sha: Option<String>,
    pub commit_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub run_id: u64,
    pub run_number: u64,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conclusion: Option<RunConclusion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
    pub head_sha: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub job: String,
    pub step: String,
    pub message: String,
    #[serde(default)]
    pub log_excerpt: String,
    pub category: FailureCategory,
    pub confidence: f64,
    pub root_cause: String,
    /// Remote run this failure was observed in.
    pub run_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<u64>,
}

impl FailureRecord {
    pub fn new(
        job: impl Into<String>,
        step: impl Into<String>,
        message: impl Into<String>,
        category: FailureCategory,
        confidence: f64,
        root_cause: impl Into<String>,
        run_id: u64,
    ) -> Self {
        Self {
            job: job.into(),
            step: step.into(),
            message: message.into(),
            log_excerpt: String::new(),
            category,
            confidence: confidence.clamp(0.0, 1.0),
            root_cause: root_cause.into(),
            run_id,
            job_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingAttempt {
    pub sequence: u32,
    pub strategy: Strategy,
    pub patch: String,
    pub confidence: f64,
    /// Set only after the remote commit is acknowledged.
    pub applied: bool,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escalation {
    pub reason: String,
    #[serde(default)]
    pub manual_fix: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<FailureSummary>,
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub owner: String,
    pub name: String,
    pub branch: String,
    pub options: RunOptions,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub triggers: Vec<TriggerRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RepositoryMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PipelineArtifact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifact_history: Vec<PipelineArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskAssessment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionRecord>,
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
    #[serde(default)]
    pub healing_attempts: Vec<HealingAttempt>,
    #[serde(default)]
    pub healing_count: u32,
    #[serde(default)]
    pub generation_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<Escalation>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub next_action: NextAction,
}

impl RunState {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        branch: impl Into<String>,
        options: RunOptions,
    ) -> Self {
        Self {
            run_id: format!("run-{}", uuid::Uuid::new_v4()),
            owner: owner.into(),
            name: name.into(),
            branch: branch.into(),
            options,
            started_at: Utc::now(),
            completed_at: None,
            triggers: Vec::new(),
            metadata: None,
            artifact: None,
            artifact_history: Vec::new(),
            validation: None,
            risk: None,
            git: None,
            execution: None,
            failures: Vec::new(),
            healing_attempts: Vec::new(),
            healing_count: 0,
            generation_attempts: 0,
            escalation: None,
            errors: Vec::new(),
            next_action: NextAction::Step(StepName::Detect),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Append an error prefixed with an RFC 3339 timestamp.
    pub fn add_error(&mut self, message: impl AsRef<str>) {
        self.errors
            .push(format!("[{}] {}", Utc::now().to_rfc3339(), message.as_ref()));
    }

    pub fn record_trigger(
        &mut self,
        component: StepName,
        action: NextAction,
        outcome: impl Into<String>,
        duration_ms: u64,
    ) {
        self.triggers.push(TriggerRecord {
            component,
            action,
            outcome: outcome.into(),
            duration_ms,
            at: Utc::now(),
        });
    }

    /// Install a new artifact, keeping the previous one in the history.
    pub fn replace_artifact(&mut self, artifact: PipelineArtifact) {
        if let Some(previous) = self.artifact.replace(artifact) {
            self.artifact_history.push(previous);
        }
    }

    /// Failures recorded for the currently observed remote run.
    pub fn latest_failures(&self) -> Vec<&FailureRecord> {
        let Some(run_id) = self.execution.as_ref().map(|e| e.run_id) else {
            return Vec::new();
        };
        self.failures.iter().filter(|f| f.run_id == run_id).collect()
    }

    pub fn last_applied_attempt_mut(&mut self) -> Option<&mut HealingAttempt> {
        self.healing_attempts.iter_mut().rev().find(|a| a.applied)
    }

    pub fn escalate(&mut self, reason: impl Into<String>, manual_fix: Vec<String>) {
        self.escalation = Some(Escalation {
            reason: reason.into(),
            manual_fix,
            summary: None,
        });
    }

    pub fn succeeded(&self) -> bool {
        self.next_action == NextAction::Complete
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RunState {
        RunState::new("octo", "demo", "main", RunOptions::default())
    }

    #[test]
    fn new_state_starts_at_detect() {
        let s = state();
        assert!(s.run_id.starts_with("run-"));
        assert_eq!(s.next_action, NextAction::Step(StepName::Detect));
        assert_eq!(s.full_name(), "octo/demo");
        assert!(s.triggers.is_empty());
    }

    #[test]
    fn errors_are_timestamped() {
        let mut s = state();
        s.add_error("boom");
        assert_eq!(s.errors.len(), 1);
        assert!(s.errors[0].starts_with('['));
        assert!(s.errors[0].ends_with("] boom"));
    }

    #[test]
    fn replacing_artifact_keeps_history() {
        let mut s = state();
        s.replace_artifact(PipelineArtifact::new("a\n", 0.9, "ci.yml"));
        s.replace_artifact(PipelineArtifact::new("b\n", 0.75, "ci.yml"));
        assert_eq!(s.artifact.as_ref().unwrap().content, "b\n");
        assert_eq!(s.artifact_history.len(), 1);
        assert_eq!(s.artifact_history[0].content, "a\n");
    }

    #[test]
    fn failure_confidence_is_clamped() {
        let f = FailureRecord::new("ci", "test", "x", FailureCategory::Unknown, 1.7, "?", 1);
        assert_eq!(f.confidence, 1.0);
    }

    #[test]
    fn latest_failures_filter_by_run() {
        let mut s = state();
        s.failures.push(FailureRecord::new("ci", "a", "x", FailureCategory::Unknown, 0.3, "?", 1));
        s.failures.push(FailureRecord::new("ci", "b", "y", FailureCategory::Unknown, 0.3, "?", 2));
        assert!(s.latest_failures().is_empty());
        s.execution = Some(ExecutionRecord {
            run_id: 2,
            run_number: 7,
            status: RunStatus::Completed,
            conclusion: Some(RunConclusion::Failure),
            html_url: None,
            head_sha: "abc".into(),
            observed_at: Utc::now(),
        });
        let latest = s.latest_failures();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].step, "b");
    }

    #[test]
    fn line_count_counts_newlines() {
        let a = PipelineArtifact::new("a\nb\nc", 0.5, "ci.yml");
        assert_eq!(a.line_count(), 2);
    }

    #[test]
    fn state_serializes_next_action_as_string() {
        let s = state();
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["next_action"], "detect");
        assert_eq!(json["options"]["mode"], "full");
    }
}
