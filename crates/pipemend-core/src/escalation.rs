//! Failure summaries handed to a human once automated healing gives up.

use crate::state::RunState;
use crate::types::FailureCategory;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Failures listed in a summary.
pub const MAX_SUMMARY_FAILURES: usize = 3;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureBrief {
    pub job: String,
    pub step: String,
    pub category: FailureCategory,
    pub message: String,
    pub root_cause: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSummary {
    pub repository: String,
    pub attempts_used: u32,
    pub max_attempts: u32,
    pub failures: Vec<FailureBrief>,
    pub strategies_tried: Vec<String>,
    pub explanation: String,
    pub manual_fix: Vec<String>,
}

// ---------------------------------------------------------------------------
// Building
// ---------------------------------------------------------------------------

impl FailureSummary {
    pub fn from_state(state: &RunState, max_attempts: u32) -> Self {
        let mut latest = state.latest_failures();
        if latest.is_empty() {
            latest = state.failures.iter().collect();
        }
        let failures: Vec<FailureBrief> = latest
            .into_iter()
            .take(MAX_SUMMARY_FAILURES)
            .map(|f| FailureBrief {
                job: f.job.clone(),
                step: f.step.clone(),
                category: f.category,
                message: f.message.clone(),
                root_cause: f.root_cause.clone(),
            })
            .collect();

        let mut strategies_tried: Vec<String> = Vec::new();
        for attempt in &state.healing_attempts {
            let name = attempt.strategy.as_str().to_string();
            if !strategies_tried.contains(&name) {
                strategies_tried.push(name);
            }
        }

        let category = failures
            .first()
            .map(|f| f.category)
            .unwrap_or(FailureCategory::Unknown);

        Self {
            repository: state.full_name(),
            attempts_used: state.healing_count,
            max_attempts,
            failures,
            strategies_tried,
            explanation: explanation(category).to_string(),
            manual_fix: manual_fix(category),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Automated healing stopped for {}", self.repository);
        let _ = writeln!(
            out,
            "Attempts used: {}/{}",
            self.attempts_used, self.max_attempts
        );
        if !self.strategies_tried.is_empty() {
            let _ = writeln!(out, "Strategies tried: {}", self.strategies_tried.join(", "));
        }
        let _ = writeln!(out, "\nPersistent failures:");
        for f in &self.failures {
            let _ = writeln!(
                out,
                "  - [{}] {} / {}: {}",
                f.category, f.job, f.step, f.message
            );
            let _ = writeln!(out, "    probable cause: {}", f.root_cause);
        }
        let _ = writeln!(out, "\nWhy this needs a human: {}", self.explanation);
        let _ = writeln!(out, "\nManual fix checklist:");
        for item in &self.manual_fix {
            let _ = writeln!(out, "  [ ] {item}");
        }
        out
    }
}

pub fn explanation(category: FailureCategory) -> &'static str {
    match category {
        FailureCategory::TestFailure | FailureCategory::FlakyTest => {
            "The tests themselves fail; the fix is most likely in application code, not the pipeline."
        }
        FailureCategory::DependencyError => {
            "Dependency resolution keeps failing; a manifest or lockfile change is likely required."
        }
        FailureCategory::BuildError => {
            "The project does not compile in CI; source or build-script changes are outside what the pipeline can fix."
        }
        FailureCategory::WorkflowMisconfiguration => {
            "The workflow references actions or inputs that could not be resolved after repeated edits."
        }
        FailureCategory::SecretError => {
            "Credentials are missing or rejected; secrets can only be provisioned by a repository admin."
        }
        FailureCategory::Transient => {
            "The failure looks infrastructure-related and did not clear on re-run."
        }
        FailureCategory::Unknown => {
            "The failure could not be classified with enough confidence to patch safely."
        }
    }
}

pub fn manual_fix(category: FailureCategory) -> Vec<String> {
    let items: &[&str] = match category {
        FailureCategory::TestFailure | FailureCategory::FlakyTest => &[
            "Run the failing tests locally and read the assertion output",
            "Check for environment differences (timezone, locale, services) between CI and local",
            "Fix the code or the test, then push to the work branch",
        ],
        FailureCategory::DependencyError => &[
            "Verify every dependency is declared in the manifest",
            "Regenerate the lockfile and commit it",
            "Confirm the runtime version in the workflow matches the project",
        ],
        FailureCategory::BuildError => &[
            "Reproduce the build locally with the same toolchain version",
            "Check that build scripts (e.g. gradlew) are committed and executable",
            "Fix compilation errors and push to the work branch",
        ],
        FailureCategory::WorkflowMisconfiguration => &[
            "Validate the workflow file with the Actions workflow editor",
            "Pin every `uses:` reference to an existing tag",
            "Check required inputs for each action",
        ],
        FailureCategory::SecretError => &[
            "Add the missing secrets under Settings > Secrets and variables > Actions",
            "Confirm the token scopes cover the failing step",
        ],
        FailureCategory::Transient | FailureCategory::Unknown => &[
            "Open the run logs and locate the first error",
            "Re-run the job once to rule out infrastructure noise",
            "Adjust the workflow by hand and push to the work branch",
        ],
    };
    items.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
