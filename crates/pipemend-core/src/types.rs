use crate::error::PipemendError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    Node,
    Java,
    Go,
    Rust,
    Ruby,
    Generic,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Node => "node",
            Language::Java => "java",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Ruby => "ruby",
            Language::Generic => "generic",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = PipemendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "node" | "javascript" | "typescript" => Ok(Language::Node),
            "java" => Ok(Language::Java),
            "go" => Ok(Language::Go),
            "rust" => Ok(Language::Rust),
            "ruby" => Ok(Language::Ruby),
            "generic" => Ok(Language::Generic),
            _ => Err(PipemendError::Config(format!("unknown language '{s}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// FailureCategory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Transient,
    FlakyTest,
    TestFailure,
    DependencyError,
    BuildError,
    WorkflowMisconfiguration,
    SecretError,
    Unknown,
}

impl FailureCategory {
    pub fn all() -> &'static [FailureCategory] {
        &[
            FailureCategory::Transient,
            FailureCategory::FlakyTest,
            FailureCategory::TestFailure,
            FailureCategory::DependencyError,
            FailureCategory::BuildError,
            FailureCategory::WorkflowMisconfiguration,
            FailureCategory::SecretError,
            FailureCategory::Unknown,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureCategory::Transient => "transient",
            FailureCategory::FlakyTest => "flaky_test",
            FailureCategory::TestFailure => "test_failure",
            FailureCategory::DependencyError => "dependency_error",
            FailureCategory::BuildError => "build_error",
            FailureCategory::WorkflowMisconfiguration => "workflow_misconfiguration",
            FailureCategory::SecretError => "secret_error",
            FailureCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FailureCategory {
    type Err = PipemendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FailureCategory::all()
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| PipemendError::Config(format!("unknown failure category '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// RiskCategory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskCategory {
    /// Bucket a score: ≥0.7 critical, ≥0.5 high, ≥0.3 medium, else low.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            RiskCategory::Critical
        } else if score >= 0.5 {
            RiskCategory::High
        } else if score >= 0.3 {
            RiskCategory::Medium
        } else {
            RiskCategory::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskCategory::Low => "low",
            RiskCategory::Medium => "medium",
            RiskCategory::High => "high",
            RiskCategory::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StepName / NextAction
// ---------------------------------------------------------------------------

/// The closed set of graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    Detect,
    Generate,
    Validate,
    AssessRisk,
    Commit,
    OpenRequest,
    ObserveExecution,
    DiagnoseFailure,
    Heal,
    Terminate,
}

impl StepName {
    pub fn all() -> &'static [StepName] {
        &[
            StepName::Detect,
            StepName::Generate,
            StepName::Validate,
            StepName::AssessRisk,
            StepName::Commit,
            StepName::OpenRequest,
            StepName::ObserveExecution,
            StepName::DiagnoseFailure,
            StepName::Heal,
            StepName::Terminate,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepName::Detect => "detect",
            StepName::Generate => "generate",
            StepName::Validate => "validate",
            StepName::AssessRisk => "assess_risk",
            StepName::Commit => "commit",
            StepName::OpenRequest => "open_request",
            StepName::ObserveExecution => "observe_execution",
            StepName::DiagnoseFailure => "diagnose_failure",
            StepName::Heal => "heal",
            StepName::Terminate => "terminate",
        }
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepName {
    type Err = PipemendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepName::all()
            .iter()
            .copied()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| PipemendError::Routing(format!("unknown step '{s}'")))
    }
}

/// What a node asks the engine to do next.
///
/// Serialized as a bare string: a step name, `complete` or `fail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NextAction {
    Step(StepName),
    Complete,
    Fail,
}

impl NextAction {
    pub fn as_str(self) -> &'static str {
        match self {
            NextAction::Step(step) => step.as_str(),
            NextAction::Complete => "complete",
            NextAction::Fail => "fail",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NextAction::Complete | NextAction::Fail)
    }
}

impl fmt::Display for NextAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NextAction {
    type Err = PipemendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete" => Ok(NextAction::Complete),
            "fail" => Ok(NextAction::Fail),
            other => other.parse().map(NextAction::Step),
        }
    }
}

impl Serialize for NextAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NextAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// ExecutionMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    DetectOnly,
    GenerateOnly,
    #[default]
    Full,
}

impl ExecutionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionMode::DetectOnly => "detect-only",
            ExecutionMode::GenerateOnly => "generate-only",
            ExecutionMode::Full => "full",
        }
    }

    /// The last node that runs in this mode; `None` for the full graph.
    pub fn stop_after(self) -> Option<StepName> {
        match self {
            ExecutionMode::DetectOnly => Some(StepName::Detect),
            ExecutionMode::GenerateOnly => Some(StepName::AssessRisk),
            ExecutionMode::Full => None,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = PipemendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detect-only" => Ok(ExecutionMode::DetectOnly),
            "generate-only" => Ok(ExecutionMode::GenerateOnly),
            "full" => Ok(ExecutionMode::Full),
            _ => Err(PipemendError::Config(format!(
                "unknown mode '{s}': must be detect-only, generate-only, or full"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote run status / conclusion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Waiting,
    Requested,
    Pending,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Waiting => "waiting",
            RunStatus::Requested => "requested",
            RunStatus::Pending => "pending",
            RunStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunConclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    Neutral,
    TimedOut,
    ActionRequired,
    StartupFailure,
    #[serde(other)]
    Unknown,
}

impl RunConclusion {
    pub fn as_str(self) -> &'static str {
        match self {
            RunConclusion::Success => "success",
            RunConclusion::Failure => "failure",
            RunConclusion::Cancelled => "cancelled",
            RunConclusion::Skipped => "skipped",
            RunConclusion::Neutral => "neutral",
            RunConclusion::TimedOut => "timed_out",
            RunConclusion::ActionRequired => "action_required",
            RunConclusion::StartupFailure => "startup_failure",
            RunConclusion::Unknown => "unknown",
        }
    }

    /// Conclusions that should be diagnosed and healed.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            RunConclusion::Failure | RunConclusion::TimedOut | RunConclusion::StartupFailure
        )
    }
}

impl fmt::Display for RunConclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AttemptOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Pending,
    Committed,
    CommitFailed,
    Resolved,
    StillFailing,
}

impl AttemptOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptOutcome::Pending => "pending",
            AttemptOutcome::Committed => "committed",
            AttemptOutcome::CommitFailed => "commit_failed",
            AttemptOutcome::Resolved => "resolved",
            AttemptOutcome::StillFailing => "still_failing",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_action_roundtrips_as_bare_string() {
        for step in StepName::all() {
            let action = NextAction::Step(*step);
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", step.as_str()));
            let back: NextAction = serde_json::from_str(&json).unwrap();
            assert_eq!(back, action);
        }
        let fail: NextAction = serde_json::from_str("\"fail\"").unwrap();
        assert_eq!(fail, NextAction::Fail);
        assert!(fail.is_terminal());
    }

    #[test]
    fn next_action_rejects_unknown_names() {
        assert!("regenerate".parse::<NextAction>().is_err());
        assert!(serde_json::from_str::<NextAction>("\"pr_create\"").is_err());
    }

    #[test]
    fn risk_category_thresholds() {
        assert_eq!(RiskCategory::from_score(0.0), RiskCategory::Low);
        assert_eq!(RiskCategory::from_score(0.29), RiskCategory::Low);
        assert_eq!(RiskCategory::from_score(0.3), RiskCategory::Medium);
        assert_eq!(RiskCategory::from_score(0.5), RiskCategory::High);
        assert_eq!(RiskCategory::from_score(0.7), RiskCategory::Critical);
        assert_eq!(RiskCategory::from_score(1.0), RiskCategory::Critical);
    }

    #[test]
    fn unknown_remote_status_deserializes() {
        let status: RunStatus = serde_json::from_str("\"something_new\"").unwrap();
        assert_eq!(status, RunStatus::Unknown);
        let conclusion: RunConclusion = serde_json::from_str("\"timed_out\"").unwrap();
        assert!(conclusion.is_failure());
    }

    #[test]
    fn language_aliases() {
        assert_eq!("TypeScript".parse::<Language>().unwrap(), Language::Node);
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn mode_stop_points() {
        assert_eq!(ExecutionMode::DetectOnly.stop_after(), Some(StepName::Detect));
        assert_eq!(ExecutionMode::GenerateOnly.stop_after(), Some(StepName::AssessRisk));
        assert_eq!(ExecutionMode::Full.stop_after(), None);
    }
}
