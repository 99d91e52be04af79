//! Remediation strategy selection.
//!
//! A static ordered table of matcher/strategy pairs is scanned first; the
//! first matching rule wins. Two category overrides follow, and
//! [`Strategy::LlmAnalysis`] is the explicit default.

use crate::patch::has_wrapper_permission_step;
use crate::types::FailureCategory;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    WrapperPermission,
    TestRemediation,
    PythonDependency,
    NodeDependency,
    VersionAdjustment,
    LlmAnalysis,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::WrapperPermission => "wrapper_permission",
            Strategy::TestRemediation => "test_remediation",
            Strategy::PythonDependency => "python_dependency",
            Strategy::NodeDependency => "node_dependency",
            Strategy::VersionAdjustment => "version_adjustment",
            Strategy::LlmAnalysis => "llm_analysis",
        }
    }

    /// One-line description used in commit messages.
    pub fn describe(self) -> &'static str {
        match self {
            Strategy::WrapperPermission => "make the Gradle wrapper executable",
            Strategy::TestRemediation => "remediate failing test step",
            Strategy::PythonDependency => "repair Python dependency installation",
            Strategy::NodeDependency => "repair Node dependency installation",
            Strategy::VersionAdjustment => "pin a compatible Java version",
            Strategy::LlmAnalysis => "apply model-suggested workflow fix",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MatchContext / StrategyRule
// ---------------------------------------------------------------------------

pub struct MatchContext<'a> {
    /// Lowercased `"{step} {message} {log}"`.
    pub text: String,
    pub category: FailureCategory,
    pub artifact: &'a str,
}

impl<'a> MatchContext<'a> {
    pub fn new(
        step: &str,
        message: &str,
        log: &str,
        category: FailureCategory,
        artifact: &'a str,
    ) -> Self {
        Self {
            text: format!("{step} {message} {log}").to_lowercase(),
            category,
            artifact,
        }
    }

    fn contains_any(&self, needles: &[&str]) -> bool {
        needles.iter().any(|n| self.text.contains(n))
    }

    fn wrapper_patch_possible(&self) -> bool {
        !has_wrapper_permission_step(self.artifact)
    }
}

/// A fn-pointer matcher paired with the strategy it selects.
pub struct StrategyRule {
    pub strategy: Strategy,
    pub matches: fn(&MatchContext) -> bool,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyChoice {
    pub strategy: Strategy,
    pub confidence: f64,
}

pub static STRATEGY_RULES: &[StrategyRule] = &[
    StrategyRule {
        strategy: Strategy::WrapperPermission,
        matches: |ctx| {
            ctx.text.contains("gradlew")
                && ctx.contains_any(&["permission denied", "command not found", "not found"])
                && ctx.wrapper_patch_possible()
        },
        confidence: 0.95,
    },
    StrategyRule {
        strategy: Strategy::TestRemediation,
        matches: |ctx| {
            ctx.contains_any(&["test failed", "tests failed", "failures:", "assertion", "expected"])
        },
        confidence: 0.70,
    },
    StrategyRule {
        strategy: Strategy::PythonDependency,
        matches: |ctx| ctx.contains_any(&["no module named", "cannot import", "modulenotfounderror"]),
        confidence: 0.85,
    },
    StrategyRule {
        strategy: Strategy::NodeDependency,
        matches: |ctx| ctx.contains_any(&["cannot find module", "error: cannot find package"]),
        confidence: 0.85,
    },
    StrategyRule {
        strategy: Strategy::VersionAdjustment,
        matches: |ctx| ctx.contains_any(&["unsupported class version", "invalid target release"]),
        confidence: 0.90,
    },
];

pub fn select(ctx: &MatchContext) -> StrategyChoice {
    select_from(STRATEGY_RULES, ctx)
}

pub fn select_from(rules: &[StrategyRule], ctx: &MatchContext) -> StrategyChoice {
    if let Some(rule) = rules.iter().find(|r| (r.matches)(ctx)) {
        return StrategyChoice {
            strategy: rule.strategy,
            confidence: rule.confidence,
        };
    }

    match ctx.category {
        FailureCategory::BuildError
            if ctx.contains_any(&["gradlew", "gradle"]) && ctx.wrapper_patch_possible() =>
        {
            StrategyChoice {
                strategy: Strategy::WrapperPermission,
                confidence: 0.90,
            }
        }
        FailureCategory::TestFailure => StrategyChoice {
            strategy: Strategy::TestRemediation,
            confidence: 0.70,
        },
        _ => StrategyChoice {
            strategy: Strategy::LlmAnalysis,
            confidence: 0.60,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const GRADLE: &str = "jobs:\n  ci:\n    steps:\n      - name: Run tests\n        run: ./gradlew test\n";

    fn ctx<'a>(step: &str, message: &str, category: FailureCategory, artifact: &'a str) -> MatchContext<'a> {
        MatchContext::new(step, message, "", category, artifact)
    }

    #[test]
    fn gradle_permission_selects_wrapper_strategy() {
        let c = select(&ctx(
            "Run tests",
            "bash: ./gradlew: Permission denied",
            FailureCategory::BuildError,
            GRADLE,
        ));
        assert_eq!(c.strategy, Strategy::WrapperPermission);
        assert!(c.confidence >= 0.90 && c.confidence <= 0.95);
    }

    #[test]
    fn wrapper_rule_skipped_when_step_already_present() {
        let patched = "steps:\n  - name: Make gradlew executable\n    run: chmod +x gradlew\n";
        let c = select(&ctx(
            "Run tests",
            "bash: ./gradlew: Permission denied",
            FailureCategory::BuildError,
            patched,
        ));
        assert_eq!(c.strategy, Strategy::LlmAnalysis);
    }

    #[test]
    fn table_order_decides_ties() {
        // Mentions both an assertion and a missing Python module.
        let c = select(&ctx(
            "pytest",
            "AssertionError; ModuleNotFoundError: No module named 'x'",
            FailureCategory::DependencyError,
            "",
        ));
        assert_eq!(c.strategy, Strategy::TestRemediation);
    }

    #[test]
    fn dependency_and_version_rules() {
        let c = select(&ctx("Install", "ModuleNotFoundError: No module named 'requests'", FailureCategory::DependencyError, ""));
        assert_eq!(c, StrategyChoice { strategy: Strategy::PythonDependency, confidence: 0.85 });
        let c = select(&ctx("Install", "Error: Cannot find module 'left-pad'", FailureCategory::DependencyError, ""));
        assert_eq!(c.strategy, Strategy::NodeDependency);
        let c = select(&ctx("Build", "UnsupportedClassVersionError: unsupported class version 61.0", FailureCategory::BuildError, ""));
        assert_eq!(c, StrategyChoice { strategy: Strategy::VersionAdjustment, confidence: 0.90 });
    }

    #[test]
    fn build_error_mentioning_gradle_overrides_to_wrapper() {
        let c = select(&ctx("Build with Gradle", "exit code 1", FailureCategory::BuildError, GRADLE));
        assert_eq!(c, StrategyChoice { strategy: Strategy::WrapperPermission, confidence: 0.90 });
    }

    #[test]
    fn test_failure_category_overrides_to_test_remediation() {
        let c = select(&ctx("Run tests", "exit code 1", FailureCategory::TestFailure, ""));
        assert_eq!(c, StrategyChoice { strategy: Strategy::TestRemediation, confidence: 0.70 });
    }

    #[test]
    fn default_is_llm_analysis() {
        let c = select(&ctx("Deploy", "exit code 1", FailureCategory::Unknown, ""));
        assert_eq!(c, StrategyChoice { strategy: Strategy::LlmAnalysis, confidence: 0.60 });
    }

    #[test]
    fn custom_rule_table() {
        let rules = [StrategyRule {
            strategy: Strategy::VersionAdjustment,
            matches: |ctx| ctx.text.contains("deploy"),
            confidence: 0.5,
        }];
        let c = select_from(&rules, &ctx("Deploy", "x", FailureCategory::Unknown, ""));
        assert_eq!(c.strategy, Strategy::VersionAdjustment);
    }
}
