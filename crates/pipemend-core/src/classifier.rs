//! Failure classifier: raw failure text to a typed category.
//!
//! An ordered table of case-insensitive patterns is run over
//! `"{step} {text}"`; the first category with a matching pattern wins at
//! confidence 0.8. Otherwise the step name alone is consulted for a keyword
//! (0.6), and anything else is `unknown` (0.3).

use crate::types::FailureCategory;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const PATTERN_CONFIDENCE: f64 = 0.8;
pub const KEYWORD_CONFIDENCE: f64 = 0.6;
pub const UNKNOWN_CONFIDENCE: f64 = 0.3;

// ---------------------------------------------------------------------------
// Pattern table
// ---------------------------------------------------------------------------

const PATTERNS: &[(FailureCategory, &[&str])] = &[
    (
        FailureCategory::DependencyError,
        &[
            r"could not find .*package",
            r"no matching distribution found",
            r"module .* has no attribute",
            r"cannot find module",
            r"error: package .* does not exist",
            r"failed to resolve",
            r"unresolved reference",
        ],
    ),
    (
        FailureCategory::BuildError,
        &[
            r"compilation failed",
            r"build failed",
            r"syntax error",
            r"cannot find symbol",
            r"undefined reference",
            r"gradlew: not found",
            r"permission denied.*gradlew",
            r"gradlew.*permission denied",
        ],
    ),
    (
        FailureCategory::TestFailure,
        &[
            r"test.*failed",
            r"assertion.*failed",
            r"\d+ failed.*\d+ passed",
            r"expected .* but got",
        ],
    ),
    (
        FailureCategory::WorkflowMisconfiguration,
        &[
            r"invalid workflow file",
            r"unknown action",
            r"required.*not found",
            r"unable to locate.*action",
        ],
    ),
    (
        FailureCategory::SecretError,
        &[
            r"credentials.*not found",
            r"authentication failed",
            r"unauthorized",
        ],
    ),
];

struct CompiledTable {
    sets: Vec<(FailureCategory, RegexSet)>,
}

fn table() -> &'static CompiledTable {
    static TABLE: OnceLock<CompiledTable> = OnceLock::new();
    TABLE.get_or_init(|| CompiledTable {
        sets: PATTERNS
            .iter()
            .filter_map(|(category, patterns)| {
                let anchored: Vec<String> = patterns.iter().map(|p| format!("(?i){p}")).collect();
                match RegexSet::new(&anchored) {
                    Ok(set) => Some((*category, set)),
                    Err(e) => {
                        tracing::error!(category = %category, error = %e, "invalid failure pattern");
                        None
                    }
                }
            })
            .collect(),
    })
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category: FailureCategory,
    pub confidence: f64,
}

pub fn classify(step_name: &str, error_text: &str) -> Classification {
    let combined = format!("{step_name} {error_text}");
    for (category, set) in &table().sets {
        if set.is_match(&combined) {
            return Classification {
                category: *category,
                confidence: PATTERN_CONFIDENCE,
            };
        }
    }

    let step = step_name.to_lowercase();
    let keyword = if step.contains("test") {
        Some(FailureCategory::TestFailure)
    } else if step.contains("build") || step.contains("compile") {
        Some(FailureCategory::BuildError)
    } else if step.contains("install") || step.contains("dependencies") {
        Some(FailureCategory::DependencyError)
    } else {
        None
    };

    match keyword {
        Some(category) => Classification {
            category,
            confidence: KEYWORD_CONFIDENCE,
        },
        None => Classification {
            category: FailureCategory::Unknown,
            confidence: UNKNOWN_CONFIDENCE,
        },
    }
}

/// Human-readable probable cause for a classified failure.
pub fn root_cause(step_name: &str, category: FailureCategory) -> &'static str {
    match category {
        FailureCategory::BuildError if step_name.to_lowercase().contains("gradlew") => {
            "Gradle wrapper may not be executable (missing chmod +x gradlew)"
        }
        FailureCategory::BuildError => "Build configuration or compilation issue",
        FailureCategory::DependencyError => "Missing or incompatible dependencies",
        FailureCategory::TestFailure => "Test assertions failed or test environment issue",
        FailureCategory::WorkflowMisconfiguration => "GitHub Actions workflow configuration error",
        FailureCategory::SecretError => "Missing or invalid credentials/secrets",
        FailureCategory::FlakyTest => "Intermittent test failure",
        FailureCategory::Transient => "Transient infrastructure failure",
        FailureCategory::Unknown => "Unknown cause - manual investigation required",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_patterns_compile() {
        let expected: usize = PATTERNS.len();
        assert_eq!(table().sets.len(), expected);
    }

    #[test]
    fn gradle_permission_is_build_error() {
        let c = classify("Run tests", "bash: ./gradlew: Permission denied");
        assert_eq!(c.category, FailureCategory::BuildError);
        assert_eq!(c.confidence, PATTERN_CONFIDENCE);
    }

    #[test]
    fn dependency_patterns_win_over_later_categories() {
        let c = classify("Run tests", "Error: Cannot find module 'lodash'");
        assert_eq!(c.category, FailureCategory::DependencyError);
        assert_eq!(c.confidence, 0.8);
    }

    #[test]
    fn pattern_matches_are_case_insensitive() {
        let c = classify("step", "AUTHENTICATION FAILED for user");
        assert_eq!(c.category, FailureCategory::SecretError);
        let c = classify("step", "Invalid workflow file: .github/workflows/ci.yml#L3");
        assert_eq!(c.category, FailureCategory::WorkflowMisconfiguration);
    }

    #[test]
    fn test_summary_pattern() {
        let c = classify("pytest", "=== 3 failed, 12 passed in 4.2s ===");
        assert_eq!(c.category, FailureCategory::TestFailure);
        assert_eq!(c.confidence, 0.8);
    }

    #[test]
    fn step_keyword_fallback() {
        let c = classify("Build package", "exit code 2");
        assert_eq!(c.category, FailureCategory::BuildError);
        assert_eq!(c.confidence, KEYWORD_CONFIDENCE);

        let c = classify("Install dependencies", "exit code 1");
        assert_eq!(c.category, FailureCategory::DependencyError);
        assert_eq!(c.confidence, 0.6);

        let c = classify("Compile sources", "exit code 1");
        assert_eq!(c.category, FailureCategory::BuildError);
    }

    #[test]
    fn unmatched_is_unknown() {
        let c = classify("Upload artifact", "exit code 137");
        assert_eq!(c.category, FailureCategory::Unknown);
        assert_eq!(c.confidence, UNKNOWN_CONFIDENCE);
    }

    #[test]
    fn confidences_are_exactly_one_of_three_values() {
        let samples = [
            ("Run tests", "1 failed, 2 passed"),
            ("Run tests", "exit code 1"),
            ("deploy", "exit code 1"),
            ("lint", "syntax error near line 4"),
        ];
        for (step, text) in samples {
            let c = classify(step, text);
            assert!([0.8, 0.6, 0.3].contains(&c.confidence), "{step}: {text}");
        }
    }

    #[test]
    fn root_cause_special_cases_gradle_wrapper_step() {
        assert_eq!(
            root_cause("./gradlew build", FailureCategory::BuildError),
            "Gradle wrapper may not be executable (missing chmod +x gradlew)"
        );
        assert_eq!(
            root_cause("Build", FailureCategory::BuildError),
            "Build configuration or compilation issue"
        );
        assert_eq!(
            root_cause("x", FailureCategory::Unknown),
            "Unknown cause - manual investigation required"
        );
    }
}
