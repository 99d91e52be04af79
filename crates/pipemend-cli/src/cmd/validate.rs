use crate::output::print_json;
use anyhow::Context;
use pipemend_core::config::Config;
use pipemend_core::risk::{self, RiskInputs};
use pipemend_core::validator::{PipelineValidator, RuleValidator};
use std::path::Path;

/// Clap parser for `--confidence`: a finite number in [0, 1].
pub fn parse_confidence(s: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("{s} is not between 0 and 1"));
    }
    Ok(value)
}

pub fn run(
    config_path: Option<&Path>,
    file: &Path,
    confidence: f64,
    json: bool,
) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("failed to load config")?;
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;

    let validator = RuleValidator::new(&config.safety, &config.pipelines)
        .context("invalid safety rules in config")?;
    let outcome = validator.validate(&content);
    let assessment = risk::evaluate(&RiskInputs {
        confidence,
        warnings: outcome.warnings.len(),
        lines: content.matches('\n').count(),
        security_findings: outcome.security_findings.len(),
    });

    if json {
        let value = serde_json::json!({
            "file": file.display().to_string(),
            "validation": outcome,
            "risk": assessment,
        });
        print_json(&value)?;
    } else {
        for e in &outcome.errors {
            println!("[error] {e}");
        }
        for s in &outcome.security_findings {
            println!("[security] {s}");
        }
        for w in &outcome.warnings {
            println!("[warning] {w}");
        }
        println!(
            "risk: {} ({:.2}){}",
            assessment.category,
            assessment.score,
            if assessment.requires_approval {
                ", approval required"
            } else {
                ""
            }
        );
        if outcome.is_valid {
            println!("{} is valid.", file.display());
        }
    }

    if !outcome.is_valid {
        anyhow::bail!("{} failed validation", file.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_must_be_a_finite_fraction() {
        assert_eq!(parse_confidence("0.75"), Ok(0.75));
        assert_eq!(parse_confidence("1"), Ok(1.0));
        assert!(parse_confidence("NaN").is_err());
        assert!(parse_confidence("inf").is_err());
        assert!(parse_confidence("1.2").is_err());
        assert!(parse_confidence("-0.1").is_err());
        assert!(parse_confidence("high").is_err());
    }
}
