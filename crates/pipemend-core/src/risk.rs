use crate::state::{PipelineArtifact, RiskAssessment, RunState, ValidationOutcome};
use crate::types::RiskCategory;

/// Confidence below which a human must always approve.
pub const APPROVAL_CONFIDENCE_FLOOR: f64 = 0.7;
/// Score at or above which a human must always approve.
pub const APPROVAL_SCORE_THRESHOLD: f64 = 0.5;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// The subset of a run the risk formula depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskInputs {
    pub confidence: f64,
    pub warnings: usize,
    pub lines: usize,
    pub security_findings: usize,
}

impl RiskInputs {
    pub fn from_parts(artifact: &PipelineArtifact, validation: Option<&ValidationOutcome>) -> Self {
        Self {
            confidence: artifact.confidence,
            warnings: validation.map_or(0, |v| v.warnings.len()),
            lines: artifact.line_count(),
            security_findings: validation.map_or(0, |v| v.security_findings.len()),
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

pub fn score(inputs: &RiskInputs) -> f64 {
    // NaN survives clamp; treat it as no confidence at all.
    let confidence = if inputs.confidence.is_nan() {
        0.0
    } else {
        inputs.confidence.clamp(0.0, 1.0)
    };
    let mut risk = (1.0 - confidence) * 0.4;
    risk += (inputs.warnings as f64 * 0.1).min(0.3);
    if inputs.lines > 200 {
        risk += 0.2;
    } else if inputs.lines > 100 {
        risk += 0.1;
    }
    if inputs.security_findings > 0 {
        risk += 0.5;
    }
    risk.clamp(0.0, 1.0)
}

pub fn evaluate(inputs: &RiskInputs) -> RiskAssessment {
    let score = score(inputs);
    let mut reasons = Vec::new();
    if inputs.security_findings > 0 {
        reasons.push(format!("{} security finding(s)", inputs.security_findings));
    }
    if score >= APPROVAL_SCORE_THRESHOLD {
        reasons.push(format!("risk score {score:.2} >= {APPROVAL_SCORE_THRESHOLD}"));
    }
    if inputs.confidence < APPROVAL_CONFIDENCE_FLOOR {
        reasons.push(format!(
            "generation confidence {:.2} < {APPROVAL_CONFIDENCE_FLOOR}",
            inputs.confidence
        ));
    }
    if reasons.is_empty() {
        reasons.push("autonomous commit is not enabled".to_string());
    }

    RiskAssessment {
        score,
        category: RiskCategory::from_score(score),
        // No autonomous commit path: approval is required in every case.
        requires_approval: true,
        reasons,
    }
}

/// Assess the run's current artifact. `None` when nothing was generated.
pub fn assess(state: &RunState) -> Option<RiskAssessment> {
    let artifact = state.artifact.as_ref()?;
    Some(evaluate(&RiskInputs::from_parts(
        artifact,
        state.validation.as_ref(),
    )))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
