//! Typed view of a produced pipeline definition (GitHub Actions workflow).

use crate::error::{PipemendError, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub on: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Mapping>,
    pub jobs: BTreeMap<String, Job>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "runs-on")]
    pub runs_on: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Value>,
    #[serde(
        rename = "timeout-minutes",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Value>,
    pub steps: Vec<Step>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with: Option<Mapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Step {
    pub fn uses(name: &str, action: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            uses: Some(action.to_string()),
            ..Default::default()
        }
    }

    pub fn run(name: &str, command: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            run: Some(command.to_string()),
            ..Default::default()
        }
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.with
            .get_or_insert_with(Mapping::new)
            .insert(Value::from(key), Value::from(value));
        self
    }
}

impl PipelineDefinition {
    /// Parse text, rejecting definitions that fail [`structural_errors`].
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text)?;
        let errors = structural_errors(&value);
        if !errors.is_empty() {
            return Err(PipemendError::InvalidPipeline(errors.join("; ")));
        }
        Ok(serde_yaml::from_value(value)?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn has_trigger(&self) -> bool {
        match &self.on {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            Value::Sequence(s) => !s.is_empty(),
            Value::Mapping(m) => !m.is_empty(),
            _ => true,
        }
    }

    pub fn steps(&self) -> impl Iterator<Item = (&str, &Step)> {
        self.jobs
            .iter()
            .flat_map(|(name, job)| job.steps.iter().map(move |s| (name.as_str(), s)))
    }
}

// ---------------------------------------------------------------------------
// Structural checks
// ---------------------------------------------------------------------------

/// Missing or malformed required sections, one message per problem.
pub fn structural_errors(doc: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(root) = doc.as_mapping() else {
        errors.push("Workflow must be a YAML mapping".to_string());
        return errors;
    };

    match root.get("on") {
        None => errors.push("Workflow missing 'on' trigger configuration".to_string()),
        Some(Value::Null) => errors.push("Workflow 'on' trigger configuration is empty".to_string()),
        Some(Value::Mapping(m)) if m.is_empty() => {
            errors.push("Workflow 'on' trigger configuration is empty".to_string())
        }
        Some(Value::Sequence(s)) if s.is_empty() => {
            errors.push("Workflow 'on' trigger configuration is empty".to_string())
        }
        Some(Value::String(s)) if s.trim().is_empty() => {
            errors.push("Workflow 'on' trigger configuration is empty".to_string())
        }
        _ => {}
    }

    let jobs = match root.get("jobs") {
        None => {
            errors.push("Workflow missing 'jobs' configuration".to_string());
            return errors;
        }
        Some(Value::Mapping(jobs)) if !jobs.is_empty() => jobs,
        Some(_) => {
            errors.push("Workflow has no jobs defined".to_string());
            return errors;
        }
    };

    for (key, job) in jobs {
        let name = key.as_str().unwrap_or("?");
        let Some(job) = job.as_mapping() else {
            errors.push(format!("Job '{name}' has invalid configuration"));
            continue;
        };
        if !job.contains_key("runs-on") {
            errors.push(format!("Job '{name}' missing 'runs-on'"));
        }
        match job.get("steps") {
            None => errors.push(format!("Job '{name}' missing 'steps'")),
            Some(Value::Sequence(steps)) if !steps.is_empty() => {
                for (i, step) in steps.iter().enumerate() {
                    let has_body = step
                        .as_mapping()
                        .is_some_and(|s| s.contains_key("uses") || s.contains_key("run"));
                    if !has_body {
                        errors.push(format!(
                            "Job '{name}' step {} has neither 'uses' nor 'run'",
                            i + 1
                        ));
                    }
                }
            }
            Some(_) => errors.push(format!("Job '{name}' has no steps")),
        }
    }

    errors
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
