use crate::error::{PipemendError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "PIPEMEND_CONFIG";
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// LlmConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub base_url: String,
    /// Model used for generation and patch synthesis.
    #[serde(default = "default_reasoning_model")]
    pub reasoning_model: String,
    /// Model used for pull request descriptions.
    #[serde(default = "default_lightweight_model")]
    pub lightweight_model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_reasoning_model() -> String {
    "llama3:70b".to_string()
}

fn default_lightweight_model() -> String {
    "llama3:13b".to_string()
}

fn default_llm_timeout() -> u64 {
    300
}

fn default_llm_retries() -> u32 {
    3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_url(),
            reasoning_model: default_reasoning_model(),
            lightweight_model: default_lightweight_model(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
        }
    }
}

// ---------------------------------------------------------------------------
// HostingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostingConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    /// Prefix for the work branch; a timestamp is appended.
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_branch_prefix() -> String {
    "agent/ci-".to_string()
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: None,
            branch_prefix: default_branch_prefix(),
        }
    }
}

// ---------------------------------------------------------------------------
// SafetyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_max_healing")]
    pub max_healing_attempts: u32,
    #[serde(default = "default_max_regenerations")]
    pub max_regenerations: u32,
    /// `uses:` references that may not appear; `*` matches anything.
    #[serde(default = "default_forbidden_actions")]
    pub forbidden_actions: Vec<String>,
    /// Literal command fragments that may not appear.
    #[serde(default = "default_forbidden_commands")]
    pub forbidden_commands: Vec<String>,
}

fn default_max_healing() -> u32 {
    3
}

fn default_max_regenerations() -> u32 {
    2
}

fn default_forbidden_actions() -> Vec<String> {
    vec!["*/self-hosted-runner*".to_string()]
}

fn default_forbidden_commands() -> Vec<String> {
    vec![
        "rm -rf /".to_string(),
        "git push --force".to_string(),
        "chmod 777".to_string(),
    ]
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_healing_attempts: default_max_healing(),
            max_regenerations: default_max_regenerations(),
            forbidden_actions: default_forbidden_actions(),
            forbidden_commands: default_forbidden_commands(),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelinesConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelinesConfig {
    #[serde(default = "default_pipeline_path")]
    pub path: String,
    /// Upper bound on the definition size in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,
    #[serde(default = "default_max_matrix")]
    pub max_matrix_combinations: usize,
}

fn default_pipeline_path() -> String {
    ".github/workflows/ci.yml".to_string()
}

fn default_max_file_size() -> usize {
    10_240
}

fn default_max_matrix() -> usize {
    10
}

impl Default for PipelinesConfig {
    fn default() -> Self {
        Self {
            path: default_pipeline_path(),
            max_file_size: default_max_file_size(),
            max_matrix_combinations: default_max_matrix(),
        }
    }
}

// ---------------------------------------------------------------------------
// MonitorConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Polls spent waiting for a run to appear.
    #[serde(default = "default_start_attempts")]
    pub start_attempts: u32,
    /// Polls spent waiting for the run to complete.
    #[serde(default = "default_completion_attempts")]
    pub completion_attempts: u32,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_start_attempts() -> u32 {
    30
}

fn default_completion_attempts() -> u32 {
    60
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            start_attempts: default_start_attempts(),
            completion_attempts: default_completion_attempts(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub hosting: HostingConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub pipelines: PipelinesConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Config {
    /// Locate the config file: `explicit`, then `$PIPEMEND_CONFIG`, then
    /// `./pipemend.yaml`, then `~/.config/pipemend/config.yaml`.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(p) = explicit {
            return Some(p.to_path_buf());
        }
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            if !p.trim().is_empty() {
                return Some(PathBuf::from(p));
            }
        }
        let local = PathBuf::from("pipemend.yaml");
        if local.exists() {
            return Some(local);
        }
        home::home_dir()
            .map(|h| h.join(".config").join("pipemend").join("config.yaml"))
            .filter(|p| p.exists())
    }

    /// Load from the located file, or defaults when there is none.
    ///
    /// An explicitly named file (argument or env var) must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let named = explicit.is_some() || std::env::var_os(CONFIG_ENV).is_some();
        let mut cfg = match Self::locate(explicit) {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "loading config");
                let data = std::fs::read_to_string(&path)?;
                Self::from_yaml_str(&data)?
            }
            Some(path) if named => {
                return Err(PipemendError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            _ => Config::default(),
        };
        cfg.apply_token_fallback();
        Ok(cfg)
    }

    /// Parse YAML, substituting `${VAR}` string values from the environment.
    pub fn from_yaml_str(data: &str) -> Result<Self> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(data)?;
        if value.is_null() {
            return Ok(Config::default());
        }
        substitute_env(&mut value);
        let mut cfg: Config = serde_yaml::from_value(value)?;
        cfg.apply_token_fallback();
        Ok(cfg)
    }

    fn apply_token_fallback(&mut self) {
        let unresolved = match self.hosting.token.as_deref() {
            None => true,
            Some(t) => t.trim().is_empty() || is_placeholder(t),
        };
        if unresolved {
            self.hosting.token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty());
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message })
        };

        if self.hosting.token.is_none() {
            push(
                WarnLevel::Warning,
                format!("hosting.token is not set and {TOKEN_ENV} is empty; `run` will fail"),
            );
        }
        for (key, url) in [("llm.base_url", &self.llm.base_url), ("hosting.api_url", &self.hosting.api_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                push(WarnLevel::Error, format!("{key} '{url}' is not an http(s) URL"));
            }
        }
        if self.safety.max_healing_attempts == 0 {
            push(
                WarnLevel::Warning,
                "safety.max_healing_attempts is 0; failures will escalate immediately".to_string(),
            );
        } else if self.safety.max_healing_attempts > 10 {
            push(
                WarnLevel::Warning,
                format!(
                    "safety.max_healing_attempts={} (>10 is unusual)",
                    self.safety.max_healing_attempts
                ),
            );
        }
        if self.safety.max_regenerations > 5 {
            push(
                WarnLevel::Warning,
                format!(
                    "safety.max_regenerations={} (>5 is unusual)",
                    self.safety.max_regenerations
                ),
            );
        }
        let path = &self.pipelines.path;
        if !path.starts_with(".github/workflows/")
            || !(path.ends_with(".yml") || path.ends_with(".yaml"))
        {
            push(
                WarnLevel::Error,
                format!("pipelines.path '{path}' must be a .yml file under .github/workflows/"),
            );
        }
        if self.monitor.poll_interval_secs == 0 {
            push(WarnLevel::Error, "monitor.poll_interval_secs must be > 0".to_string());
        }
        if self.monitor.start_attempts == 0 || self.monitor.completion_attempts == 0 {
            push(
                WarnLevel::Error,
                "monitor.start_attempts and monitor.completion_attempts must be > 0".to_string(),
            );
        }

        warnings
    }
}

fn is_placeholder(s: &str) -> bool {
    s.starts_with("${") && s.ends_with('}')
}

/// Replace every `${VAR}` string with the value of `VAR` when it is set.
fn substitute_env(value: &mut serde_yaml::Value) {
    match value {
        serde_yaml::Value::String(s) if is_placeholder(s) => {
            if let Ok(v) = std::env::var(&s[2..s.len() - 1]) {
                *s = v;
            }
        }
        serde_yaml::Value::Sequence(items) => items.iter_mut().for_each(substitute_env),
        serde_yaml::Value::Mapping(map) => map.iter_mut().for_each(|(_, v)| substitute_env(v)),
        serde_yaml::Value::Tagged(tagged) => substitute_env(&mut tagged.value),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
