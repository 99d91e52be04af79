//! Repository language and tooling detection from the hosting file tree.

use crate::error::Result;
use crate::hosting::{RepoRef, RepositoryHost};
use crate::state::RepositoryMetadata;
use crate::types::Language;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

const DEFAULT_PYTHON_VERSION: &str = "3.11";
const DEFAULT_NODE_VERSION: &str = "20";
const DEFAULT_JAVA_VERSION: &str = "17";

const PYTHON_MARKERS: &[&str] = &[
    "requirements.txt",
    "setup.py",
    "pyproject.toml",
    "Pipfile",
    "poetry.lock",
];
const PYTHON_LINT_FILES: &[&str] = &[".ruff.toml", "ruff.toml", ".flake8", "pylintrc", ".pylintrc"];
const PYTHON_LINTERS: &[&str] = &["ruff", "flake8", "pylint", "black"];

/// Inspect `branch` of `repo` and describe its toolchain.
pub fn detect(host: &dyn RepositoryHost, repo: &RepoRef, branch: &str) -> Result<RepositoryMetadata> {
    let files = host.list_files(repo, branch)?;
    let tree = FileTree::new(&files);
    let read = |path: &str| -> Result<Option<String>> {
        if tree.has(path) {
            host.file_content(repo, path, branch)
        } else {
            Ok(None)
        }
    };

    let mut meta = RepositoryMetadata::generic(repo.to_string());

    if PYTHON_MARKERS.iter().any(|m| tree.has(m)) || tree.any_ext(".py") {
        detect_python(&mut meta, &tree, &read)?;
    } else if tree.has("package.json") {
        detect_node(&mut meta, &read)?;
    } else if tree.has("pom.xml") || tree.has("build.gradle") || tree.has("build.gradle.kts") || tree.any_ext(".java") {
        detect_java(&mut meta, &tree);
    } else if tree.has("go.mod") {
        meta.language = Language::Go;
        meta.language_version = Some(read("go.mod")?.as_deref().and_then(go_version).unwrap_or_else(|| "stable".to_string()));
        meta.package_manager = Some("go".to_string());
        meta.dependencies_file = Some("go.mod".to_string());
        meta.has_tests = tree.any_ext("_test.go");
        meta.test_framework = meta.has_tests.then(|| "go test".to_string());
    } else if tree.has("Cargo.toml") {
        meta.language = Language::Rust;
        meta.package_manager = Some("cargo".to_string());
        meta.build_tool = Some("cargo".to_string());
        meta.dependencies_file = Some("Cargo.toml".to_string());
        meta.has_tests = true;
        meta.test_framework = Some("cargo test".to_string());
        meta.has_linter = true;
    } else if tree.has("Gemfile") {
        meta.language = Language::Ruby;
        meta.package_manager = Some("bundler".to_string());
        meta.dependencies_file = Some("Gemfile".to_string());
        meta.has_tests = tree.any_prefix("spec/") || tree.any_prefix("test/");
        meta.test_framework = tree.any_prefix("spec/").then(|| "rspec".to_string());
    }

    tracing::info!(
        repo = %repo,
        language = %meta.language,
        package_manager = meta.package_manager.as_deref().unwrap_or("-"),
        "repository detected"
    );
    Ok(meta)
}

// ---------------------------------------------------------------------------
// Per-language heuristics
// ---------------------------------------------------------------------------

fn detect_python(
    meta: &mut RepositoryMetadata,
    tree: &FileTree,
    read: &dyn Fn(&str) -> Result<Option<String>>,
) -> Result<()> {
    meta.language = Language::Python;

    let pyproject = read("pyproject.toml")?;
    let version = match pyproject.as_deref().and_then(pyproject_python_version) {
        Some(v) => Some(v),
        None => read(".python-version")?.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()),
    };
    meta.language_version = Some(version.unwrap_or_else(|| DEFAULT_PYTHON_VERSION.to_string()));

    let (manager, deps) = if tree.has("poetry.lock") {
        ("poetry", "pyproject.toml")
    } else if tree.has("Pipfile") {
        ("pipenv", "Pipfile")
    } else if tree.has("requirements.txt") {
        ("pip", "requirements.txt")
    } else if tree.has("pyproject.toml") {
        ("pip", "pyproject.toml")
    } else {
        ("pip", "setup.py")
    };
    meta.package_manager = Some(manager.to_string());
    meta.dependencies_file = tree.has(deps).then(|| deps.to_string());

    meta.has_tests = tree.files.iter().any(|f| {
        f.contains("tests/") || f.contains("test/") || file_name(f).starts_with("test_") || f.ends_with("_test.py")
    });
    if meta.has_tests {
        let mentions_pytest = pyproject.as_deref().is_some_and(|p| p.contains("pytest"))
            || read("requirements.txt")?.is_some_and(|r| r.contains("pytest"));
        if mentions_pytest || tree.has("pytest.ini") || tree.has("conftest.py") {
            meta.test_framework = Some("pytest".to_string());
        } else {
            meta.test_framework = Some("unittest".to_string());
        }
    }

    meta.has_linter = PYTHON_LINT_FILES.iter().any(|f| tree.has(f))
        || pyproject
            .as_deref()
            .is_some_and(|p| PYTHON_LINTERS.iter().any(|l| p.contains(l)));
    Ok(())
}

fn detect_node(
    meta: &mut RepositoryMetadata,
    read: &dyn Fn(&str) -> Result<Option<String>>,
) -> Result<()> {
    meta.language = Language::Node;
    meta.dependencies_file = Some("package.json".to_string());

    let manager = if read("pnpm-lock.yaml")?.is_some() {
        "pnpm"
    } else if read("yarn.lock")?.is_some() {
        "yarn"
    } else {
        "npm"
    };
    meta.package_manager = Some(manager.to_string());

    let package: serde_json::Value = match read("package.json")? {
        Some(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "package.json is not valid JSON");
            serde_json::Value::Null
        }),
        None => serde_json::Value::Null,
    };
    let scripts: BTreeMap<String, String> = package
        .get("scripts")
        .and_then(|s| s.as_object())
        .map(|s| {
            s.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    meta.language_version = Some(
        package
            .pointer("/engines/node")
            .and_then(|v| v.as_str())
            .and_then(leading_major)
            .unwrap_or_else(|| DEFAULT_NODE_VERSION.to_string()),
    );
    meta.has_tests = scripts.contains_key("test");
    meta.has_linter = scripts.contains_key("lint");
    if let Some(test) = scripts.get("test") {
        meta.test_framework = ["jest", "vitest", "mocha"]
            .iter()
            .find(|f| test.contains(*f))
            .map(|f| f.to_string());
    }
    meta.custom_commands = scripts;
    Ok(())
}

fn detect_java(meta: &mut RepositoryMetadata, tree: &FileTree) {
    meta.language = Language::Java;
    meta.language_version = Some(DEFAULT_JAVA_VERSION.to_string());
    if tree.has("build.gradle") || tree.has("build.gradle.kts") {
        meta.build_tool = Some("gradle".to_string());
        meta.package_manager = Some("gradle".to_string());
        meta.dependencies_file = Some(
            if tree.has("build.gradle") { "build.gradle" } else { "build.gradle.kts" }.to_string(),
        );
    } else {
        meta.build_tool = Some("maven".to_string());
        meta.package_manager = Some("maven".to_string());
        meta.dependencies_file = tree.has("pom.xml").then(|| "pom.xml".to_string());
    }
    meta.has_tests = tree
        .files
        .iter()
        .any(|f| f.ends_with(".java") && f.to_lowercase().contains("test"));
    meta.test_framework = meta.has_tests.then(|| "junit".to_string());
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct FileTree<'a> {
    files: &'a [String],
}

impl<'a> FileTree<'a> {
    fn new(files: &'a [String]) -> Self {
        Self { files }
    }

    /// Exact match at the repository root.
    fn has(&self, path: &str) -> bool {
        self.files.iter().any(|f| f == path)
    }

    fn any_ext(&self, suffix: &str) -> bool {
        self.files.iter().any(|f| f.ends_with(suffix))
    }

    fn any_prefix(&self, prefix: &str) -> bool {
        self.files.iter().any(|f| f.starts_with(prefix))
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// `python = "^3.10"` in `[tool.poetry.dependencies]` → `3.10`.
fn pyproject_python_version(text: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r#"(?m)^\s*python\s*=\s*["'][^\d"']*(\d+\.\d+)"#).ok())
        .as_ref()?;
    re.captures(text).map(|c| c[1].to_string())
}

/// `go 1.22` directive in go.mod.
fn go_version(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix("go "))
        .map(|v| v.trim().to_string())
}

fn leading_major(range: &str) -> Option<String> {
    let digits: String = range
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    (!digits.is_empty()).then_some(digits)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
