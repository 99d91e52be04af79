//! Per-language step templates for the generated pipeline.

use crate::error::Result;
use crate::pipeline::{Job, PipelineDefinition, Step};
use crate::state::RepositoryMetadata;
use crate::types::Language;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

pub const JOB_NAME: &str = "ci";
pub const JOB_TIMEOUT_MINUTES: u32 = 30;

pub trait PipelineRenderer: Send + Sync {
    /// Produce pipeline text for a repository whose default branch is `branch`.
    fn render(&self, meta: &RepositoryMetadata, branch: &str) -> Result<String>;
}

/// Renders from the built-in templates below.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateRenderer;

impl PipelineRenderer for TemplateRenderer {
    fn render(&self, meta: &RepositoryMetadata, branch: &str) -> Result<String> {
        build_definition(meta, branch).to_yaml()
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// The pieces a language contributes; assembled in a fixed order.
#[derive(Default)]
struct Template {
    matrix: Option<(&'static str, Vec<String>)>,
    setup: Vec<Step>,
    cache: Option<Step>,
    lint: Option<Step>,
    test: Option<Step>,
    build: Option<Step>,
}

pub fn build_definition(meta: &RepositoryMetadata, branch: &str) -> PipelineDefinition {
    let template = match meta.language {
        Language::Python => python(meta),
        Language::Node => node(meta),
        Language::Java => java(meta),
        Language::Go => go(meta),
        Language::Rust => rust(),
        Language::Ruby => ruby(meta),
        Language::Generic => generic(),
    };

    let mut steps = vec![Step::uses("Checkout code", "actions/checkout@v4")];
    steps.extend(template.setup);
    steps.extend(template.cache);
    if meta.has_linter {
        steps.extend(template.lint);
    }
    if meta.has_tests {
        steps.extend(template.test);
    }
    steps.extend(template.build);

    let strategy = template.matrix.map(|(key, values)| {
        let mut matrix = Mapping::new();
        matrix.insert(
            Value::from(key),
            Value::Sequence(values.into_iter().map(Value::from).collect()),
        );
        let mut strategy = Mapping::new();
        strategy.insert(Value::from("matrix"), Value::Mapping(matrix));
        Value::Mapping(strategy)
    });

    let mut jobs = BTreeMap::new();
    jobs.insert(
        JOB_NAME.to_string(),
        Job {
            runs_on: Value::from("ubuntu-latest"),
            strategy,
            timeout_minutes: Some(JOB_TIMEOUT_MINUTES),
            permissions: None,
            steps,
            extra: BTreeMap::new(),
        },
    );

    PipelineDefinition {
        name: Some(format!("CI - {}", repo_name(&meta.full_name))),
        on: triggers(branch),
        permissions: None,
        env: None,
        jobs,
    }
}

fn triggers(branch: &str) -> Value {
    let branches = || {
        let mut m = Mapping::new();
        m.insert(
            Value::from("branches"),
            Value::Sequence(vec![Value::from(branch)]),
        );
        Value::Mapping(m)
    };
    let mut on = Mapping::new();
    on.insert(Value::from("push"), branches());
    on.insert(Value::from("pull_request"), branches());
    Value::Mapping(on)
}

fn repo_name(full_name: &str) -> &str {
    full_name.rsplit('/').next().unwrap_or(full_name)
}

/// Matrix values, with the detected version included when it is missing.
fn versions(defaults: &[&str], detected: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = defaults.iter().map(|v| v.to_string()).collect();
    if let Some(v) = detected {
        if !out.iter().any(|o| o == v) {
            out.push(v.to_string());
        }
    }
    out
}

fn cache(name: &str, path: &str, key: &str, restore: &str) -> Step {
    Step::uses(name, "actions/cache@v4")
        .with("path", path)
        .with("key", key)
        .with("restore-keys", restore)
}

// ---------------------------------------------------------------------------
// Languages
// ---------------------------------------------------------------------------

fn python(meta: &RepositoryMetadata) -> Template {
    let manager = meta.package_manager.as_deref().unwrap_or("pip");
    let (install, lint, test, build): (Vec<Step>, &str, &str, &str) = match manager {
        "poetry" => (
            vec![
                Step::run("Install Poetry", "pip install poetry"),
                Step::run("Install dependencies", "poetry install"),
            ],
            "poetry run ruff check . && poetry run black --check .",
            "poetry run pytest --cov --cov-report=xml",
            "poetry build",
        ),
        "pipenv" => (
            vec![
                Step::run("Install Pipenv", "pip install pipenv"),
                Step::run("Install dependencies", "pipenv install --dev"),
            ],
            "pipenv run ruff check . && pipenv run black --check .",
            "pipenv run pytest --cov --cov-report=xml",
            "pip install build && python -m build",
        ),
        _ => (
            vec![Step::run(
                "Install dependencies",
                "pip install -r requirements.txt || pip install -e .[dev] || echo 'No dependencies file found'",
            )],
            "pip install ruff black && ruff check . && black --check .",
            "pip install pytest pytest-cov && pytest --cov --cov-report=xml",
            "pip install build && python -m build",
        ),
    };

    let mut setup = vec![Step::uses("Set up Python", "actions/setup-python@v5")
        .with("python-version", "${{ matrix.python-version }}")];
    setup.extend(install);

    Template {
        matrix: Some((
            "python-version",
            versions(&["3.9", "3.10", "3.11", "3.12"], meta.language_version.as_deref()),
        )),
        setup,
        cache: Some(cache(
            "Cache pip packages",
            "~/.cache/pip",
            "${{ runner.os }}-pip-${{ hashFiles('**/requirements*.txt') }}",
            "${{ runner.os }}-pip-",
        )),
        lint: Some(Step::run("Lint with ruff and black", lint)),
        test: Some(Step::run("Run tests", test)),
        build: Some(Step::run("Build package", build)),
    }
}

fn node(meta: &RepositoryMetadata) -> Template {
    let manager = meta.package_manager.as_deref().unwrap_or("npm");
    let (install, cache_path, lock, lint, test, build): (Vec<Step>, &str, &str, &str, &str, &str) =
        match manager {
            "pnpm" => (
                vec![
                    Step::run("Install pnpm", "npm install -g pnpm"),
                    Step::run("Install dependencies", "pnpm install"),
                ],
                "~/.pnpm-store",
                "pnpm-lock.yaml",
                "pnpm run lint",
                "pnpm test",
                "pnpm run build",
            ),
            "yarn" => (
                vec![Step::run("Install dependencies", "yarn install")],
                "~/.yarn/cache",
                "yarn.lock",
                "yarn lint",
                "yarn test",
                "yarn build",
            ),
            _ => (
                vec![Step::run("Install dependencies", "npm ci")],
                "~/.npm",
                "package-lock.json",
                "npm run lint",
                "npm test",
                "npm run build",
            ),
        };

    let mut setup = vec![Step::uses("Set up Node.js", "actions/setup-node@v4")
        .with("node-version", "${{ matrix.node-version }}")];
    setup.extend(install);

    // Only emit a build step when the manifest declares one.
    let has_build = meta.custom_commands.is_empty() || meta.custom_commands.contains_key("build");

    Template {
        matrix: Some((
            "node-version",
            versions(&["18", "20", "21"], meta.language_version.as_deref()),
        )),
        setup,
        cache: Some(cache(
            "Cache dependencies",
            cache_path,
            &format!("${{{{ runner.os }}}}-node-${{{{ hashFiles('**/{lock}') }}}}"),
            "${{ runner.os }}-node-",
        )),
        lint: Some(Step::run("Lint code", lint)),
        test: Some(Step::run("Run tests", test)),
        build: has_build.then(|| Step::run("Build project", build)),
    }
}

fn java(meta: &RepositoryMetadata) -> Template {
    let gradle = meta.build_tool.as_deref() == Some("gradle");
    let setup = vec![Step::uses("Set up JDK", "actions/setup-java@v4")
        .with("java-version", "${{ matrix.java-version }}")
        .with("distribution", "temurin")];

    let (cache_step, lint, test, build) = if gradle {
        (
            cache(
                "Cache Gradle packages",
                "~/.gradle/caches",
                "${{ runner.os }}-gradle-${{ hashFiles('**/*.gradle*', '**/gradle-wrapper.properties') }}",
                "${{ runner.os }}-gradle-",
            ),
            Step::run("Lint with Checkstyle", "./gradlew checkstyleMain"),
            Step::run("Run tests", "./gradlew test"),
            Step::run("Build with Gradle", "./gradlew build"),
        )
    } else {
        (
            cache(
                "Cache Maven packages",
                "~/.m2",
                "${{ runner.os }}-m2-${{ hashFiles('**/pom.xml') }}",
                "${{ runner.os }}-m2-",
            ),
            Step::run("Lint with Checkstyle", "mvn checkstyle:check"),
            Step::run("Run tests", "mvn test"),
            Step::run("Build with Maven", "mvn package"),
        )
    };

    Template {
        matrix: Some((
            "java-version",
            versions(&["11", "17", "21"], meta.language_version.as_deref()),
        )),
        setup,
        cache: Some(cache_step),
        lint: Some(lint),
        test: Some(test),
        build: Some(build),
    }
}

fn go(meta: &RepositoryMetadata) -> Template {
    let version = meta.language_version.as_deref().unwrap_or("stable");
    Template {
        matrix: None,
        setup: vec![Step::uses("Set up Go", "actions/setup-go@v5").with("go-version", version)],
        cache: Some(cache(
            "Cache Go modules",
            "~/go/pkg/mod",
            "${{ runner.os }}-go-${{ hashFiles('**/go.sum') }}",
            "${{ runner.os }}-go-",
        )),
        lint: Some(Step::run("Vet", "go vet ./...")),
        test: Some(Step::run("Run tests", "go test ./...")),
        build: Some(Step::run("Build", "go build ./...")),
    }
}

fn rust() -> Template {
    Template {
        matrix: None,
        setup: vec![Step::uses("Set up Rust", "dtolnay/rust-toolchain@stable")
            .with("components", "clippy, rustfmt")],
        cache: Some(cache(
            "Cache cargo registry and target",
            "~/.cargo/registry\n~/.cargo/git\ntarget\n",
            "${{ runner.os }}-cargo-${{ hashFiles('**/Cargo.lock') }}",
            "${{ runner.os }}-cargo-",
        )),
        lint: Some(Step::run(
            "Lint",
            "cargo fmt --all -- --check && cargo clippy --all-targets -- -D warnings",
        )),
        test: Some(Step::run("Run tests", "cargo test --all")),
        build: Some(Step::run("Build", "cargo build --release")),
    }
}

fn ruby(meta: &RepositoryMetadata) -> Template {
    let version = meta.language_version.as_deref().unwrap_or("3.3");
    let test = if meta.test_framework.as_deref() == Some("rspec") {
        "bundle exec rspec"
    } else {
        "bundle exec rake test"
    };
    Template {
        matrix: None,
        setup: vec![
            Step::uses("Set up Ruby", "ruby/setup-ruby@v1").with("ruby-version", version),
            Step::run("Install dependencies", "bundle config set path vendor/bundle && bundle install"),
        ],
        cache: Some(cache(
            "Cache gems",
            "vendor/bundle",
            "${{ runner.os }}-gems-${{ hashFiles('**/Gemfile.lock') }}",
            "${{ runner.os }}-gems-",
        )),
        lint: Some(Step::run("Lint with RuboCop", "bundle exec rubocop")),
        test: Some(Step::run("Run tests", test)),
        build: None,
    }
}

fn generic() -> Template {
    Template {
        lint: Some(Step::run(
            "Lint (placeholder)",
            "echo 'Add your linting command here'",
        )),
        test: Some(Step::run(
            "Test (placeholder)",
            "echo 'Add your test command here'",
        )),
        build: Some(Step::run(
            "Build (placeholder)",
            "echo 'Add your build command here'",
        )),
        ..Template::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(language: Language) -> RepositoryMetadata {
        RepositoryMetadata {
            language,
            has_tests: true,
            has_linter: true,
            ..RepositoryMetadata::generic("octo/demo")
        }
    }

    fn step_runs(def: &PipelineDefinition) -> Vec<String> {
        def.steps().filter_map(|(_, s)| s.run.clone()).collect()
    }

    #[test]
    fn every_language_renders_a_valid_pipeline() {
        for language in [
            Language::Python,
            Language::Node,
            Language::Java,
            Language::Go,
            Language::Rust,
            Language::Ruby,
            Language::Generic,
        ] {
            let text = TemplateRenderer.render(&meta(language), "main").unwrap();
            let def = PipelineDefinition::parse(&text).unwrap();
            assert!(def.has_trigger(), "{language}");
            let job = &def.jobs[JOB_NAME];
            assert_eq!(job.timeout_minutes, Some(JOB_TIMEOUT_MINUTES));
            assert_eq!(
                job.steps[0].uses.as_deref(),
                Some("actions/checkout@v4"),
                "{language}"
            );
        }
    }

    #[test]
    fn name_and_triggers_follow_repository() {
        let def = build_definition(&meta(Language::Generic), "develop");
        assert_eq!(def.name.as_deref(), Some("CI - demo"));
        let branches = &def.on["push"]["branches"];
        assert_eq!(branches[0].as_str(), Some("develop"));
        assert_eq!(def.on["pull_request"]["branches"][0].as_str(), Some("develop"));
    }

    #[test]
    fn gradle_steps_use_the_wrapper() {
        let mut m = meta(Language::Java);
        m.build_tool = Some("gradle".to_string());
        let runs = step_runs(&build_definition(&m, "main"));
        assert_eq!(
            runs,
            vec!["./gradlew checkstyleMain", "./gradlew test", "./gradlew build"]
        );
    }

    #[test]
    fn maven_is_the_java_default() {
        let runs = step_runs(&build_definition(&meta(Language::Java), "main"));
        assert!(runs.contains(&"mvn package".to_string()));
    }

    #[test]
    fn lint_and_test_follow_detection_flags() {
        let mut m = meta(Language::Python);
        m.has_tests = false;
        m.has_linter = false;
        let runs = step_runs(&build_definition(&m, "main"));
        assert!(!runs.iter().any(|r| r.contains("pytest")));
        assert!(!runs.iter().any(|r| r.contains("ruff")));
        assert!(runs.iter().any(|r| r.contains("python -m build")));
    }

    #[test]
    fn detected_version_joins_the_matrix() {
        let mut m = meta(Language::Python);
        m.language_version = Some("3.13".to_string());
        let def = build_definition(&m, "main");
        let strategy = def.jobs[JOB_NAME].strategy.clone().unwrap();
        let versions = strategy["matrix"]["python-version"].as_sequence().unwrap().len();
        assert_eq!(versions, 5);
    }

    #[test]
    fn poetry_commands() {
        let mut m = meta(Language::Python);
        m.package_manager = Some("poetry".to_string());
        let runs = step_runs(&build_definition(&m, "main"));
        assert_eq!(runs[0], "pip install poetry");
        assert!(runs.contains(&"poetry run pytest --cov --cov-report=xml".to_string()));
    }
}
