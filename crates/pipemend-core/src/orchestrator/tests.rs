use super::*;
use crate::config::MonitorConfig;
use crate::renderer::PipelineRenderer;
use crate::state::{RepositoryMetadata, RunOptions, ValidationOutcome};
use crate::testing::{FakeHost, ScriptedModel, ScriptedRun};
use crate::types::{AttemptOutcome, ExecutionMode, RiskCategory};

const GRADLE_REPO: &[(&str, &str)] = &[
    ("build.gradle", "plugins { id 'java' }"),
    ("gradlew", "#!/bin/sh"),
    ("src/main/java/App.java", "class App {}"),
    ("src/test/java/AppTest.java", "class AppTest {}"),
];

fn config() -> Config {
    Config {
        monitor: MonitorConfig {
            poll_interval_secs: 0,
            start_attempts: 3,
            completion_attempts: 3,
        },
        ..Config::default()
    }
}

fn setup(responses: &[&str]) -> (Arc<FakeHost>, Arc<ScriptedModel>, Engine) {
    let host = Arc::new(FakeHost::with_files(GRADLE_REPO));
    let model = Arc::new(ScriptedModel::new(responses));
    let engine = Engine::new(config(), host.clone(), model.clone()).unwrap();
    (host, model, engine)
}

fn options(f: impl FnOnce(&mut RunOptions)) -> RunOptions {
    let mut o = RunOptions {
        enable_monitoring: true,
        ..RunOptions::default()
    };
    f(&mut o);
    o
}

fn run(engine: &Engine, opts: RunOptions) -> RunState {
    engine.execute(RunState::new("octo", "demo", "main", opts))
}

fn visited(state: &RunState) -> Vec<&'static str> {
    state.triggers.iter().map(|t| t.component.as_str()).collect()
}

fn fenced(command: &str) -> String {
    format!(
        "```yaml\non: push\njobs:\n  ci:\n    runs-on: ubuntu-latest\n    steps:\n      - run: {command}\n```"
    )
}

struct BrokenRenderer;

impl PipelineRenderer for BrokenRenderer {
    fn render(&self, _meta: &RepositoryMetadata, _branch: &str) -> Result<String> {
        Err(PipemendError::InvalidPipeline("template unavailable".into()))
    }
}

struct RejectAll;

impl PipelineValidator for RejectAll {
    fn validate(&self, _content: &str) -> ValidationOutcome {
        ValidationOutcome {
            is_valid: false,
            errors: vec!["Workflow missing 'on' trigger configuration".into()],
            ..ValidationOutcome::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn happy_path_completes_after_successful_run() {
    let (host, _model, engine) = setup(&[]);
    let state = run(&engine, options(|_| {}));

    assert!(state.succeeded(), "{:?}", state.errors);
    assert!(state.errors.is_empty());
    assert!(state.completed_at.is_some());
    assert_eq!(
        visited(&state),
        vec![
            "detect",
            "generate",
            "validate",
            "assess_risk",
            "commit",
            "open_request",
            "observe_execution",
            "terminate"
        ]
    );

    let risk = state.risk.as_ref().unwrap();
    assert_eq!(risk.category, RiskCategory::Low);
    assert!(risk.requires_approval);

    let pulls = host.pulls();
    assert_eq!(pulls.len(), 1);
    assert_eq!(pulls[0].title, "Add CI workflow for java");
    assert_eq!(pulls[0].base, "main");
    assert!(pulls[0].head.starts_with("agent/ci-"));
    // model had nothing queued, so the template body is used
    assert!(pulls[0].body.contains("Automated CI workflow"));

    let git = state.git.as_ref().unwrap();
    assert_eq!(git.pr_number, Some(1));
    assert_eq!(host.commits()[0].path, ".github/workflows/ci.yml");
}

#[test]
fn skip_pull_request_stops_after_commit() {
    let (host, _model, engine) = setup(&[]);
    let state = run(&engine, options(|o| o.skip_pull_request = true));

    assert!(state.succeeded());
    assert_eq!(visited(&state).last(), Some(&"terminate"));
    assert!(!visited(&state).contains(&"open_request"));
    assert_eq!(host.commits().len(), 1);
    assert!(host.pulls().is_empty());
}

#[test]
fn without_monitoring_the_pull_request_completes_the_run() {
    let (_host, model, engine) = setup(&["## CI\n\nAdds a workflow."]);
    let state = run(&engine, options(|o| o.enable_monitoring = false));

    assert!(state.succeeded());
    assert!(state.execution.is_none());
    assert_eq!(model.requests()[0].model, "llama3:13b");
}

#[test]
fn failed_run_is_healed_and_resolved() {
    let (host, _model, engine) = setup(&[]);
    host.script_run(ScriptedRun::failure(
        "Run tests",
        "> Task :compileJava\nbash: ./gradlew: Permission denied\nError: Process completed with exit code 126.",
    ));

    let state = run(&engine, options(|_| {}));

    assert!(state.succeeded(), "{:?}", state.errors);
    assert_eq!(state.healing_count, 1);
    assert_eq!(state.failures.len(), 1);
    assert_eq!(state.failures[0].category, crate::types::FailureCategory::BuildError);
    assert!(state.failures[0].log_excerpt.contains("Permission denied"));

    let attempt = &state.healing_attempts[0];
    assert_eq!(attempt.strategy, crate::strategy::Strategy::WrapperPermission);
    assert!(attempt.applied);
    assert_eq!(attempt.outcome, AttemptOutcome::Resolved);

    let commits = host.commits();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].branch, commits[1].branch);
    assert!(commits[1].content.contains("chmod +x gradlew"));
    assert_eq!(
        visited(&state)[6..],
        [
            "observe_execution",
            "diagnose_failure",
            "heal",
            "observe_execution",
            "terminate"
        ]
    );
}

#[test]
fn healing_stops_at_the_attempt_limit() {
    let mut cfg = config();
    cfg.safety.max_healing_attempts = 2;
    let host = Arc::new(FakeHost::with_files(GRADLE_REPO));
    let one = fenced("echo one");
    let two = fenced("echo two");
    let model = Arc::new(ScriptedModel::new(&["PR body", &one, &two]));
    let engine = Engine::new(cfg, host.clone(), model.clone()).unwrap();
    for _ in 0..3 {
        host.script_run(ScriptedRun::failure("Deploy", "deployment target unreachable"));
    }

    let state = run(&engine, options(|_| {}));

    assert_eq!(state.next_action, NextAction::Fail);
    assert_eq!(state.healing_count, 2);
    assert_eq!(state.healing_attempts.len(), 2);
    assert!(state
        .healing_attempts
        .iter()
        .all(|a| a.outcome == AttemptOutcome::StillFailing));
    assert_eq!(host.commits().len(), 3);
    assert_eq!(model.requests().len(), 3);

    let summary = state.escalation.as_ref().unwrap().summary.as_ref().unwrap();
    assert_eq!(summary.attempts_used, 2);
    assert_eq!(summary.max_attempts, 2);
    assert_eq!(summary.strategies_tried, vec!["llm_analysis"]);
    assert!(state.completed_at.is_some());
}

#[test]
fn skip_healing_fails_after_diagnosis() {
    let (host, _model, engine) = setup(&[]);
    host.script_run(ScriptedRun::failure("Run tests", "3 tests failed"));

    let state = run(&engine, options(|o| o.skip_healing = true));

    assert_eq!(state.next_action, NextAction::Fail);
    assert!(!state.failures.is_empty());
    assert!(state.healing_attempts.is_empty());
    assert!(!visited(&state).contains(&"heal"));
}

#[test]
fn node_error_halts_without_terminate() {
    let (_host, _model, engine) = setup(&[]);
    let engine = engine.with_renderer(Arc::new(BrokenRenderer));
    let state = run(&engine, options(|_| {}));

    assert_eq!(state.next_action, NextAction::Fail);
    assert_eq!(state.errors.len(), 1);
    assert!(state.errors[0].contains("generate: invalid pipeline definition"));
    assert!(state.errors[0].starts_with('['));
    assert!(state.completed_at.is_none());
    assert_eq!(visited(&state), vec!["detect", "generate"]);
}

#[test]
fn regeneration_is_bounded() {
    let (_host, _model, engine) = setup(&[]);
    let engine = engine.with_validator(Arc::new(RejectAll));
    let state = run(&engine, options(|_| {}));

    assert_eq!(state.next_action, NextAction::Fail);
    assert_eq!(state.generation_attempts, 3);
    assert_eq!(state.artifact_history.len(), 2);
    let artifact = state.artifact.as_ref().unwrap();
    assert_eq!(artifact.attempt, 3);
    assert!((artifact.confidence - 0.65).abs() < 1e-9);
    assert!(state.errors[0].contains("still invalid after 3 generation attempts"));
    assert!(state.git.is_none());
}

#[test]
fn regeneration_uses_model_repair() {
    let repaired = fenced("make");
    let (_host, model, engine) = setup(&[&repaired]);
    let engine = engine.with_validator(Arc::new(RejectAll));
    let state = run(&engine, options(|_| {}));

    assert!(model.requests()[0].prompt.contains("missing 'on' trigger"));
    assert_eq!(state.artifact_history[1].content, "on: push\njobs:\n  ci:\n    runs-on: ubuntu-latest\n    steps:\n      - run: make\n");
}

#[test]
fn detect_only_mode() {
    let (host, _model, engine) = setup(&[]);
    let state = run(
        &engine,
        options(|o| o.mode = ExecutionMode::DetectOnly),
    );

    assert!(state.succeeded());
    assert_eq!(visited(&state), vec!["detect", "terminate"]);
    assert_eq!(
        state.metadata.as_ref().unwrap().build_tool.as_deref(),
        Some("gradle")
    );
    assert!(state.artifact.is_none());
    assert!(host.commits().is_empty());
}

#[test]
fn generate_only_mode_never_touches_the_remote() {
    let (host, _model, engine) = setup(&[]);
    let state = run(
        &engine,
        options(|o| o.mode = ExecutionMode::GenerateOnly),
    );

    assert!(state.succeeded());
    assert!(state.risk.is_some());
    assert!(host.branches().is_empty());
    assert!(host.commits().is_empty());
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[test]
fn unreachable_step_is_a_routing_violation() {
    let (_host, _model, engine) = setup(&[]);
    let state = RunState::new("octo", "demo", "main", RunOptions::default());
    let err = engine
        .route(StepName::Detect, NextAction::Step(StepName::Commit), &state)
        .unwrap_err();
    assert!(matches!(err, PipemendError::Routing(_)));
    assert_eq!(
        engine
            .route(StepName::Heal, NextAction::Step(StepName::ObserveExecution), &state)
            .unwrap(),
        Route::Node(StepName::ObserveExecution)
    );
    assert_eq!(
        engine.route(StepName::Validate, NextAction::Fail, &state).unwrap(),
        Route::Terminate(NextAction::Fail)
    );
}

#[test]
fn traversal_cap_covers_both_loops() {
    assert_eq!(traversal_cap(2, 3), 28);
    assert_eq!(traversal_cap(0, 0), 12);
}

#[test]
fn final_state_serializes() {
    let (_host, _model, engine) = setup(&[]);
    let state = run(&engine, options(|o| o.mode = ExecutionMode::GenerateOnly));
    let json = serde_json::to_value(&state).unwrap();
    assert_eq!(json["next_action"], "complete");
    assert_eq!(json["triggers"][0]["component"], "detect");
    assert_eq!(json["metadata"]["language"], "java");
}
