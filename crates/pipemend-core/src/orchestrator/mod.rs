//! The remediation state machine.
//!
//! ```text
//! detect ─▶ generate ─▶ validate ─▶ assess_risk ─▶ commit ─▶ open_request
//!              ▲           │                                     │
//!              └───────────┘ (structural errors,                 ▼
//!                             bounded)           ┌──────▶ observe_execution ─▶ terminate
//!                                                │               │
//!                                               heal ◀── diagnose_failure
//! ```
//!
//! Each node mutates the [`RunState`] and returns a [`NextAction`]. The
//! engine routes on that action and the run flags alone. A node error is
//! appended to the state, the run is marked failed and the engine halts
//! without running `terminate`.

mod monitor;
mod nodes;

use crate::config::Config;
use crate::error::{PipemendError, Result};
use crate::healer::HealingEngine;
use crate::hosting::{RepoRef, RepositoryHost};
use crate::llm::LanguageModel;
use crate::renderer::{PipelineRenderer, TemplateRenderer};
use crate::state::RunState;
use crate::types::{NextAction, StepName};
use crate::validator::{PipelineValidator, RuleValidator};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A graph node.
pub type Node = fn(&Engine, &mut RunState) -> Result<NextAction>;

/// Where the engine goes after a node returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Node(StepName),
    Terminate(NextAction),
}

/// Node executions allowed for a run, derived from both loop budgets.
pub fn traversal_cap(max_regenerations: u32, max_attempts: u32) -> usize {
    12 + 2 * max_regenerations as usize + 4 * max_attempts as usize
}

pub struct Engine {
    config: Config,
    host: Arc<dyn RepositoryHost>,
    model: Arc<dyn LanguageModel>,
    renderer: Arc<dyn PipelineRenderer>,
    validator: Arc<dyn PipelineValidator>,
    healer: HealingEngine,
}

impl Engine {
    pub fn new(
        config: Config,
        host: Arc<dyn RepositoryHost>,
        model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        let validator = RuleValidator::new(&config.safety, &config.pipelines)?;
        let healer = HealingEngine::new(
            host.clone(),
            model.clone(),
            config.llm.reasoning_model.clone(),
            Duration::from_secs(config.llm.timeout_secs),
            config.safety.max_healing_attempts,
        );
        Ok(Self {
            config,
            host,
            model,
            renderer: Arc::new(TemplateRenderer),
            validator: Arc::new(validator),
            healer,
        })
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PipelineRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn PipelineValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Drive `state` through the graph until a terminal action.
    pub fn execute(&self, mut state: RunState) -> RunState {
        let cap = traversal_cap(
            self.config.safety.max_regenerations,
            self.healer.max_attempts(),
        );
        let mut visits = 0usize;
        tracing::info!(
            run_id = %state.run_id,
            repo = %state.full_name(),
            mode = %state.options.mode,
            "run started"
        );

        loop {
            let step = match state.next_action {
                NextAction::Step(StepName::Terminate) => {
                    self.terminate(&mut state, NextAction::Complete);
                    break;
                }
                NextAction::Step(step) => step,
                NextAction::Complete | NextAction::Fail => break,
            };

            if visits >= cap {
                state.add_error(format!(
                    "traversal budget exhausted after {visits} node executions"
                ));
                state.next_action = NextAction::Fail;
                tracing::error!(visits, cap, "traversal budget exhausted");
                break;
            }
            visits += 1;

            let started = Instant::now();
            let result = (Self::node(step))(self, &mut state);
            let duration_ms = started.elapsed().as_millis() as u64;

            let action = match result {
                Ok(action) => action,
                Err(e) => {
                    tracing::error!(node = %step, error = %e, "node failed");
                    state.add_error(format!("{step}: {e}"));
                    state.next_action = NextAction::Fail;
                    state.record_trigger(step, NextAction::Fail, format!("error: {e}"), duration_ms);
                    break;
                }
            };
            state.next_action = action;
            state.record_trigger(step, action, "ok", duration_ms);
            tracing::info!(node = %step, next = %action, duration_ms, "node complete");

            match self.route(step, action, &state) {
                Ok(Route::Node(next)) => state.next_action = NextAction::Step(next),
                Ok(Route::Terminate(outcome)) => {
                    self.terminate(&mut state, outcome);
                    break;
                }
                Err(e) => {
                    tracing::error!(node = %step, error = %e, "routing failed");
                    state.add_error(e.to_string());
                    state.next_action = NextAction::Fail;
                    break;
                }
            }
        }

        state
    }

    fn node(step: StepName) -> Node {
        match step {
            StepName::Detect => nodes::detect,
            StepName::Generate => nodes::generate,
            StepName::Validate => nodes::validate,
            StepName::AssessRisk => nodes::assess_risk,
            StepName::Commit => nodes::commit,
            StepName::OpenRequest => nodes::open_request,
            StepName::ObserveExecution => monitor::observe,
            StepName::DiagnoseFailure => nodes::diagnose,
            StepName::Heal => nodes::heal,
            StepName::Terminate => nodes::finish,
        }
    }

    /// The routing table. Only the returned action, the execution mode and
    /// the two skip flags are consulted.
    pub fn route(&self, from: StepName, action: NextAction, state: &RunState) -> Result<Route> {
        let opts = &state.options;
        let to = match action {
            NextAction::Complete | NextAction::Fail => return Ok(Route::Terminate(action)),
            NextAction::Step(to) => to,
        };

        if opts.mode.stop_after() == Some(from) {
            return Ok(Route::Terminate(NextAction::Complete));
        }

        use StepName::*;
        let route = match (from, to) {
            (Detect, Generate)
            | (Generate, Validate)
            | (Validate, AssessRisk)
            | (Validate, Generate)
            | (AssessRisk, Commit)
            | (OpenRequest, ObserveExecution)
            | (ObserveExecution, DiagnoseFailure)
            | (Heal, ObserveExecution) => Route::Node(to),
            (Commit, OpenRequest) if opts.skip_pull_request => Route::Terminate(NextAction::Complete),
            (Commit, OpenRequest) => Route::Node(to),
            (DiagnoseFailure, Heal) if opts.skip_healing => Route::Terminate(NextAction::Fail),
            (DiagnoseFailure, Heal) => Route::Node(to),
            (_, Terminate) => Route::Terminate(NextAction::Complete),
            _ => {
                return Err(PipemendError::Routing(format!(
                    "{from} cannot hand off to {to}"
                )))
            }
        };
        Ok(route)
    }

    fn terminate(&self, state: &mut RunState, outcome: NextAction) {
        let started = Instant::now();
        state.next_action = outcome;
        let _ = nodes::finish(self, state);
        state.record_trigger(
            StepName::Terminate,
            outcome,
            outcome.as_str(),
            started.elapsed().as_millis() as u64,
        );
    }

    fn repo(state: &RunState) -> RepoRef {
        RepoRef::new(state.owner.as_str(), state.name.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests;
