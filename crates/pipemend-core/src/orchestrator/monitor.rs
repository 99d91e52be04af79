//! Polling the hosting provider for the run triggered by the last commit.

use super::Engine;
use crate::error::{PipemendError, Result};
use crate::hosting::WorkflowRun;
use crate::state::{ExecutionRecord, RunState};
use crate::types::{AttemptOutcome, NextAction, RunConclusion, StepName};
use chrono::Utc;
use std::time::Duration;

/// Runs fetched per poll while looking for the commit's run.
const RUNS_PER_POLL: u32 = 10;

pub(super) fn observe(engine: &Engine, state: &mut RunState) -> Result<NextAction> {
    let git = state
        .git
        .as_ref()
        .ok_or(PipemendError::MissingState("work branch"))?;
    let sha = git
        .head_sha
        .clone()
        .ok_or(PipemendError::MissingState("head commit"))?;
    let branch = git.branch.clone();
    let repo = Engine::repo(state);
    let cfg = &engine.config.monitor;
    let interval = Duration::from_secs(cfg.poll_interval_secs);

    let mut found = None;
    for poll in 0..cfg.start_attempts {
        if poll > 0 {
            pause(interval);
        }
        found = engine
            .host
            .runs_for_branch(&repo, &branch, RUNS_PER_POLL)?
            .into_iter()
            .find(|r| r.head_sha == sha);
        if found.is_some() {
            break;
        }
        tracing::debug!(poll, sha = %sha, "waiting for run to start");
    }
    let Some(mut run) = found else {
        state.add_error(format!(
            "no run started for commit {sha} after {} polls",
            cfg.start_attempts
        ));
        return Ok(NextAction::Fail);
    };
    tracing::info!(run_id = run.id, run_number = run.run_number, "run found");

    let mut poll = 0;
    while !run.is_completed() && poll < cfg.completion_attempts {
        record(state, &run);
        pause(interval);
        run = engine.host.run(&repo, run.id)?;
        poll += 1;
        tracing::debug!(run_id = run.id, status = %run.status, poll, "run status");
    }
    record(state, &run);

    if !run.is_completed() {
        state.add_error(format!(
            "run {} still {} after {} polls",
            run.id, run.status, cfg.completion_attempts
        ));
        return Ok(NextAction::Fail);
    }

    match run.conclusion {
        Some(RunConclusion::Success) => {
            mark_last_attempt(state, AttemptOutcome::Resolved);
            tracing::info!(run_id = run.id, "run succeeded");
            Ok(NextAction::Complete)
        }
        Some(c) if c.is_failure() => {
            mark_last_attempt(state, AttemptOutcome::StillFailing);
            tracing::warn!(run_id = run.id, conclusion = %c, "run failed");
            Ok(NextAction::Step(StepName::DiagnoseFailure))
        }
        Some(RunConclusion::Cancelled | RunConclusion::Skipped | RunConclusion::Neutral) => {
            tracing::warn!(run_id = run.id, "run did not execute to a verdict");
            Ok(NextAction::Complete)
        }
        other => {
            let name = other.map_or("none", |c| c.as_str());
            state.add_error(format!("unexpected run conclusion: {name}"));
            Ok(NextAction::Fail)
        }
    }
}

fn record(state: &mut RunState, run: &WorkflowRun) {
    state.execution = Some(ExecutionRecord {
        run_id: run.id,
        run_number: run.run_number,
        status: run.status,
        conclusion: run.conclusion,
        html_url: run.html_url.clone(),
        head_sha: run.head_sha.clone(),
        observed_at: Utc::now(),
    });
}

fn mark_last_attempt(state: &mut RunState, outcome: AttemptOutcome) {
    if let Some(attempt) = state.last_applied_attempt_mut() {
        if attempt.outcome == AttemptOutcome::Committed {
            attempt.outcome = outcome;
        }
    }
}

fn pause(interval: Duration) {
    if !interval.is_zero() {
        std::thread::sleep(interval);
    }
}
