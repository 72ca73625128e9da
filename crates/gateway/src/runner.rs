//! Background job execution: builds the stage context from the job's
//! config and drives the pipeline, recording the outcome in the job
//! store and on the job's log channel.

use crate::state::AppState;
use std::sync::Arc;
use tv_domain::Result;
use tv_pipeline::agent::StageContext;
use tv_pipeline::audit::StepLogger;
use tv_pipeline::progress::JobLog;
use tv_pipeline::{ingest, orchestrator};
use tv_providers::OpenAiCompatClient;

fn build_context(state: &AppState, job_id: &str) -> Result<StageContext> {
    let config = state.jobs.load_config(job_id)?;
    let client = OpenAiCompatClient::from_settings(&config.llm)?;
    Ok(StageContext {
        client: Arc::new(client),
        limits: state.config.pipeline.clone(),
        pending_dir: state.jobs.pending_dir(job_id),
        output_dir: state.jobs.output_dir(job_id),
        report_requirement: config.report_requirement,
    })
}

async fn run_process(state: &AppState, job_id: &str, log: &JobLog) -> Result<()> {
    state
        .jobs
        .set_state(job_id, crate::jobs::JobState::Running, None)?;
    let ctx = build_context(state, job_id)?;
    let count = ingest::ingest_dir(&state.jobs.init_dir(job_id), &ctx.pending_dir)?;
    log.line(format!("normalized {count} traces"));
    let audit = StepLogger::new(&state.jobs.job_dir(job_id));
    orchestrator::process_batch(&ctx, log, &audit).await
}

async fn run_revise(state: &AppState, job_id: &str, requirement: &str, log: &JobLog) -> Result<()> {
    state
        .jobs
        .set_state(job_id, crate::jobs::JobState::Running, None)?;
    let ctx = build_context(state, job_id)?;
    orchestrator::revise_batch(&ctx, &state.jobs.job_dir(job_id), requirement, log).await
}

fn finish(state: &AppState, job_id: &str, log: &JobLog, result: Result<()>) {
    match result {
        Ok(()) => {
            if let Err(e) = state
                .jobs
                .set_state(job_id, crate::jobs::JobState::Finished, None)
            {
                tracing::error!(job_id, error = %e, "failed to persist finished state");
            }
            log.done();
        }
        Err(e) => {
            tracing::error!(job_id, error = %e, "job failed");
            if let Err(persist) = state.jobs.set_state(
                job_id,
                crate::jobs::JobState::Failed,
                Some(e.to_string()),
            ) {
                tracing::error!(job_id, error = %persist, "failed to persist failed state");
            }
            log.fail(e.to_string());
        }
    }
}

/// Run the full evaluation batch for a job in the background.
pub fn spawn_process(state: Arc<AppState>, job_id: String) {
    tokio::spawn(async move {
        let log = state.logs.producer(&job_id);
        let result = run_process(&state, &job_id, &log).await;
        finish(&state, &job_id, &log, result);
    });
}

/// Run the report revision flow for a job in the background.
pub fn spawn_revise(state: Arc<AppState>, job_id: String, requirement: String) {
    tokio::spawn(async move {
        let log = state.logs.producer(&job_id);
        let result = run_revise(&state, &job_id, &requirement, &log).await;
        finish(&state, &job_id, &log, result);
    });
}
