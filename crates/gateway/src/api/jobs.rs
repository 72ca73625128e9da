//! Job endpoints: submit, status, log stream, report, rerun, revision.

use crate::jobs::JobConfig;
use crate::runner;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tv_domain::config::LlmSettings;
use tv_domain::Error;
use tv_pipeline::history::ReportHistory;
use tv_pipeline::progress::LogEvent;

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": msg.into() })))
}

fn from_domain(err: Error) -> ApiError {
    match err {
        Error::NotFound(msg) => api_error(StatusCode::NOT_FOUND, msg),
        other => api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub traces: Vec<Value>,
    pub llm: LlmSettings,
    #[serde(default)]
    pub report_requirement: Option<String>,
}

pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.traces.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "traces must not be empty"));
    }

    let job_id = uuid::Uuid::new_v4().to_string();
    state.jobs.create(&job_id).map_err(from_domain)?;
    state
        .jobs
        .save_config(
            &job_id,
            &JobConfig {
                llm: req.llm,
                report_requirement: req.report_requirement,
            },
        )
        .map_err(from_domain)?;

    let init_dir = state.jobs.init_dir(&job_id);
    for (i, doc) in req.traces.iter().enumerate() {
        let path = init_dir.join(format!("upload-{i:04}.json"));
        let text = serde_json::to_string_pretty(doc)
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
        std::fs::write(path, text)
            .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    }

    state.logs.open(&job_id);
    tracing::info!(job_id, traces = req.traces.len(), "job submitted");
    runner::spawn_process(state.clone(), job_id.clone());

    Ok(Json(json!({ "job_id": job_id, "state": "submitted" })))
}

pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let status = state.jobs.load_status(&id).map_err(from_domain)?;
    serde_json::to_value(status)
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// Drops the registry slot when the SSE stream goes away, whether it
/// finished on a terminal event or the client disconnected mid-stream.
struct SlotCleanup {
    state: Arc<AppState>,
    job_id: String,
}

impl Drop for SlotCleanup {
    fn drop(&mut self) {
        self.state.logs.remove(&self.job_id);
    }
}

pub async fn stream_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if !state.jobs.exists(&id) {
        return Err(api_error(StatusCode::NOT_FOUND, format!("job not found: {id}")));
    }
    let mut rx = state
        .logs
        .take_receiver(&id)
        .ok_or_else(|| api_error(StatusCode::CONFLICT, "log stream already taken or closed"))?;

    let cleanup = SlotCleanup {
        state,
        job_id: id,
    };
    let stream = async_stream::stream! {
        let _cleanup = cleanup;
        while let Some(event) = rx.recv().await {
            match event {
                LogEvent::Line(line) => yield Ok(Event::default().data(line)),
                LogEvent::Done => {
                    yield Ok(Event::default().data("[[DONE]]"));
                    break;
                }
                LogEvent::Failed(msg) => {
                    yield Ok(Event::default().data(format!("[[ERROR]] {msg}")));
                    break;
                }
            }
        }
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn job_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.jobs.exists(&id) {
        return Err(api_error(StatusCode::NOT_FOUND, format!("job not found: {id}")));
    }
    let path = state
        .jobs
        .output_dir(&id)
        .join(tv_pipeline::conclude::REPORT_FILE);
    if !path.exists() {
        return Err(api_error(StatusCode::NOT_FOUND, "conclude report not generated yet"));
    }
    let report = std::fs::read_to_string(path)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/markdown; charset=utf-8")], report))
}

#[derive(Debug, Deserialize)]
pub struct RerunRequest {
    #[serde(default)]
    pub llm: Option<LlmSettings>,
    #[serde(default)]
    pub report_requirement: Option<String>,
}

/// Re-run the batch, resuming past already-produced outputs. Any saved
/// report history is dropped so revisions start over from the new run.
pub async fn rerun_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<RerunRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut config = state.jobs.load_config(&id).map_err(from_domain)?;
    if let Some(llm) = req.llm {
        config.llm = llm;
    }
    if req.report_requirement.is_some() {
        config.report_requirement = req.report_requirement;
    }
    state.jobs.save_config(&id, &config).map_err(from_domain)?;
    ReportHistory::clear(&state.jobs.job_dir(&id)).map_err(from_domain)?;

    state.logs.open(&id);
    tracing::info!(job_id = %id, "job rerun requested");
    runner::spawn_process(state.clone(), id.clone());
    Ok(Json(json!({ "job_id": id, "state": "submitted" })))
}

#[derive(Debug, Deserialize)]
pub struct RequirementRequest {
    pub report_requirement: String,
}

pub async fn revise_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<RequirementRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut config = state.jobs.load_config(&id).map_err(from_domain)?;
    config.report_requirement = Some(req.report_requirement.clone());
    state.jobs.save_config(&id, &config).map_err(from_domain)?;

    state.logs.open(&id);
    tracing::info!(job_id = %id, "report revision requested");
    runner::spawn_revise(state.clone(), id.clone(), req.report_requirement);
    Ok(Json(json!({ "job_id": id, "state": "submitted" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tv_domain::config::AppConfig;

    fn test_state(dir: &std::path::Path) -> Arc<AppState> {
        let mut config = AppConfig::default();
        config.server.data_dir = dir.join("jobs").display().to_string();
        Arc::new(AppState::new(config).unwrap())
    }

    #[tokio::test]
    async fn dropped_log_stream_releases_the_registry_slot() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.jobs.create("job-1").unwrap();
        state.logs.open("job-1");

        let sse = stream_logs(State(state.clone()), Path("job-1".into()))
            .await
            .map_err(|(status, _)| status)
            .unwrap();
        assert!(state.logs.contains("job-1"));

        // A client disconnect drops the stream before any terminal event.
        drop(sse);
        assert!(!state.logs.contains("job-1"));
    }

    #[tokio::test]
    async fn second_stream_for_the_same_job_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        state.jobs.create("job-1").unwrap();
        state.logs.open("job-1");

        let _sse = stream_logs(State(state.clone()), Path("job-1".into()))
            .await
            .map_err(|(status, _)| status)
            .unwrap();
        let err = stream_logs(State(state.clone()), Path("job-1".into()))
            .await
            .map_err(|(status, _)| status)
            .unwrap_err();
        assert_eq!(err, StatusCode::CONFLICT);
    }
}
