//! The bounded tool-calling agent loop that drives each stage.

use crate::audit::{StepEntry, StepLogger};
use crate::progress::JobLog;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tv_domain::chat::{Message, ToolDefinition, Usage};
use tv_domain::config::PipelineConfig;
use tv_domain::Result;
use tv_providers::{ChatClient, ChatRequest};

/// Everything a stage's tool handlers need: the model client, the
/// pipeline tunables, and the batch's directory layout.
pub struct StageContext {
    pub client: Arc<dyn ChatClient>,
    pub limits: PipelineConfig,
    /// Normalized read-only inputs.
    pub pending_dir: PathBuf,
    /// Writable working copies and batch-level artifacts.
    pub output_dir: PathBuf,
    pub report_requirement: Option<String>,
}

impl StageContext {
    /// Rebase a trace path onto the writable output directory.
    ///
    /// Paths already outside `pending_dir` pass through unchanged, so a
    /// tool handed an output path operates on it directly.
    pub fn working_path(&self, path: &Path) -> PathBuf {
        match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) if parent == self.pending_dir => {
                self.output_dir.join(name)
            }
            _ => path.to_path_buf(),
        }
    }
}

/// One evaluation stage: a system prompt, a closed tool set, and the
/// handlers behind it.
#[async_trait::async_trait]
pub trait Stage: Send + Sync {
    type Tool: Send + Sync;

    fn name(&self) -> &'static str;
    fn system_prompt(&self) -> &'static str;
    fn tool_definitions(&self) -> Vec<ToolDefinition>;

    /// Resolve a tool call into a typed variant. `Ok(None)` means the
    /// name is outside this stage's set; an `Err` means the arguments do
    /// not fit the tool's schema and the batch cannot continue.
    fn parse(&self, name: &str, args: &Value) -> Result<Option<Self::Tool>>;

    /// Execute a tool, returning the observation text plus the usage of
    /// any nested synthesis calls.
    async fn run(&self, ctx: &StageContext, tool: &Self::Tool) -> Result<(String, Vec<Usage>)>;
}

/// How a stage run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// The model signalled completion.
    Finished,
    /// The iteration cap ran out first. Not an error; whatever the stage
    /// wrote so far stands.
    StepLimit,
}

fn is_finish_text(text: &str) -> bool {
    text.starts_with("finish") || text.contains("finish(")
}

/// Run one stage's agent loop over a single trace file.
///
/// The conversation is a flat turn history re-sent whole every iteration:
/// `[system prompt, user(history joined by newlines)]`. Model transport
/// errors propagate; tool handler failures are retried once and then fed
/// back to the model as an error observation.
pub async fn run_stage<S: Stage>(
    stage: &S,
    ctx: &StageContext,
    input: &Path,
    log: &JobLog,
    audit: &StepLogger,
) -> Result<StageOutcome> {
    let file_name = input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string());
    let mut history: Vec<String> = vec![format!("file path: {}", input.display())];
    let tools = stage.tool_definitions();

    for step in 0..ctx.limits.max_steps {
        log.line(format!("{} --- step {} ---", stage.name(), step + 1));

        let messages = vec![
            Message::system(stage.system_prompt()),
            Message::user(history.join("\n")),
        ];
        let resp = ctx
            .client
            .chat(&ChatRequest::with_tools(messages, tools.clone()))
            .await?;
        let thought = resp.content.clone().unwrap_or_default();
        let mut entry = StepEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            file: file_name.clone(),
            stage: stage.name().to_string(),
            step,
            tool: None,
            args: None,
            thought: thought.clone(),
            observation: None,
            tokens: resp.usage,
            tokens_tool: None,
        };

        if resp.tool_calls.is_empty() {
            match resp.content.as_deref() {
                Some(text) => {
                    log.line(format!("model thought:\n{text}"));
                    if is_finish_text(text) {
                        log.line("stage complete");
                        entry.observation = Some("stage complete".into());
                        audit.append(&entry)?;
                        return Ok(StageOutcome::Finished);
                    }
                    history.push(text.to_string());
                    audit.append(&entry)?;
                }
                None => {
                    tracing::warn!(stage = stage.name(), step, "empty model response");
                    audit.append(&entry)?;
                }
            }
            continue;
        }

        // Only the first tool call of a turn is honored.
        let call = &resp.tool_calls[0];
        log.line(format!("model action: {} {}", call.tool_name, call.arguments));
        history.push(format!("{}{}", call.tool_name, call.arguments));
        entry.tool = Some(call.tool_name.clone());
        entry.args = Some(call.arguments.clone());

        if call.tool_name == "finish" || thought.starts_with("finish") {
            log.line("stage complete");
            entry.observation = Some("stage complete".into());
            audit.append(&entry)?;
            return Ok(StageOutcome::Finished);
        }

        let (observation, tool_usage) = match stage.parse(&call.tool_name, &call.arguments)? {
            None => (
                format!("error: undefined tool '{}'", call.tool_name),
                Vec::new(),
            ),
            Some(tool) => dispatch_with_retry(stage, ctx, &tool, &call.tool_name).await,
        };

        let observation = format!("observation: {observation}");
        log.line(&observation);
        history.push(observation.clone());
        entry.observation = Some(observation);
        if !tool_usage.is_empty() {
            entry.tokens_tool = Some(tool_usage);
        }
        audit.append(&entry)?;
    }

    log.line(format!("{}: step limit reached", stage.name()));
    Ok(StageOutcome::StepLimit)
}

/// Run a tool handler, retrying once with identical arguments. A second
/// failure is surfaced to the model as an error observation instead of
/// killing the batch.
async fn dispatch_with_retry<S: Stage>(
    stage: &S,
    ctx: &StageContext,
    tool: &S::Tool,
    name: &str,
) -> (String, Vec<Usage>) {
    match stage.run(ctx, tool).await {
        Ok(result) => result,
        Err(first) => {
            tracing::warn!(tool = name, error = %first, "tool handler failed, retrying once");
            match stage.run(ctx, tool).await {
                Ok(result) => result,
                Err(second) => {
                    tracing::error!(tool = name, error = %second, "tool handler failed twice");
                    (format!("error: {second}"), Vec::new())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{text_response, tool_call_response, TestEnv};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn finish_text_ends_the_loop() {
        let env = TestEnv::new(vec![text_response("I copied the file"), text_response("finish()")]);
        let outcome = run_stage(
            &crate::stages::structuring::StructuringStage,
            &env.ctx,
            &env.pending_file("trace-1.json"),
            &JobLog::discard(),
            &env.audit,
        )
        .await
        .unwrap();
        assert_eq!(outcome, StageOutcome::Finished);
        assert_eq!(env.client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn finish_embedded_in_text_counts() {
        let env = TestEnv::new(vec![text_response("All done, calling finish() now.")]);
        let outcome = run_stage(
            &crate::stages::structuring::StructuringStage,
            &env.ctx,
            &env.pending_file("trace-1.json"),
            &JobLog::discard(),
            &env.audit,
        )
        .await
        .unwrap();
        assert_eq!(outcome, StageOutcome::Finished);
    }

    #[tokio::test]
    async fn finish_tool_ends_without_dispatch() {
        let env = TestEnv::new(vec![tool_call_response("finish", serde_json::json!({}))]);
        let outcome = run_stage(
            &crate::stages::structuring::StructuringStage,
            &env.ctx,
            &env.pending_file("trace-1.json"),
            &JobLog::discard(),
            &env.audit,
        )
        .await
        .unwrap();
        assert_eq!(outcome, StageOutcome::Finished);
        assert_eq!(env.client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_tool_feeds_error_observation_back() {
        let env = TestEnv::new(vec![
            tool_call_response("frobnicate", serde_json::json!({"x": 1})),
            text_response("finish()"),
        ]);
        let outcome = run_stage(
            &crate::stages::structuring::StructuringStage,
            &env.ctx,
            &env.pending_file("trace-1.json"),
            &JobLog::discard(),
            &env.audit,
        )
        .await
        .unwrap();
        assert_eq!(outcome, StageOutcome::Finished);

        let audit_text = std::fs::read_to_string(env.audit.path()).unwrap();
        assert!(audit_text.contains("error: undefined tool 'frobnicate'"));
    }

    #[tokio::test]
    async fn twice_failing_handler_becomes_error_observation() {
        // score_task_completion on a missing file fails on both attempts;
        // the loop keeps going and the model can still finish.
        let missing = "/nonexistent/trace-9.json";
        let env = TestEnv::new(vec![
            tool_call_response(
                "score_task_completion",
                serde_json::json!({ "file_path": missing }),
            ),
            text_response("finish()"),
        ]);
        let outcome = run_stage(
            &crate::stages::insight::InsightStage,
            &env.ctx,
            &env.pending_file("trace-1.json"),
            &JobLog::discard(),
            &env.audit,
        )
        .await
        .unwrap();
        assert_eq!(outcome, StageOutcome::Finished);
        assert_eq!(env.client.calls.load(Ordering::SeqCst), 2);

        let audit_text = std::fs::read_to_string(env.audit.path()).unwrap();
        assert!(audit_text.contains("observation: error:"));
    }

    #[tokio::test]
    async fn malformed_tool_arguments_abort_the_run() {
        // summarize_thought without its file_path does not fit the schema.
        let env = TestEnv::new(vec![tool_call_response(
            "summarize_thought",
            serde_json::json!({ "exceed_index_list": [0] }),
        )]);
        let err = run_stage(
            &crate::stages::structuring::StructuringStage,
            &env.ctx,
            &env.pending_file("trace-1.json"),
            &JobLog::discard(),
            &env.audit,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, tv_domain::Error::Json(_)));
    }

    #[tokio::test]
    async fn step_limit_is_a_soft_stop() {
        // Ten thought-only turns, never a finish.
        let script = (0..10).map(|i| text_response(format!("thinking {i}"))).collect();
        let env = TestEnv::new(script);
        let outcome = run_stage(
            &crate::stages::structuring::StructuringStage,
            &env.ctx,
            &env.pending_file("trace-1.json"),
            &JobLog::discard(),
            &env.audit,
        )
        .await
        .unwrap();
        assert_eq!(outcome, StageOutcome::StepLimit);
        assert_eq!(env.client.calls.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn working_path_rebases_only_pending_files() {
        let env = TestEnv::new(Vec::new());
        let pending = env.ctx.pending_dir.join("trace-3.json");
        assert_eq!(env.ctx.working_path(&pending), env.ctx.output_dir.join("trace-3.json"));
        let output = env.ctx.output_dir.join("trace-3.json");
        assert_eq!(env.ctx.working_path(&output), output);
    }
}
