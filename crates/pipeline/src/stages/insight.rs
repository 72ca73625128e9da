//! Insight stage: score the trace, analyze errors, strengths and
//! weaknesses, derive an insight, and produce an optimization strategy.
//! Each tool is one synthesis call whose raw output lands in a record
//! field; the report stage structures those fields later.

use super::FileArgs;
use crate::agent::{Stage, StageContext};
use crate::prompts;
use crate::table;
use serde_json::Value;
use std::path::Path;
use tv_domain::chat::{Message, ToolDefinition, Usage};
use tv_domain::trace::TraceRecord;
use tv_domain::Result;
use tv_providers::retry::generate_text;

pub enum InsightTool {
    ScoreTaskCompletion(FileArgs),
    DetectErrors(FileArgs),
    DetectAdvantagesDisadvantages(FileArgs),
    GenerateInsights(FileArgs),
    GenerateOptimizationStrategy(FileArgs),
}

pub struct InsightStage;

#[async_trait::async_trait]
impl Stage for InsightStage {
    type Tool = InsightTool;

    fn name(&self) -> &'static str {
        "insight"
    }

    fn system_prompt(&self) -> &'static str {
        prompts::INSIGHT_SYSTEM
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "path of the trace JSON file"}
            },
            "required": ["file_path"]
        });
        vec![
            ToolDefinition::new(
                "score_task_completion",
                "Score the overall task completion from 0 to 100 from the trace \
                 table, with a rationale, and write it back to the file.",
                schema.clone(),
            ),
            ToolDefinition::new(
                "detect_errors",
                "Analyze the main and secondary errors made during execution and \
                 write them back to the file.",
                schema.clone(),
            ),
            ToolDefinition::new(
                "detect_advantages_disadvantages",
                "Summarize the strengths and weaknesses of the execution and write \
                 them back to the file.",
                schema.clone(),
            ),
            ToolDefinition::new(
                "generate_insights",
                "Derive a root-cause insight from the detected errors and the \
                 strengths and weaknesses, and write it back to the file.",
                schema.clone(),
            ),
            ToolDefinition::new(
                "generate_optimization_strategy",
                "From the errors, the strengths and weaknesses, and the insight, \
                 produce an actionable optimization strategy plus a fine-tuning \
                 sample, and write them back to the file.",
                schema,
            ),
        ]
    }

    fn parse(&self, name: &str, args: &Value) -> Result<Option<Self::Tool>> {
        let tool = match name {
            "score_task_completion" => {
                InsightTool::ScoreTaskCompletion(serde_json::from_value(args.clone())?)
            }
            "detect_errors" => InsightTool::DetectErrors(serde_json::from_value(args.clone())?),
            "detect_advantages_disadvantages" => {
                InsightTool::DetectAdvantagesDisadvantages(serde_json::from_value(args.clone())?)
            }
            "generate_insights" => {
                InsightTool::GenerateInsights(serde_json::from_value(args.clone())?)
            }
            "generate_optimization_strategy" => {
                InsightTool::GenerateOptimizationStrategy(serde_json::from_value(args.clone())?)
            }
            _ => return Ok(None),
        };
        Ok(Some(tool))
    }

    async fn run(&self, ctx: &StageContext, tool: &Self::Tool) -> Result<(String, Vec<Usage>)> {
        match tool {
            InsightTool::ScoreTaskCompletion(args) => {
                judge_from_trace(ctx, args, prompts::SCORE_SYSTEM, Field::Score, "completion score")
                    .await
            }
            InsightTool::DetectErrors(args) => {
                judge_from_trace(ctx, args, prompts::DETECT_ERRORS_SYSTEM, Field::Error, "error analysis")
                    .await
            }
            InsightTool::DetectAdvantagesDisadvantages(args) => {
                judge_from_trace(
                    ctx,
                    args,
                    prompts::FEATURES_SYSTEM,
                    Field::Feature,
                    "strengths and weaknesses",
                )
                .await
            }
            InsightTool::GenerateInsights(args) => generate_insights(ctx, args).await,
            InsightTool::GenerateOptimizationStrategy(args) => {
                generate_optimization_strategy(ctx, args).await
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Field {
    Score,
    Error,
    Feature,
}

/// Shared shape of the three trace-table judgments: build the judgment
/// context, synthesize, store the raw output in the target field.
async fn judge_from_trace(
    ctx: &StageContext,
    args: &FileArgs,
    system: &str,
    field: Field,
    what: &str,
) -> Result<(String, Vec<Usage>)> {
    let path = Path::new(&args.file_path);
    let mut record = TraceRecord::load(path)?;
    let messages = vec![
        Message::system(system),
        Message::user(prompts::trace_judgment(&table::judgment_context(&record))),
    ];
    let (text, usages) =
        generate_text(ctx.client.as_ref(), messages, ctx.limits.max_completion_retries).await?;
    let value = Value::String(text);
    match field {
        Field::Score => record.score = Some(value),
        Field::Error => record.error = Some(value),
        Field::Feature => record.feature = Some(value),
    }
    record.save(path)?;
    Ok((format!("{what} written to {}", path.display()), usages))
}

fn field_text(value: &Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => String::new(),
    }
}

async fn generate_insights(ctx: &StageContext, args: &FileArgs) -> Result<(String, Vec<Usage>)> {
    let path = Path::new(&args.file_path);
    let mut record = TraceRecord::load(path)?;
    let context = format!(
        "Here are the errors the agent made and its strengths and weaknesses:\n{}\n{}",
        field_text(&record.error),
        field_text(&record.feature),
    );
    let messages = vec![
        Message::system(prompts::INSIGHT_TOOL_SYSTEM),
        Message::user(context),
    ];
    let (text, usages) =
        generate_text(ctx.client.as_ref(), messages, ctx.limits.max_completion_retries).await?;
    record.insight = Some(Value::String(text));
    record.save(path)?;
    Ok((format!("insight written to {}", path.display()), usages))
}

async fn generate_optimization_strategy(
    ctx: &StageContext,
    args: &FileArgs,
) -> Result<(String, Vec<Usage>)> {
    let path = Path::new(&args.file_path);
    let mut record = TraceRecord::load(path)?;
    let context = format!(
        "Here are the errors the agent made, its strengths and weaknesses, and \
         the root-cause insight:\n{}\n{}\n{}",
        field_text(&record.error),
        field_text(&record.feature),
        field_text(&record.insight),
    );
    let messages = vec![
        Message::system(prompts::OPTIMIZATION_SYSTEM),
        Message::user(context),
    ];
    let (text, usages) =
        generate_text(ctx.client.as_ref(), messages, ctx.limits.max_completion_retries).await?;
    record.optimization = Some(Value::String(text));
    record.save(path)?;
    Ok((
        format!("optimization strategy written to {}", path.display()),
        usages,
    ))
}
