//! Structuring stage: copy the trace into the writable area and shorten
//! over-length step entries and the task description.

use super::FileArgs;
use crate::agent::{Stage, StageContext};
use crate::prompts;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tv_domain::chat::{Message, ToolDefinition, Usage};
use tv_domain::config::PipelineConfig;
use tv_domain::trace::TraceRecord;
use tv_domain::{Error, Result};
use tv_providers::ChatRequest;

/// Per-field lists of indices whose entries are over the length threshold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExceedIndex {
    pub thought: Vec<usize>,
    pub action: Vec<usize>,
    pub observation: Vec<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExceedIndexArgs {
    pub exceed_index: ExceedIndex,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummarizeArgs {
    pub file_path: String,
    pub exceed_index_list: Vec<usize>,
}

/// Which step field a summarize tool rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepField {
    Thought,
    Action,
    Observation,
}

impl StepField {
    fn noun(self) -> &'static str {
        match self {
            StepField::Thought => "thought",
            StepField::Action => "action",
            StepField::Observation => "observation",
        }
    }

    fn summarize_system(self) -> &'static str {
        match self {
            StepField::Thought => prompts::SUMMARIZE_TEXT_SYSTEM,
            _ => prompts::SUMMARIZE_CODE_SYSTEM,
        }
    }
}

pub enum StructuringTool {
    CreateStorageEnv(FileArgs),
    GetIndexExceedLength(FileArgs),
    IfNeedGenerateAbstract(ExceedIndexArgs),
    Summarize(StepField, SummarizeArgs),
    SummarizeTask(FileArgs),
}

pub struct StructuringStage;

#[async_trait::async_trait]
impl Stage for StructuringStage {
    type Tool = StructuringTool;

    fn name(&self) -> &'static str {
        "structuring"
    }

    fn system_prompt(&self) -> &'static str {
        prompts::STRUCTURING_SYSTEM
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let file_path_schema = serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "path of the trace JSON file"}
            },
            "required": ["file_path"]
        });
        let summarize_schema = serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "path of the writable trace JSON file"},
                "exceed_index_list": {
                    "type": "array",
                    "items": {"type": "integer"},
                    "description": "indices of the over-length entries to summarize"
                }
            },
            "required": ["file_path", "exceed_index_list"]
        });
        vec![
            ToolDefinition::new(
                "create_storage_env",
                "Copy the trace file into the writable storage area and return the \
                 path of the working copy.",
                file_path_schema.clone(),
            ),
            ToolDefinition::new(
                "get_index_exceed_length",
                "Scan the thought, action, and observation lists of the trace file \
                 and return, as JSON, the per-field lists of indices whose entries \
                 are over length.",
                file_path_schema.clone(),
            ),
            ToolDefinition::new(
                "if_need_generate_abstract",
                "From the per-field over-length index lists, report for each field \
                 whether summaries are needed (true) or not (false).",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "exceed_index": {
                            "type": "object",
                            "description": "per-field lists of over-length indices",
                            "properties": {
                                "thought": {"type": "array", "items": {"type": "integer"}},
                                "action": {"type": "array", "items": {"type": "integer"}},
                                "observation": {"type": "array", "items": {"type": "integer"}}
                            },
                            "required": ["thought", "action", "observation"]
                        }
                    },
                    "required": ["exceed_index"]
                }),
            ),
            ToolDefinition::new(
                "summarize_thought",
                "Summarize the over-length thought entries at the given indices and \
                 write the summaries back in place.",
                summarize_schema.clone(),
            ),
            ToolDefinition::new(
                "summarize_action",
                "Summarize the over-length action entries at the given indices and \
                 write the summaries back in place.",
                summarize_schema.clone(),
            ),
            ToolDefinition::new(
                "summarize_observation",
                "Summarize the over-length observation entries at the given indices \
                 and write the summaries back in place.",
                summarize_schema,
            ),
            ToolDefinition::new(
                "summarize_task",
                "Summarize the task field and write the summary back.",
                file_path_schema,
            ),
        ]
    }

    fn parse(&self, name: &str, args: &Value) -> Result<Option<Self::Tool>> {
        let tool = match name {
            "create_storage_env" => {
                StructuringTool::CreateStorageEnv(serde_json::from_value(args.clone())?)
            }
            "get_index_exceed_length" => {
                StructuringTool::GetIndexExceedLength(serde_json::from_value(args.clone())?)
            }
            "if_need_generate_abstract" => {
                StructuringTool::IfNeedGenerateAbstract(serde_json::from_value(args.clone())?)
            }
            "summarize_thought" => {
                StructuringTool::Summarize(StepField::Thought, serde_json::from_value(args.clone())?)
            }
            "summarize_action" => {
                StructuringTool::Summarize(StepField::Action, serde_json::from_value(args.clone())?)
            }
            "summarize_observation" => StructuringTool::Summarize(
                StepField::Observation,
                serde_json::from_value(args.clone())?,
            ),
            "summarize_task" => {
                StructuringTool::SummarizeTask(serde_json::from_value(args.clone())?)
            }
            _ => return Ok(None),
        };
        Ok(Some(tool))
    }

    async fn run(&self, ctx: &StageContext, tool: &Self::Tool) -> Result<(String, Vec<Usage>)> {
        match tool {
            StructuringTool::CreateStorageEnv(args) => create_storage_env(ctx, args),
            StructuringTool::GetIndexExceedLength(args) => get_index_exceed_length(ctx, args),
            StructuringTool::IfNeedGenerateAbstract(args) => if_need_generate_abstract(args),
            StructuringTool::Summarize(field, args) => summarize_field(ctx, *field, args).await,
            StructuringTool::SummarizeTask(args) => summarize_task(ctx, args).await,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn create_storage_env(ctx: &StageContext, args: &FileArgs) -> Result<(String, Vec<Usage>)> {
    let src = Path::new(&args.file_path);
    let dst = ctx.working_path(src);
    if dst == src {
        return Err(Error::Other(format!(
            "'{}' is not under the pending directory",
            args.file_path
        )));
    }
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(src, &dst)?;
    Ok((format!("writable file path: {}", dst.display()), Vec::new()))
}

/// Whether an entry is over length: more than the token threshold of
/// whitespace tokens, or more than the character threshold of chars.
fn exceeds(text: &str, limits: &PipelineConfig) -> bool {
    let tokens = text.split_whitespace().count();
    tokens > limits.summary_threshold_tokens
        || text.chars().count() > limits.summary_threshold_chars
}

pub fn exceed_indices(record: &TraceRecord, limits: &PipelineConfig) -> ExceedIndex {
    let collect = |entries: &[String]| {
        entries
            .iter()
            .enumerate()
            .filter(|(_, e)| exceeds(e, limits))
            .map(|(i, _)| i)
            .collect()
    };
    ExceedIndex {
        thought: collect(&record.thought),
        action: collect(&record.action),
        observation: collect(&record.observation),
    }
}

fn get_index_exceed_length(ctx: &StageContext, args: &FileArgs) -> Result<(String, Vec<Usage>)> {
    let record = TraceRecord::load(Path::new(&args.file_path))?;
    let exceed = exceed_indices(&record, &ctx.limits);
    Ok((serde_json::to_string(&exceed)?, Vec::new()))
}

fn if_need_generate_abstract(args: &ExceedIndexArgs) -> Result<(String, Vec<Usage>)> {
    let need = serde_json::json!({
        "thought": !args.exceed_index.thought.is_empty(),
        "action": !args.exceed_index.action.is_empty(),
        "observation": !args.exceed_index.observation.is_empty(),
    });
    Ok((format!("summary needed per field: {need}"), Vec::new()))
}

async fn summarize_field(
    ctx: &StageContext,
    field: StepField,
    args: &SummarizeArgs,
) -> Result<(String, Vec<Usage>)> {
    let path = ctx.working_path(Path::new(&args.file_path));
    let mut record = TraceRecord::load(&path)?;
    let mut usages = Vec::new();

    for &idx in &args.exceed_index_list {
        if idx >= record.length {
            return Err(Error::Other(format!(
                "{} index {idx} out of range for {}",
                field.noun(),
                record.id
            )));
        }
        let original = match field {
            StepField::Thought => record.thought[idx].clone(),
            StepField::Action => record.action[idx].clone(),
            StepField::Observation => record.observation[idx].clone(),
        };
        let summary = summarize_one(ctx, field.summarize_system(), field.noun(), &original, &mut usages)
            .await?;
        match field {
            StepField::Thought => record.thought[idx] = summary,
            StepField::Action => record.action[idx] = summary,
            StepField::Observation => record.observation[idx] = summary,
        }
    }

    record.save(&path)?;
    Ok((
        format!("{} summaries written to {}", field.noun(), path.display()),
        usages,
    ))
}

/// One summarization call. An empty completion falls back to a hard
/// truncation at the character threshold so the entry still shrinks.
async fn summarize_one(
    ctx: &StageContext,
    system: &str,
    kind: &str,
    original: &str,
    usages: &mut Vec<Usage>,
) -> Result<String> {
    let messages = vec![
        Message::system(system),
        Message::user(prompts::summarize_entry(
            kind,
            ctx.limits.summary_threshold_tokens,
            original,
        )),
    ];
    let resp = ctx.client.chat(&ChatRequest::text(messages)).await?;
    if let Some(u) = resp.usage {
        usages.push(u);
    }
    Ok(match resp.text() {
        Some(text) => text.to_string(),
        None => original
            .chars()
            .take(ctx.limits.summary_threshold_chars)
            .collect(),
    })
}

async fn summarize_task(ctx: &StageContext, args: &FileArgs) -> Result<(String, Vec<Usage>)> {
    let path = ctx.working_path(Path::new(&args.file_path));
    let mut record = TraceRecord::load(&path)?;
    let messages = vec![
        Message::system(prompts::SUMMARIZE_TASK_SYSTEM),
        Message::user(prompts::summarize_task(
            ctx.limits.summary_threshold_tokens,
            &record.task,
        )),
    ];
    let resp = ctx.client.chat(&ChatRequest::text(messages)).await?;
    let usages = resp.usage.into_iter().collect();
    if let Some(text) = resp.text() {
        record.task = text.to_string();
    }
    record.save(&path)?;
    Ok((
        format!("task summary written to {}", path.display()),
        usages,
    ))
}
