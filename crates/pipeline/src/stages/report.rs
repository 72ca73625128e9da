//! Report stage: structure the raw stage outputs, tag the key error,
//! and, when the batch qualifies, build and polish the conclude report.

use super::FileArgs;
use crate::agent::{Stage, StageContext};
use crate::{aggregate, conclude, prompts};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tv_domain::chat::{Message, ToolDefinition, Usage};
use tv_domain::trace::TraceRecord;
use tv_domain::{Error, Result};
use tv_providers::retry::generate_text;

#[derive(Debug, Clone, Deserialize)]
pub struct ConcludeArgs {
    pub file_path: String,
    #[serde(default)]
    pub key_error: String,
    #[serde(default)]
    pub score_distribution: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportPathArgs {
    pub report_path: String,
}

pub enum ReportTool {
    ProcessJsonFile(FileArgs),
    GenerateKeyError(FileArgs),
    IfGenerateConcludeReport(FileArgs),
    CountKeyErrorValues(FileArgs),
    CountCompletionScoreDistribution(FileArgs),
    GenerateConcludeReport(ConcludeArgs),
    PolishConcludeReport(ReportPathArgs),
}

pub struct ReportStage;

#[async_trait::async_trait]
impl Stage for ReportStage {
    type Tool = ReportTool;

    fn name(&self) -> &'static str {
        "report"
    }

    fn system_prompt(&self) -> &'static str {
        prompts::REPORT_SYSTEM
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let file_schema = serde_json::json!({
            "type": "object",
            "properties": {
                "file_path": {"type": "string", "description": "path of a record JSON file"}
            },
            "required": ["file_path"]
        });
        vec![
            ToolDefinition::new(
                "process_json_file",
                "Structure the score, error, feature, and insight fields of the \
                 record by parsing their embedded JSON, and write the result back.",
                file_schema.clone(),
            ),
            ToolDefinition::new(
                "generate_key_error",
                "Derive a short key-error tag from the record's error analysis and \
                 write it back.",
                file_schema.clone(),
            ),
            ToolDefinition::new(
                "if_generate_conclude_report",
                "Check whether the record's folder currently holds a qualifying \
                 number of JSON records for generating the conclude report.",
                file_schema.clone(),
            ),
            ToolDefinition::new(
                "count_key_error_values",
                "Count the key_error values across all records in the folder and \
                 return a Markdown table.",
                file_schema.clone(),
            ),
            ToolDefinition::new(
                "count_completion_score_distribution",
                "Count completion scores per band (100, 90-99, 80-89, 60-79, 1-59, \
                 0) across all records in the folder and return a Markdown table.",
                file_schema.clone(),
            ),
            ToolDefinition::new(
                "generate_conclude_report",
                "Generate the detailed Markdown conclude report from every record \
                 in the folder plus the key-error and score-distribution tables, \
                 and write it to conclude_report.md.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "file_path": {"type": "string", "description": "path of any record JSON file"},
                        "key_error": {"type": "string", "description": "Markdown key_error count table"},
                        "score_distribution": {"type": "string", "description": "Markdown score distribution table"}
                    },
                    "required": ["file_path", "key_error", "score_distribution"]
                }),
            ),
            ToolDefinition::new(
                "polish_conclude_report",
                "Polish the conclude report by appending the referenced trace \
                 records as an appendix, writing conclude_report_polished.md.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "report_path": {"type": "string", "description": "path of the Markdown conclude report"}
                    },
                    "required": ["report_path"]
                }),
            ),
        ]
    }

    fn parse(&self, name: &str, args: &Value) -> Result<Option<Self::Tool>> {
        let tool = match name {
            "process_json_file" => {
                ReportTool::ProcessJsonFile(serde_json::from_value(args.clone())?)
            }
            "generate_key_error" => {
                ReportTool::GenerateKeyError(serde_json::from_value(args.clone())?)
            }
            "if_generate_conclude_report" => {
                ReportTool::IfGenerateConcludeReport(serde_json::from_value(args.clone())?)
            }
            "count_key_error_values" => {
                ReportTool::CountKeyErrorValues(serde_json::from_value(args.clone())?)
            }
            "count_completion_score_distribution" => {
                ReportTool::CountCompletionScoreDistribution(serde_json::from_value(args.clone())?)
            }
            "generate_conclude_report" => {
                ReportTool::GenerateConcludeReport(serde_json::from_value(args.clone())?)
            }
            "polish_conclude_report" => {
                ReportTool::PolishConcludeReport(serde_json::from_value(args.clone())?)
            }
            _ => return Ok(None),
        };
        Ok(Some(tool))
    }

    async fn run(&self, ctx: &StageContext, tool: &Self::Tool) -> Result<(String, Vec<Usage>)> {
        match tool {
            ReportTool::ProcessJsonFile(args) => process_json_file(args),
            ReportTool::GenerateKeyError(args) => generate_key_error(ctx, args).await,
            ReportTool::IfGenerateConcludeReport(args) => {
                if_generate_conclude_report(ctx, args)
            }
            ReportTool::CountKeyErrorValues(args) => count_key_error_values(args),
            ReportTool::CountCompletionScoreDistribution(args) => {
                count_completion_score_distribution(args)
            }
            ReportTool::GenerateConcludeReport(args) => generate_conclude_report(ctx, args).await,
            ReportTool::PolishConcludeReport(args) => {
                Ok((conclude::polish_report(Path::new(&args.report_path))?, Vec::new()))
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse JSON embedded in model output: a fenced ```json block first,
/// then the whole text. `None` means the value should stay as-is.
pub fn extract_inner_json(text: &str) -> Option<Value> {
    if let Some(fence_start) = text.find("```json") {
        let rest = &text[fence_start + "```json".len()..];
        if let Some(fence_end) = rest.find("```") {
            let inner = rest[..fence_end].trim();
            if inner.starts_with('{') && inner.ends_with('}') {
                if let Ok(value) = serde_json::from_str(inner) {
                    return Some(value);
                }
                tracing::warn!("embedded JSON block did not parse, leaving value raw");
                return None;
            }
        }
    }
    match serde_json::from_str(text.trim()) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("value is not valid JSON, leaving it raw");
            None
        }
    }
}

fn structure_field(field: &mut Option<Value>) {
    if let Some(Value::String(text)) = field {
        if let Some(parsed) = extract_inner_json(text) {
            *field = Some(parsed);
        }
    }
}

fn process_json_file(args: &FileArgs) -> Result<(String, Vec<Usage>)> {
    let path = Path::new(&args.file_path);
    let mut record = TraceRecord::load(path)?;
    structure_field(&mut record.score);
    structure_field(&mut record.error);
    structure_field(&mut record.feature);
    structure_field(&mut record.insight);
    record.save(path)?;
    Ok(("record structured and written back".into(), Vec::new()))
}

async fn generate_key_error(ctx: &StageContext, args: &FileArgs) -> Result<(String, Vec<Usage>)> {
    let path = Path::new(&args.file_path);
    let mut record = TraceRecord::load(path)?;
    let error_text = match &record.error {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => String::new(),
    };
    let messages = vec![
        Message::system(prompts::KEY_ERROR_SYSTEM),
        Message::user(format!("Here are the agent's main core errors:\n{error_text}")),
    ];
    let (tag, usages) =
        generate_text(ctx.client.as_ref(), messages, ctx.limits.max_completion_retries).await?;
    record.key_error = Some(Value::String(tag.trim().to_string()));
    record.save(path)?;
    Ok((
        format!("key error tag written to {}", path.display()),
        usages,
    ))
}

fn record_folder(args_path: &str) -> Result<&Path> {
    Path::new(args_path)
        .parent()
        .ok_or_else(|| Error::Other(format!("'{args_path}' has no parent folder")))
}

fn count_records(folder: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"))
        {
            count += 1;
        }
    }
    Ok(count)
}

fn if_generate_conclude_report(
    ctx: &StageContext,
    args: &FileArgs,
) -> Result<(String, Vec<Usage>)> {
    let folder = record_folder(&args.file_path)?;
    if !folder.is_dir() {
        return Err(Error::NotFound(format!(
            "record folder does not exist: {}",
            folder.display()
        )));
    }
    let count = count_records(folder)?;
    // A modulus of 0 would divide by zero; treat it as never qualifying.
    let qualifies = ctx.limits.batch_modulus > 0
        && count > 0
        && count % ctx.limits.batch_modulus == 0;
    Ok((
        format!("generate conclude report: {qualifies} ({count} records in folder)"),
        Vec::new(),
    ))
}

fn count_key_error_values(args: &FileArgs) -> Result<(String, Vec<Usage>)> {
    let folder = record_folder(&args.file_path)?;
    let counts = aggregate::count_key_errors(folder)?;
    Ok((aggregate::key_error_table(&counts), Vec::new()))
}

fn count_completion_score_distribution(args: &FileArgs) -> Result<(String, Vec<Usage>)> {
    let folder = record_folder(&args.file_path)?;
    let dist = aggregate::score_distribution(folder)?;
    Ok((aggregate::score_table(&dist), Vec::new()))
}

async fn generate_conclude_report(
    ctx: &StageContext,
    args: &ConcludeArgs,
) -> Result<(String, Vec<Usage>)> {
    // The model passes the tables it collected; recompute any it left out.
    let key_error = if args.key_error.is_empty() {
        aggregate::key_error_table(&aggregate::count_key_errors(&ctx.output_dir)?)
    } else {
        args.key_error.clone()
    };
    let score_distribution = if args.score_distribution.is_empty() {
        aggregate::score_table(&aggregate::score_distribution(&ctx.output_dir)?)
    } else {
        args.score_distribution.clone()
    };
    let usages = conclude::generate_report(ctx, &key_error, &score_distribution).await?;
    Ok((
        format!(
            "conclude report written to {}",
            ctx.output_dir.join(conclude::REPORT_FILE).display()
        ),
        usages,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_record, text_response, TestEnv};

    #[test]
    fn extract_prefers_fenced_block() {
        let text = "Here it is:\n```json\n{\"completion_score\": 90, \"reason\": \"good\"}\n```";
        let value = extract_inner_json(text).unwrap();
        assert_eq!(value["completion_score"], 90);
    }

    #[test]
    fn extract_parses_bare_object() {
        let value = extract_inner_json("{\"main_errors\": \"none\"}").unwrap();
        assert_eq!(value["main_errors"], "none");
    }

    #[test]
    fn extract_leaves_prose_untouched() {
        assert!(extract_inner_json("the model seems fine overall").is_none());
    }

    #[test]
    fn process_json_file_structures_string_fields() {
        let env = TestEnv::new(Vec::new());
        let mut record = sample_record("trace-1");
        record.score = Some(Value::String(
            "```json\n{\"completion_score\": 40, \"reason\": \"half done\"}\n```".into(),
        ));
        record.error = Some(Value::String("free-form prose that is not JSON".into()));
        let path = env.output_file("trace-1.json");
        record.save(&path).unwrap();

        let args = FileArgs {
            file_path: path.display().to_string(),
        };
        process_json_file(&args).unwrap();

        let updated = TraceRecord::load(&path).unwrap();
        assert_eq!(updated.score.as_ref().unwrap()["completion_score"], 40);
        // Unparseable values stay raw.
        assert_eq!(
            updated.error,
            Some(Value::String("free-form prose that is not JSON".into()))
        );
    }

    #[test]
    fn conclude_check_uses_batch_modulus() {
        let env = TestEnv::new(Vec::new());
        for i in 0..10 {
            sample_record(&format!("trace-{i}"))
                .save(&env.output_file(&format!("trace-{i}.json")))
                .unwrap();
        }
        let args = FileArgs {
            file_path: env.output_file("trace-0.json").display().to_string(),
        };
        let (obs, _) = if_generate_conclude_report(&env.ctx, &args).unwrap();
        assert!(obs.contains("true"));

        std::fs::remove_file(env.output_file("trace-9.json")).unwrap();
        let (obs, _) = if_generate_conclude_report(&env.ctx, &args).unwrap();
        assert!(obs.contains("false"));
    }

    #[test]
    fn conclude_check_tolerates_zero_modulus() {
        let mut env = TestEnv::new(Vec::new());
        env.ctx.limits.batch_modulus = 0;
        sample_record("trace-1")
            .save(&env.output_file("trace-1.json"))
            .unwrap();
        let args = FileArgs {
            file_path: env.output_file("trace-1.json").display().to_string(),
        };
        let (obs, _) = if_generate_conclude_report(&env.ctx, &args).unwrap();
        assert!(obs.contains("false"));
    }

    #[test]
    fn conclude_check_missing_folder_is_an_error() {
        let env = TestEnv::new(Vec::new());
        let args = FileArgs {
            file_path: env
                .ctx
                .output_dir
                .join("gone")
                .join("trace-1.json")
                .display()
                .to_string(),
        };
        assert!(if_generate_conclude_report(&env.ctx, &args).is_err());
    }

    #[tokio::test]
    async fn key_error_tag_is_trimmed_and_stored() {
        let env = TestEnv::new(vec![text_response("  tool misuse \n")]);
        let mut record = sample_record("trace-1");
        record.error = Some(Value::String("called the wrong tool repeatedly".into()));
        let path = env.output_file("trace-1.json");
        record.save(&path).unwrap();

        let args = FileArgs {
            file_path: path.display().to_string(),
        };
        generate_key_error(&env.ctx, &args).await.unwrap();
        let updated = TraceRecord::load(&path).unwrap();
        assert_eq!(updated.key_error, Some(Value::String("tool misuse".into())));
    }
}
