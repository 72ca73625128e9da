//! The batch-level conclude report: full synthesis over every record,
//! and the polish pass that appends the referenced records as an appendix.

use crate::agent::StageContext;
use crate::history::ReportHistory;
use crate::prompts;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;
use tv_domain::chat::{Message, Usage};
use tv_domain::{Error, Result};
use tv_providers::retry::generate_text;

pub const REPORT_FILE: &str = "conclude_report.md";
pub const POLISHED_REPORT_FILE: &str = "conclude_report_polished.md";

/// The per-record fields the report synthesis consumes.
#[derive(Debug, Clone)]
struct RecordDigest {
    id: String,
    error: String,
    feature: String,
    insight: String,
    optimization: String,
    other: String,
}

fn field_string(doc: &Value, key: &str) -> String {
    match doc.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

/// Digest every record directly inside `dir` (non-recursive). Files that
/// do not parse are skipped with a warning.
fn gather_digests(dir: &Path) -> Result<Vec<RecordDigest>> {
    let mut digests = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"))
        {
            continue;
        }
        let doc: Value = match std::fs::read_to_string(&path)
            .map_err(Error::from)
            .and_then(|t| Ok(serde_json::from_str(&t)?))
        {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unparseable record");
                continue;
            }
        };
        let fallback_id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        digests.push(RecordDigest {
            id: doc
                .get("id")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or(fallback_id),
            error: field_string(&doc, "error"),
            feature: field_string(&doc, "feature"),
            insight: field_string(&doc, "insight"),
            optimization: field_string(&doc, "optimization"),
            other: field_string(&doc, "other"),
        });
    }
    Ok(digests)
}

fn digests_markdown(digests: &[RecordDigest]) -> String {
    digests
        .iter()
        .map(|d| {
            format!(
                "### Record ID: {}\n**Errors**:\n{}\n\n**Weaknesses**:\n{}\n\n\
                 **Insight**:\n{}\n\n**Optimization plan**:\n{}\n**Other**:\n{}\n",
                d.id, d.error, d.feature, d.insight, d.optimization, d.other
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

async fn synthesize_report(
    ctx: &StageContext,
    system: String,
    key_error: &str,
    score_distribution: &str,
    requirement: Option<&str>,
) -> Result<Vec<Usage>> {
    let digests = gather_digests(&ctx.output_dir)?;
    let user = prompts::conclude_user(
        &digests_markdown(&digests),
        key_error,
        score_distribution,
        requirement,
    );
    let messages = vec![Message::system(system), Message::user(user)];
    let (report, usages) =
        generate_text(ctx.client.as_ref(), messages, ctx.limits.max_completion_retries).await?;
    std::fs::write(ctx.output_dir.join(REPORT_FILE), report)?;
    Ok(usages)
}

/// Generate `conclude_report.md` from every record in the output folder
/// plus both statistics tables.
pub async fn generate_report(
    ctx: &StageContext,
    key_error: &str,
    score_distribution: &str,
) -> Result<Vec<Usage>> {
    let requirement = ctx.report_requirement.as_deref();
    synthesize_report(
        ctx,
        prompts::conclude_system(requirement),
        key_error,
        score_distribution,
        requirement,
    )
    .await
}

/// Regenerate the report from the version history plus a new requirement.
pub async fn revise_report(
    ctx: &StageContext,
    history: &ReportHistory,
    requirement: &str,
    key_error: &str,
    score_distribution: &str,
) -> Result<Vec<Usage>> {
    synthesize_report(
        ctx,
        prompts::revise_system(&history.to_prompt_json()?, requirement),
        key_error,
        score_distribution,
        None,
    )
    .await
}

fn trace_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"trace-\d+").expect("valid regex"))
}

/// Scan the report for trace identifiers and write a polished copy with
/// the referenced records appended verbatim. Identifiers with no backing
/// file are listed in a second appendix section.
pub fn polish_report(report_path: &Path) -> Result<String> {
    if !report_path.exists() {
        return Err(Error::NotFound(format!(
            "report does not exist: {}",
            report_path.display()
        )));
    }
    let folder = report_path
        .parent()
        .ok_or_else(|| Error::Other("report path has no parent".into()))?;
    let report = std::fs::read_to_string(report_path)?;

    let ids: BTreeSet<String> = trace_id_regex()
        .find_iter(&report)
        .map(|m| m.as_str().to_string())
        .collect();
    if ids.is_empty() {
        return Ok("no trace identifiers referenced in the report, nothing to polish".into());
    }

    let mut sections = Vec::new();
    let mut missing = Vec::new();
    for id in &ids {
        let record_path = folder.join(format!("{id}.json"));
        if !record_path.exists() {
            missing.push(id.clone());
            continue;
        }
        match std::fs::read_to_string(&record_path)
            .map_err(Error::from)
            .and_then(|t| Ok(serde_json::from_str::<Value>(&t)?))
        {
            Ok(doc) => sections.push(format!(
                "### {id}\n\n```json\n{}\n```\n",
                serde_json::to_string_pretty(&doc)?
            )),
            Err(e) => sections.push(format!("### {id}\n\nunreadable record file: {e}\n")),
        }
    }

    let mut appendix = format!(
        "\n\n---\n\n## Appendix: referenced trace records\n\n{}",
        sections.join("\n")
    );
    if !missing.is_empty() {
        appendix.push_str(&format!(
            "\n\n---\n\n## Trace identifiers with no record file\n\n{}\n",
            missing
                .iter()
                .map(|id| format!("- {id}"))
                .collect::<Vec<_>>()
                .join("\n")
        ));
    }

    let polished_path = folder.join(POLISHED_REPORT_FILE);
    std::fs::write(&polished_path, format!("{report}{appendix}"))?;
    Ok(format!("report polished: {}", polished_path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_record, text_response, TestEnv};

    #[test]
    fn polish_appends_referenced_records_and_lists_missing() {
        let env = TestEnv::new(Vec::new());
        let mut record = sample_record("trace-1");
        record.key_error = Some(Value::String("no errors".into()));
        record.save(&env.output_file("trace-1.json")).unwrap();

        let report_path = env.output_file(REPORT_FILE);
        std::fs::write(&report_path, "See trace-1 and also trace-7 for details.").unwrap();

        let msg = polish_report(&report_path).unwrap();
        assert!(msg.contains(POLISHED_REPORT_FILE));
        let polished = std::fs::read_to_string(env.output_file(POLISHED_REPORT_FILE)).unwrap();
        assert!(polished.contains("### trace-1"));
        assert!(polished.contains("no record file"));
        assert!(polished.contains("- trace-7"));
    }

    #[test]
    fn polish_without_report_is_not_found() {
        let env = TestEnv::new(Vec::new());
        let err = polish_report(&env.output_file(REPORT_FILE)).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn polish_without_ids_leaves_no_polished_file() {
        let env = TestEnv::new(Vec::new());
        let report_path = env.output_file(REPORT_FILE);
        std::fs::write(&report_path, "A report citing nothing.").unwrap();
        let msg = polish_report(&report_path).unwrap();
        assert!(msg.contains("nothing to polish"));
        assert!(!env.output_file(POLISHED_REPORT_FILE).exists());
    }

    #[tokio::test]
    async fn generate_report_writes_markdown() {
        let env = TestEnv::new(vec![text_response("# Batch report\n\nAll good.")]);
        let mut record = sample_record("trace-1");
        record.error = Some(Value::String("none".into()));
        record.save(&env.output_file("trace-1.json")).unwrap();

        generate_report(&env.ctx, "key error counts:", "score distribution:")
            .await
            .unwrap();
        let report = std::fs::read_to_string(env.output_file(REPORT_FILE)).unwrap();
        assert!(report.starts_with("# Batch report"));
    }
}
