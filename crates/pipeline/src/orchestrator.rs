//! Drives a batch: the three stages per trace file, then the batch-level
//! statistics, conclude report, and polish pass. Also the revision flow
//! that regenerates the report against the version history.

use crate::agent::{run_stage, StageContext};
use crate::audit::StepLogger;
use crate::history::ReportHistory;
use crate::progress::JobLog;
use crate::stages::{InsightStage, ReportStage, StructuringStage};
use crate::{aggregate, conclude};
use std::path::{Path, PathBuf};
use tv_domain::Result;

fn list_records(dir: &Path) -> Result<Vec<PathBuf>> {
    // Readdir order on purpose, matching how outputs were first produced.
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"))
        {
            files.push(path);
        }
    }
    Ok(files)
}

fn batch_tables(ctx: &StageContext) -> Result<(String, String)> {
    let key_error = aggregate::key_error_table(&aggregate::count_key_errors(&ctx.output_dir)?);
    let score = aggregate::score_table(&aggregate::score_distribution(&ctx.output_dir)?);
    Ok((key_error, score))
}

/// Process every pending trace through the three stages, then finalize
/// the batch report.
///
/// A trace whose output file already exists is skipped entirely, so a
/// rerun resumes where the last run stopped. When nothing was processed
/// and the conclude report already exists, finalization is skipped too
/// and the rerun makes no model calls at all.
pub async fn process_batch(ctx: &StageContext, log: &JobLog, audit: &StepLogger) -> Result<()> {
    let files = list_records(&ctx.pending_dir)?;
    if let Some(req) = &ctx.report_requirement {
        log.line(format!("user requirement: {req}"));
    }
    log.line(format!("found {} trace files to process", files.len()));

    let mut processed = 0usize;
    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = ctx.output_dir.join(&name);
        if output.exists() {
            log.line(format!("output exists, skipping: {name}"));
            continue;
        }
        log.line(format!("processing: {name}"));
        tracing::info!(file = %name, "processing trace");

        run_stage(&StructuringStage, ctx, path, log, audit).await?;
        run_stage(&InsightStage, ctx, &output, log, audit).await?;
        run_stage(&ReportStage, ctx, &output, log, audit).await?;
        processed += 1;
    }

    let report_path = ctx.output_dir.join(conclude::REPORT_FILE);
    if processed == 0 && report_path.exists() {
        log.line("all outputs up to date, keeping the existing conclude report");
        return Ok(());
    }

    let (key_error, score) = batch_tables(ctx)?;
    conclude::generate_report(ctx, &key_error, &score).await?;
    let polish_msg = conclude::polish_report(&report_path)?;

    log.line("###### FINAL REPORT ######");
    log.line(format!(
        "conclude report written to {}\n{polish_msg}",
        report_path.display()
    ));
    Ok(())
}

/// Regenerate the conclude report for a new requirement and append it to
/// the version history.
pub async fn revise_batch(
    ctx: &StageContext,
    job_dir: &Path,
    requirement: &str,
    log: &JobLog,
) -> Result<()> {
    log.line(format!("revision requirement: {requirement}"));

    let report_path = ctx.output_dir.join(conclude::REPORT_FILE);
    let mut history = ReportHistory::load_or_seed(job_dir, &report_path)?;

    let (key_error, score) = batch_tables(ctx)?;
    conclude::revise_report(ctx, &history, requirement, &key_error, &score).await?;
    let polish_msg = conclude::polish_report(&report_path)?;

    let new_report = std::fs::read_to_string(&report_path)?;
    let version = history.push(requirement, new_report);
    history.save(job_dir)?;

    log.line("###### FINAL REPORT ######");
    log.line(format!("report revised as V{version}\n{polish_msg}"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_record, text_response, TestEnv};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn rerun_with_existing_outputs_makes_no_model_calls() {
        // Empty script: any chat call would error the batch.
        let env = TestEnv::new(Vec::new());
        sample_record("trace-1")
            .save(&env.output_file("trace-1.json"))
            .unwrap();
        std::fs::write(env.output_file(conclude::REPORT_FILE), "# report").unwrap();

        process_batch(&env.ctx, &JobLog::discard(), &env.audit)
            .await
            .unwrap();
        assert_eq!(env.client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn finalization_runs_when_outputs_exist_but_report_does_not() {
        let env = TestEnv::new(vec![text_response(
            "# Batch report\n\nNothing to flag for trace-1.",
        )]);
        sample_record("trace-1")
            .save(&env.output_file("trace-1.json"))
            .unwrap();

        process_batch(&env.ctx, &JobLog::discard(), &env.audit)
            .await
            .unwrap();

        // trace-1's output already existed, so the only model call is
        // the conclude synthesis.
        assert_eq!(env.client.calls.load(Ordering::SeqCst), 1);
        assert!(env.output_file(conclude::REPORT_FILE).exists());
        assert!(env.output_file(conclude::POLISHED_REPORT_FILE).exists());
    }

    #[tokio::test]
    async fn stages_run_for_new_trace_then_finalize() {
        let env = TestEnv::new(Vec::new());
        let pending = env.pending_file("trace-1.json").display().to_string();
        // Structuring: copy then finish; insight and report finish at
        // once; one conclude synthesis closes the batch.
        env.client.push(crate::testing::tool_call_response(
            "create_storage_env",
            serde_json::json!({ "file_path": pending }),
        ));
        env.client.push(text_response("finish()"));
        env.client.push(text_response("finish()"));
        env.client.push(text_response("finish()"));
        env.client.push(text_response("# Report"));

        process_batch(&env.ctx, &JobLog::discard(), &env.audit)
            .await
            .unwrap();
        assert!(env.output_file("trace-1.json").exists());
        assert!(env.output_file(conclude::REPORT_FILE).exists());
        assert_eq!(env.client.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn revision_appends_to_history() {
        let env = TestEnv::new(vec![text_response("# Revised report about trace-1")]);
        sample_record("trace-1")
            .save(&env.output_file("trace-1.json"))
            .unwrap();
        std::fs::write(env.output_file(conclude::REPORT_FILE), "# v0").unwrap();

        revise_batch(&env.ctx, env.dir.path(), "make it shorter", &JobLog::discard())
            .await
            .unwrap();

        let history =
            ReportHistory::load_or_seed(env.dir.path(), &env.output_file(conclude::REPORT_FILE))
                .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.get(1).unwrap().requirement, "make it shorter");
        assert!(history.get(1).unwrap().report.contains("Revised"));
    }

    #[tokio::test]
    async fn revision_without_report_fails() {
        let env = TestEnv::new(Vec::new());
        let err = revise_batch(&env.ctx, env.dir.path(), "req", &JobLog::discard())
            .await
            .unwrap_err();
        assert!(matches!(err, tv_domain::Error::NotFound(_)));
    }
}
