//! Rendering a trace record into the Markdown forms the synthesis
//! prompts consume.

use tv_domain::trace::TraceRecord;

/// Render the step sequences as a Markdown table, one row per step.
pub fn trace_table(record: &TraceRecord) -> String {
    let mut lines = vec![
        "| Index | Thought | Action | Observation |".to_string(),
        "|-------|---------|--------|-------------|".to_string(),
    ];
    let rows = record
        .length
        .min(record.thought.len())
        .min(record.action.len())
        .min(record.observation.len());
    for i in 0..rows {
        lines.push(format!(
            "| {} | {} | {} | {} |",
            i,
            escape_cell(&record.thought[i]),
            escape_cell(&record.action[i]),
            escape_cell(&record.observation[i]),
        ));
    }
    lines.join("\n")
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

/// Ground-truth preamble for the judgment prompts.
///
/// A gold score below 1 means the task is known to have failed, and the
/// judge annotations, when present, say why. With no gold score the
/// annotations are passed along as plain evaluator notes.
pub fn gold_judgment_note(record: &TraceRecord) -> String {
    let judge = record
        .gold_judge
        .as_deref()
        .unwrap_or(&[])
        .join("\n");
    match record.gold_score {
        Some(score) if score < 1.0 => {
            if judge.is_empty() {
                "Note: according to the automated evaluation, this task was not completed."
                    .to_string()
            } else {
                format!(
                    "Note: according to the automated evaluation, this task was not \
                     completed. Error details:\n{judge}"
                )
            }
        }
        Some(_) => String::new(),
        None => {
            if judge.is_empty() {
                String::new()
            } else {
                format!("Evaluation notes for this task:\n{judge}")
            }
        }
    }
}

/// Task, trace table, and gold note combined for the judgment prompts.
pub fn judgment_context(record: &TraceRecord) -> String {
    format!(
        "{}\n{}\n\n{}",
        record.task,
        trace_table(record),
        gold_judgment_note(record)
    )
}
