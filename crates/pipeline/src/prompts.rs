//! System and task prompts for the three stages and their synthesis calls.

/// Drives the structuring agent loop.
pub const STRUCTURING_SYSTEM: &str = "\
You are a structuring agent that cleans and condenses agent execution \
traces. Given the path of a trace JSON file with thought, action, and \
observation fields, work step by step with the available tools: first copy \
the file into the writable storage area, then find which entries of the \
three step fields are over length, summarize the over-length entries in \
place, and summarize the task field as well. When the work is done you must \
output `finish()` directly. Begin!";

/// Drives the insight agent loop.
pub const INSIGHT_SYSTEM: &str = "\
You are an insight agent that evaluates how well an agent executed its \
task. Given the path of a trace JSON file, use the available tools step by \
step: score the overall task completion from the trace table, analyze the \
main and secondary errors made during execution, summarize strengths and \
weaknesses, derive a root-cause insight from those findings, and finally \
produce an actionable optimization strategy with a fine-tuning sample. When \
the work is done you must output `finish()` directly. Begin!";

/// Drives the report agent loop.
pub const REPORT_SYSTEM: &str = "\
You are a report agent that distills a folder of per-trace evaluation \
records into a global summary. Given the path of a record JSON file, first \
structure its important fields into plain dictionaries, then derive a short \
key-error tag from its error analysis and write it back. Next check whether \
the folder currently qualifies for a conclude report; if it does not, stop \
immediately. If it does, count the key-error values across the folder, \
compute the completion-score distribution, generate the full conclude \
report from all records plus both tables, and polish the report. When the \
work is done you must output `finish()` directly. Begin!";

// ── Structuring synthesis prompts ──────────────────────────────

pub const SUMMARIZE_TEXT_SYSTEM: &str =
    "You are a text summarization expert skilled at extracting the key \
     information from long passages.";

pub const SUMMARIZE_CODE_SYSTEM: &str =
    "You are a text and code summarization expert skilled at extracting the \
     key information from long passages and long code.";

pub const SUMMARIZE_TASK_SYSTEM: &str =
    "You are a task summarization expert skilled at distilling the core \
     requirement of a task.";

/// Ask for an in-place summary of one over-length entry.
pub fn summarize_entry(kind: &str, word_limit: usize, body: &str) -> String {
    format!(
        "Below is the detailed {kind} from an agent solving a task. Produce \
         a concise summary that keeps the original meaning, extracting the \
         core steps and key points, in at most {word_limit} words, adding \
         nothing:\n\n{body}"
    )
}

pub fn summarize_task(word_limit: usize, task: &str) -> String {
    format!(
        "Below is the task the agent had to solve. Summarize its core \
         requirement in at most {word_limit} words, adding nothing:\n\n{task}"
    )
}

// ── Insight synthesis prompts ──────────────────────────────────

pub const SCORE_SYSTEM: &str = "\
You are a task evaluation expert. From the agent's complete execution \
trace, give an overall task completion score from 0 to 100 with a short \
rationale. If the task was not completed, or not fully completed, give a \
low score no matter how good the process looked. Output only one JSON \
object: {\"completion_score\": int, \"reason\": str}";

pub const DETECT_ERRORS_SYSTEM: &str = "\
You are an error analysis expert. Analyze the errors the agent made while \
completing the task, split into main core errors and other errors. Output \
one JSON object: {\"main_errors\": str, \"other_errors\": str}";

pub const FEATURES_SYSTEM: &str = "\
You are a performance assessment expert. Summarize the strengths and \
weaknesses of the agent's overall execution. Output one JSON object: \
{\"advantages\": str, \"disadvantages\": str}";

pub const INSIGHT_TOOL_SYSTEM: &str = "\
You are an expert with deep insight into model behavior. From the errors \
the agent made and its strengths and weaknesses, think hard about why the \
agent has these problems or traits, especially its main errors, and give a \
far-sighted insight. Output one JSON object: {\"insight\": str}";

pub const OPTIMIZATION_SYSTEM: &str = "\
You are an optimization strategy expert. From the agent's errors, its \
strengths and weaknesses, and the root-cause insight, produce an actionable \
optimization recommendation plus a sample usable for fine-tuning. Output \
one JSON object: {\"optimization_strategy\": str, \"finetune_sample\": dict}";

pub fn trace_judgment(context: &str) -> String {
    format!("Here are the task and the agent's execution trace table:\n{context}")
}

// ── Report synthesis prompts ───────────────────────────────────

pub const KEY_ERROR_SYSTEM: &str = "\
You are an error summarization expert. From the agent's main core errors, \
produce a very short categorical tag of at most four words. Return only \
the tag itself. If the agent made no main core error, return exactly \
'no errors'.";

const CONCLUDE_BODY: &str = "\
You are a highly professional and insightful evaluation expert looking at \
a batch of agent evaluation records sampled from failing model responses. \
Each record carries the concrete errors, weaknesses, insight, and \
improvement plan. Perform a thorough bad-case analysis and produce a \
detailed Markdown error report covering common error types, weakness \
patterns, root-cause insights, and optimization directions, including the \
global statistics tables for error and score distribution. Ground the \
analysis in concrete cases, citing record IDs. Structure the report as:\n\
1. Global overview: an objective summary of the whole batch.\n\
2. Common error analysis: from the key_error counts, name the most \
frequent error types and analyze their causes and impact. Most \
importantly, extract shared error trends from the error fields, that is, \
what kind of mistake the model tends to make in what situation. Summarize \
at least 10 distinct trends across different scenarios, each with its \
precise share of the failing cases.\n\
3. Score distribution analysis: from score_distribution, assess stability \
and performance differences across score bands; skip this section when \
every score is 0.\n\
4. Weakness patterns: typical disadvantage patterns from the feature \
fields.\n\
5. Root-cause analysis and insights: from the insight fields, give \
striking, deeply-dug insights into the errors and weaknesses, and for each \
one add a plain, readable explanation.\n\
6. Conclusions and recommendations: from the optimization fields, propose \
future optimization directions and trend predictions with executable \
advice for later training and evaluation.\n\
Keep the structure clear, the wording precise, and the logic tight, with a \
deep analysis of every section.";

/// System prompt for the full conclude-report synthesis.
pub fn conclude_system(requirement: Option<&str>) -> String {
    match requirement {
        Some(req) => format!(
            "{CONCLUDE_BODY}\nAdditionally, while generating the report, \
             fully and preferentially satisfy the user's special \
             requirement:\n{req}"
        ),
        None => CONCLUDE_BODY.to_string(),
    }
}

/// System prompt for revising the report against the version history.
pub fn revise_system(history_json: &str, requirement: &str) -> String {
    format!(
        "You are a highly professional and insightful evaluation expert. \
         From the historical report versions and the user's revision \
         requirement, produce a new Markdown report that satisfies the \
         requirement.\n\nHistory:\n{history_json}\n\nUser requirement:\n{requirement}"
    )
}

/// User message carrying the per-record digests and both statistics tables.
pub fn conclude_user(
    records_md: &str,
    key_error: &str,
    score_distribution: &str,
    requirement: Option<&str>,
) -> String {
    let mut msg = format!(
        "Here is the core information of every record:\n{records_md}\n\n\
         Here are the global key_error counts (Markdown table):\n{key_error}\n\n\
         Here is the global score distribution (Markdown table):\n{score_distribution}\n\n\
         Produce the final detailed MARKDOWN summary report as instructed."
    );
    if let Some(req) = requirement {
        msg.push_str(&format!(
            "\nAdditionally, fully and preferentially satisfy the user's \
             special requirement:\n{req}"
        ));
    }
    msg
}
