//! Upload normalization: turn raw submitted documents into aligned
//! trace records under `pending/`.
//!
//! Two input shapes are accepted: an OpenAI-style chat log
//! (`{"messages": [...]}`), which is folded into parallel
//! thought/action/observation sequences, and an already-normalized
//! document carrying the three sequences directly.

use serde_json::Value;
use std::path::Path;
use tv_domain::trace::TraceRecord;
use tv_domain::{Error, Result};

/// The step sequences parsed out of a chat log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTrace {
    pub task: String,
    pub thought: Vec<String>,
    pub action: Vec<String>,
    pub observation: Vec<String>,
}

fn text_of(msg: &Value, key: &str) -> Option<String> {
    match msg.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Fold an OpenAI-style message list into aligned step sequences.
///
/// Assistant text becomes the pending thought; each tool call flushes it
/// as one step with the call as the action and a slot for the matching
/// tool result. A later user turn becomes an `ASK_USER` step whose
/// observation is the user's message. A trailing dangling thought is
/// kept as a step with empty action and observation.
pub fn parse_chat_messages(messages: &[Value]) -> Result<ParsedTrace> {
    if messages.is_empty() {
        return Err(Error::Other("messages must not be empty".into()));
    }

    let mut task = String::new();
    let mut start = 0;
    if messages[0].get("role").and_then(Value::as_str) == Some("user") {
        task = text_of(&messages[0], "content").unwrap_or_default();
        start = 1;
    }

    let mut thought: Vec<Option<String>> = Vec::new();
    let mut action: Vec<Option<String>> = Vec::new();
    let mut observation: Vec<Option<String>> = Vec::new();
    let mut current_thought: Option<String> = None;

    for msg in &messages[start..] {
        match msg.get("role").and_then(Value::as_str) {
            Some("assistant") => {
                if let Some(content) = text_of(msg, "content").filter(|c| !c.is_empty()) {
                    current_thought = Some(content);
                    continue;
                }
                if let Some(calls) = msg.get("tool_calls").and_then(Value::as_array) {
                    for call in calls {
                        let func = call.get("function").unwrap_or(&Value::Null);
                        let name = func.get("name").and_then(Value::as_str).unwrap_or_default();
                        let args = func
                            .get("arguments")
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        thought.push(current_thought.clone());
                        action.push(Some(format!("{name}\t{args}")));
                        observation.push(None);
                    }
                    current_thought = None;
                }
            }
            Some("tool") => {
                // Fill the most recent unanswered tool call.
                if let Some(slot) = observation.iter_mut().rev().find(|o| o.is_none()) {
                    *slot = text_of(msg, "content");
                }
            }
            Some("user") => {
                thought.push(current_thought.take());
                action.push(Some("ASK_USER".into()));
                observation.push(text_of(msg, "content"));
            }
            _ => {}
        }
    }

    if let Some(last) = current_thought {
        thought.push(Some(last));
        action.push(None);
        observation.push(None);
    }

    let fill = |v: Vec<Option<String>>| v.into_iter().map(Option::unwrap_or_default).collect();
    Ok(ParsedTrace {
        task,
        thought: fill(thought),
        action: fill(action),
        observation: fill(observation),
    })
}

/// Normalize one uploaded document into a trace record with the given id.
pub fn normalize_doc(doc: &Value, id: &str) -> Result<TraceRecord> {
    let obj = doc
        .as_object()
        .ok_or_else(|| Error::Other("uploaded document must be a JSON object".into()))?;

    let parsed = match obj.get("messages") {
        Some(Value::Array(messages)) => parse_chat_messages(messages)?,
        Some(_) => return Err(Error::Other("'messages' must be an array".into())),
        None => {
            // Already-normalized shape.
            let seq = |key: &str| -> Result<Vec<String>> {
                Ok(serde_json::from_value(
                    obj.get(key).cloned().unwrap_or(Value::Array(Vec::new())),
                )?)
            };
            ParsedTrace {
                task: String::new(),
                thought: seq("thought")?,
                action: seq("action")?,
                observation: seq("observation")?,
            }
        }
    };

    let task = obj
        .get("task")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .unwrap_or(parsed.task);
    if task.is_empty() {
        return Err(Error::Other(
            "task is empty: not supplied and not derivable from the messages".into(),
        ));
    }
    if parsed.thought.len() != parsed.action.len()
        || parsed.action.len() != parsed.observation.len()
    {
        return Err(Error::InvalidTrace {
            id: id.to_string(),
            message: "uploaded step sequences are misaligned".into(),
        });
    }

    let mut record =
        TraceRecord::new(id, task, parsed.thought, parsed.action, parsed.observation)?;
    record.oid = obj.get("oid").cloned().filter(|v| !v.is_null());
    record.gold_score = obj.get("gold_score").and_then(Value::as_f64);
    record.gold_judge = obj
        .get("gold_judge")
        .and_then(|v| serde_json::from_value(v.clone()).ok());
    record.other = obj.get("other").cloned().filter(|v| !v.is_null());
    Ok(record)
}

fn read_upload(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(text.trim_start_matches('\u{feff}'))?)
}

/// Normalize every upload in `init_dir` into `pending_dir` as
/// `trace-<n>.json`, numbering in sorted file-name order. Files that are
/// not readable JSON text are skipped with a warning; a structurally
/// invalid document fails the whole ingest. Returns the record count.
pub fn ingest_dir(init_dir: &Path, pending_dir: &Path) -> Result<usize> {
    if !init_dir.is_dir() {
        return Err(Error::NotFound(format!(
            "upload directory does not exist: {}",
            init_dir.display()
        )));
    }
    std::fs::create_dir_all(pending_dir)?;

    let mut names: Vec<_> = std::fs::read_dir(init_dir)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| {
            p.extension().is_some_and(|e| e.eq_ignore_ascii_case("json"))
                && !p
                    .file_name()
                    .map(|n| n.to_string_lossy().starts_with("._"))
                    .unwrap_or(false)
        })
        .collect();
    names.sort();

    let mut index = 1;
    for path in names {
        let raw = match read_upload(&path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping undecodable upload");
                continue;
            }
        };
        let id = format!("trace-{index}");
        let record = normalize_doc(&raw, &id).map_err(|e| {
            Error::Other(format!("{}: normalization failed: {e}", path.display()))
        })?;
        record.save(&pending_dir.join(format!("{id}.json")))?;
        index += 1;
    }
    Ok(index - 1)
}
