//! Batch-level counting over a folder of evaluated trace records.

use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tv_domain::Result;

/// All `.json` files under `dir`, recursively.
pub fn walk_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("json"))
            {
                files.push(path);
            }
        }
    }
    Ok(files)
}

/// Count `key_error` values across a record folder, most frequent first,
/// ties kept in first-seen order. Non-string values are canonicalized to
/// their JSON text. Unreadable files are skipped with a warning.
pub fn count_key_errors(dir: &Path) -> Result<Vec<(String, usize)>> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for path in walk_json_files(dir)? {
        let doc: Value = match std::fs::read_to_string(&path)
            .map_err(tv_domain::Error::from)
            .and_then(|t| Ok(serde_json::from_str(&t)?))
        {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable record");
                continue;
            }
        };
        let Some(value) = doc.get("key_error") else {
            continue;
        };
        let key = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match counts.iter_mut().find(|(k, _)| *k == key) {
            Some((_, n)) => *n += 1,
            None => counts.push((key, 1)),
        }
    }
    // Stable sort keeps insertion order among equal counts.
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(counts)
}

pub fn key_error_table(counts: &[(String, usize)]) -> String {
    let mut lines = vec![
        "| key_error_value | count |".to_string(),
        "|-----------------|-------|".to_string(),
    ];
    for (key, count) in counts {
        lines.push(format!("| {} | {} |", key.replace('|', "\\|"), count));
    }
    format!("key error counts:\n{}", lines.join("\n"))
}

pub const SCORE_BUCKETS: [&str; 6] = ["100", "90-99", "80-89", "60-79", "1-59", "0"];

/// Completion-score counts per bucket, plus how many records had a
/// resolvable score at all.
#[derive(Debug, Clone, Default)]
pub struct ScoreDistribution {
    pub counts: [usize; 6],
    pub total: usize,
}

fn score_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"completion_score[^0-9]*([0-9]+)").expect("valid regex"))
}

/// Resolve a record's completion score on the 0-100 scale.
///
/// Ground truth wins: `gold_score` is on 0-1 and scales up. Otherwise a
/// structured `score.completion_score` is used, and as a last resort the
/// number is pulled out of the raw score text.
pub fn resolve_completion_score(doc: &Value) -> Option<f64> {
    if let Some(gold) = doc.get("gold_score").and_then(Value::as_f64) {
        return Some(gold * 100.0);
    }
    match doc.get("score")? {
        Value::Object(obj) => obj.get("completion_score").and_then(Value::as_f64),
        Value::String(text) => score_regex()
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok()),
        _ => None,
    }
}

fn bucket_index(score: f64) -> Option<usize> {
    if score == 100.0 {
        Some(0)
    } else if (90.0..=99.0).contains(&score) {
        Some(1)
    } else if (80.0..=89.0).contains(&score) {
        Some(2)
    } else if (60.0..=79.0).contains(&score) {
        Some(3)
    } else if (1.0..60.0).contains(&score) {
        Some(4)
    } else if score == 0.0 {
        Some(5)
    } else {
        None
    }
}

pub fn score_distribution(dir: &Path) -> Result<ScoreDistribution> {
    let mut dist = ScoreDistribution::default();
    for path in walk_json_files(dir)? {
        let Ok(text) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(doc) = serde_json::from_str::<Value>(&text) else {
            tracing::warn!(path = %path.display(), "skipping unparseable record");
            continue;
        };
        if let Some(score) = resolve_completion_score(&doc) {
            dist.total += 1;
            if let Some(i) = bucket_index(score) {
                dist.counts[i] += 1;
            }
        }
    }
    Ok(dist)
}

pub fn score_table(dist: &ScoreDistribution) -> String {
    let mut lines = vec![
        "| score_range | count | percent |".to_string(),
        "|-------------|-------|---------|".to_string(),
    ];
    for (range, count) in SCORE_BUCKETS.iter().zip(dist.counts.iter()) {
        let percent = if dist.total > 0 {
            format!("{:.2}%", *count as f64 / dist.total as f64 * 100.0)
        } else {
            "0%".to_string()
        };
        lines.push(format!("| {range} | {count} | {percent} |"));
    }
    format!("score distribution:\n{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_doc(dir: &Path, name: &str, doc: Value) {
        std::fs::write(dir.join(name), serde_json::to_string(&doc).unwrap()).unwrap();
    }

    #[test]
    fn key_errors_count_descending_with_stable_ties() {
        let dir = tempfile::tempdir().unwrap();
        for (i, key) in ["A", "B", "A", "A"].iter().enumerate() {
            write_doc(dir.path(), &format!("t{i}.json"), serde_json::json!({"key_error": key}));
        }
        let counts = count_key_errors(dir.path()).unwrap();
        assert_eq!(counts, vec![("A".to_string(), 3), ("B".to_string(), 1)]);
    }

    #[test]
    fn non_string_key_errors_are_canonicalized() {
        let dir = tempfile::tempdir().unwrap();
        write_doc(dir.path(), "t1.json", serde_json::json!({"key_error": {"tag": "x"}}));
        write_doc(dir.path(), "t2.json", serde_json::json!({"key_error": {"tag": "x"}}));
        let counts = count_key_errors(dir.path()).unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].1, 2);
    }

    #[test]
    fn scores_land_in_the_right_buckets() {
        let dir = tempfile::tempdir().unwrap();
        for (i, score) in [100, 95, 85, 70, 30, 0].iter().enumerate() {
            write_doc(
                dir.path(),
                &format!("t{i}.json"),
                serde_json::json!({"score": {"completion_score": score}}),
            );
        }
        let dist = score_distribution(dir.path()).unwrap();
        assert_eq!(dist.total, 6);
        assert_eq!(dist.counts, [1, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn gold_score_takes_precedence_and_scales() {
        let doc = serde_json::json!({
            "gold_score": 0.95,
            "score": {"completion_score": 10}
        });
        assert_eq!(resolve_completion_score(&doc), Some(95.0));
    }

    #[test]
    fn raw_text_score_is_extracted_by_pattern() {
        let doc = serde_json::json!({
            "score": "the model gave {\"completion_score\": 72, \"reason\": \"ok\"}"
        });
        assert_eq!(resolve_completion_score(&doc), Some(72.0));
    }

    #[test]
    fn score_table_reports_percentages() {
        let dist = ScoreDistribution {
            counts: [1, 0, 0, 0, 0, 1],
            total: 2,
        };
        let table = score_table(&dist);
        assert!(table.contains("| 100 | 1 | 50.00% |"));
        assert!(table.contains("| 0 | 1 | 50.00% |"));
    }
}
