//! The trace record: one evaluated agent trajectory, stored as a single
//! JSON document and rewritten in place as the pipeline stages fill in
//! their output fields.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// One agent trajectory plus the evaluation fields the stages produce.
///
/// The three step sequences are parallel arrays: entry `i` of `thought`,
/// `action`, and `observation` describe the same step, and `length` is
/// their common length. Every write goes through [`TraceRecord::save`],
/// which re-checks that alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Pipeline-assigned identifier, `trace-<n>`.
    pub id: String,
    /// Caller-supplied opaque identifier, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<Value>,
    pub task: String,
    pub thought: Vec<String>,
    pub action: Vec<String>,
    pub observation: Vec<String>,
    pub length: usize,
    /// Ground-truth completion score in `[0, 1]`, when the caller has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold_score: Option<f64>,
    /// Ground-truth judge annotations accompanying `gold_score`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gold_judge: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<Value>,

    // Stage outputs. Absent until the owning stage has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insight: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_error: Option<Value>,
}

impl TraceRecord {
    /// Build a fresh record from aligned step sequences.
    pub fn new(
        id: impl Into<String>,
        task: impl Into<String>,
        thought: Vec<String>,
        action: Vec<String>,
        observation: Vec<String>,
    ) -> Result<Self> {
        let record = Self {
            id: id.into(),
            oid: None,
            task: task.into(),
            length: thought.len(),
            thought,
            action,
            observation,
            gold_score: None,
            gold_judge: None,
            other: None,
            score: None,
            error: None,
            feature: None,
            insight: None,
            optimization: None,
            key_error: None,
        };
        record.validate()?;
        Ok(record)
    }

    /// Check the alignment invariant.
    pub fn validate(&self) -> Result<()> {
        let (t, a, o) = (self.thought.len(), self.action.len(), self.observation.len());
        if t != self.length || a != self.length || o != self.length {
            return Err(Error::InvalidTrace {
                id: self.id.clone(),
                message: format!(
                    "misaligned step sequences: thought={t} action={a} observation={o} length={}",
                    self.length
                ),
            });
        }
        Ok(())
    }

    /// True when the caller supplied ground truth for this trace.
    pub fn has_ground_truth(&self) -> bool {
        self.gold_score.is_some()
    }

    /// Read and validate a record from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let record: Self = serde_json::from_str(&text)?;
        record.validate()?;
        Ok(record)
    }

    /// Validate and write the record back, pretty-printed.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TraceRecord {
        TraceRecord::new(
            "trace-1",
            "book a flight",
            vec!["look up flights".into(), "pick the cheapest".into()],
            vec!["search(\"SFO to JFK\")".into(), "book(101)".into()],
            vec!["3 options".into(), "confirmed".into()],
        )
        .unwrap()
    }

    #[test]
    fn validate_rejects_misaligned_sequences() {
        let mut record = sample();
        record.action.pop();
        assert!(record.validate().is_err());
    }

    #[test]
    fn save_refuses_invalid_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = sample();
        record.length = 7;
        let path = dir.path().join("trace-1.json");
        assert!(record.save(&path).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = sample();
        record.gold_score = Some(0.9);
        record.key_error = Some(serde_json::json!("tool misuse"));
        let path = dir.path().join("trace-1.json");
        record.save(&path).unwrap();

        let loaded = TraceRecord::load(&path).unwrap();
        assert_eq!(loaded.id, "trace-1");
        assert_eq!(loaded.gold_score, Some(0.9));
        assert_eq!(loaded.key_error, Some(serde_json::json!("tool misuse")));
        // Unset stage fields stay out of the serialized form.
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(raw.get("insight").is_none());
    }
}
