//! Append-only JSONL audit log, one entry per agent-loop iteration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tv_domain::chat::Usage;
use tv_domain::Result;

/// One audited loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEntry {
    pub timestamp: String,
    /// Trace file the loop is working on.
    pub file: String,
    pub stage: String,
    pub step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    /// Assistant text for the iteration, empty when the model sent none.
    pub thought: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
    /// Usage of the loop's own completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<Usage>,
    /// Usage of any nested synthesis calls the tool handler made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_tool: Option<Vec<Usage>>,
}

/// Appends step entries to `trace_steps.jsonl` in a job directory.
pub struct StepLogger {
    path: PathBuf,
}

impl StepLogger {
    pub fn new(job_dir: &std::path::Path) -> Self {
        Self {
            path: job_dir.join("trace_steps.jsonl"),
        }
    }

    pub fn append(&self, entry: &StepEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}
