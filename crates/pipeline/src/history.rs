//! Versioned report history: `history.json` maps `"V<N>"` to the
//! requirement and report text of each revision, contiguous from V0.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tv_domain::{Error, Result};

pub const HISTORY_FILE: &str = "history.json";

const V0_REQUIREMENT: &str = "initial report (auto-generated)";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub requirement: String,
    pub report: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReportHistory {
    entries: BTreeMap<u32, HistoryEntry>,
}

impl ReportHistory {
    /// Load `history.json` from the job directory, seeding V0 from the
    /// existing conclude report when no history exists yet. No conclude
    /// report means there is nothing to revise.
    pub fn load_or_seed(job_dir: &Path, report_path: &Path) -> Result<Self> {
        let history_path = job_dir.join(HISTORY_FILE);
        if history_path.exists() {
            let text = std::fs::read_to_string(&history_path)?;
            return Self::from_value(&serde_json::from_str(&text)?);
        }
        if !report_path.exists() {
            return Err(Error::NotFound(
                "conclude report does not exist, cannot seed history V0".into(),
            ));
        }
        let mut history = Self::default();
        history.entries.insert(
            0,
            HistoryEntry {
                requirement: V0_REQUIREMENT.into(),
                report: std::fs::read_to_string(report_path)?,
            },
        );
        history.save(job_dir)?;
        Ok(history)
    }

    fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Other("history.json is not an object".into()))?;
        let mut entries = BTreeMap::new();
        for (key, entry) in obj {
            let version: u32 = key
                .strip_prefix('V')
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| Error::Other(format!("bad history version key '{key}'")))?;
            entries.insert(version, serde_json::from_value(entry.clone())?);
        }
        Ok(Self { entries })
    }

    fn to_value(&self) -> Result<Value> {
        let mut obj = serde_json::Map::new();
        for (version, entry) in &self.entries {
            obj.insert(format!("V{version}"), serde_json::to_value(entry)?);
        }
        Ok(Value::Object(obj))
    }

    /// The history rendered for the revision prompt.
    pub fn to_prompt_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_value()?)?)
    }

    pub fn next_version(&self) -> u32 {
        self.entries.keys().max().map_or(0, |max| max + 1)
    }

    /// Append a revision, returning its version number.
    pub fn push(&mut self, requirement: impl Into<String>, report: impl Into<String>) -> u32 {
        let version = self.next_version();
        self.entries.insert(
            version,
            HistoryEntry {
                requirement: requirement.into(),
                report: report.into(),
            },
        );
        version
    }

    pub fn get(&self, version: u32) -> Option<&HistoryEntry> {
        self.entries.get(&version)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn save(&self, job_dir: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.to_value()?)?;
        std::fs::write(job_dir.join(HISTORY_FILE), text)?;
        Ok(())
    }

    /// Drop any saved history, so the next revision reseeds V0.
    pub fn clear(job_dir: &Path) -> Result<()> {
        let path = job_dir.join(HISTORY_FILE);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}
